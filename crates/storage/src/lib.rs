//! Built-in storage providers for encrypted records.
//!
//! Both providers keep records in insertion order with a sequential
//! internal id and enumerate lazily with an exclusive label cursor.

pub mod error;
pub mod file;
pub mod memory;
pub mod registry;
mod table;

pub use error::{Result, StorageError};
pub use file::FileStorageProvider;
pub use memory::InMemoryStorageProvider;
pub use registry::StorageProviderRegistry;
