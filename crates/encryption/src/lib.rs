//! # Encryption
//!
//! Crypto engines and lookup hashing for the data encryption service.
//!
//! - [`AesCbcEngine`]: local fixed-key AES-CBC, key version always 1
//! - [`VaultTransitEngine`]: remote versioned keys through the Vault transit API
//! - [`CryptoEngineRegistry`]: configured engines by id, built once
//! - [`StringHasher`]: SHA-2 / HMAC digests for lookup by value
//!
//! ```rust,ignore
//! use encryption::CryptoEngineRegistry;
//!
//! let registry = CryptoEngineRegistry::from_config(&config);
//! let engine = registry.default_engine().ok_or(...)?;
//! let result = engine.encrypt(&clear_text, None).await?;
//! ```

pub mod aes_cbc;
pub mod error;
pub mod hasher;
pub mod keygen;
pub mod registry;
pub mod transit;

pub use aes_cbc::{AesCbcEngine, SymmetricKey};
pub use error::{EncryptionError, Result};
pub use hasher::StringHasher;
pub use keygen::{generate_aes_key, GeneratedKey};
pub use registry::CryptoEngineRegistry;
pub use transit::{
    parse_key_version, ReqwestTransport, TransitTransport, TransportError, VaultAuth,
    VaultTransitEngine,
};

/// Encryption crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
