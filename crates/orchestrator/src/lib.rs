//! # Protection orchestrator
//!
//! Composes the crypto engine registry, the active storage provider and a
//! telemetry sink into the four protection operations:
//!
//! - `encrypt`: engine encrypt, lookup hashes, one committed record per call
//! - `decrypt`: coalesced per-label lookups bound to each record's own engine
//! - `delete`: independent per-label deletes
//! - `rotate_key`: resumable, cancellable re-encryption after a key rotation

pub mod error;
pub mod messages;
pub mod manager;
pub mod rotation;

pub use error::{OrchestratorError, Result};
pub use messages::{
    DecryptResponse, DeleteResponse, EncryptRequest, EncryptResponse, EncryptedValue,
    LabeledItemSet, LabeledResult, ProgressCallback, RotateKeyRequest, RotateKeyResponse,
};
pub use manager::{telemetry_from_config, ProtectionOrchestrator};
pub use rotation::supports_rotation;
pub use tokio_util::sync::CancellationToken;
