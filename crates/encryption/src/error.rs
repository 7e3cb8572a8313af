use common::{ErrorCode, ServiceError};
use thiserror::Error;

/// Engine-internal failures.
///
/// Messages name the failing item or key but never include key material
/// or plaintext. Every variant maps onto an [`ErrorCode`] when it leaves
/// the engine.
#[derive(Error, Debug)]
pub enum EncryptionError {
    /// Key material errors
    #[error("Invalid key length: expected one of {expected:?}, got {actual}")]
    InvalidKeyLength {
        expected: &'static [usize],
        actual: usize,
    },

    #[error("Invalid IV length: expected {expected}, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("Invalid base64 in {what}: {source}")]
    InvalidBase64 {
        what: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Missing key material: {0}")]
    MissingKeyMaterial(String),

    /// Encryption/Decryption errors
    #[error("Encryption context not set: item names must not be empty")]
    EmptyContext,

    #[error("Decryption failed for item '{0}'")]
    DecryptionFailed(String),

    #[error("Decrypted value of item '{0}' is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("Unrecognized ciphertext format for item '{0}'")]
    InvalidCiphertext(String),

    /// Remote service errors
    #[error("Unexpected response from transit service: {0}")]
    UnexpectedResponse(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type alias for engine internals
pub type Result<T> = std::result::Result<T, EncryptionError>;

impl EncryptionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            EncryptionError::InvalidKeyLength { .. }
            | EncryptionError::InvalidIvLength { .. }
            | EncryptionError::InvalidBase64 { .. } => ErrorCode::CryptoInvalidConfiguration,
            EncryptionError::MissingKeyMaterial(_) => ErrorCode::CryptoMissingConfiguration,
            EncryptionError::EmptyContext => ErrorCode::CryptoEncryptionContextNotSet,
            EncryptionError::DecryptionFailed(_)
            | EncryptionError::InvalidUtf8(_)
            | EncryptionError::InvalidCiphertext(_)
            | EncryptionError::UnexpectedResponse(_)
            | EncryptionError::SerializationError(_) => ErrorCode::CryptoUndefinedError,
        }
    }
}

impl From<EncryptionError> for ServiceError {
    fn from(err: EncryptionError) -> Self {
        ServiceError::new(err.code(), err.to_string())
    }
}
