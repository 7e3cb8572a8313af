use common::ServiceError;
use thiserror::Error;
use uuid::Uuid;

/// Failures while assembling an orchestrator from configuration.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No configured storage provider matches the requested id.
    #[error("storage provider {0} is not available")]
    StorageUnavailable(Uuid),

    /// The default hash method cannot be used as configured.
    #[error("invalid hashing configuration: {source}")]
    Hashing {
        #[source]
        source: ServiceError,
    },
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
