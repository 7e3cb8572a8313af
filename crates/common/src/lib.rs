//! Shared vocabulary of the data encryption service: error taxonomy,
//! hashing methods, persisted record model, configuration, telemetry and
//! the engine/storage plugin contracts.

pub mod config;
pub mod error;
pub mod hash_method;
pub mod record;
pub mod telemetry;
pub mod traits;

pub use config::DataEncryptionServiceConfiguration;
pub use error::{ErrorCode, ErrorGroup, Result, ServiceError};
pub use hash_method::HashMethod;
pub use record::{param, EncryptedItem, EncryptedRecord, Parameters, RecordFilter, TextMap};
pub use telemetry::{EventName, TelemetrySink};
pub use traits::{CryptoEngine, DecryptionResult, EncryptionResult, KeyVersionInfo, StorageProvider};

/// Stable identities of engines and storage providers.
pub mod well_known {
    use uuid::Uuid;

    pub const AES_ENGINE_ID: Uuid = Uuid::from_u128(0xc87aa1e4_5f97_4a33_8d5a_798835dcb7b1);
    pub const AES_ENGINE_NAME: &str = "AES-CBC Local Crypto Engine";

    pub const VAULT_TRANSIT_ENGINE_ID: Uuid =
        Uuid::from_u128(0x519c0525_e5d0_408f_8540_dae11c1563c3);
    pub const VAULT_TRANSIT_ENGINE_NAME: &str = "Vault Transit Crypto Engine";

    pub const IN_MEMORY_PROVIDER_ID: Uuid = Uuid::from_u128(0xff000000_0000_0000_0000_000000000001);
    pub const IN_MEMORY_PROVIDER_NAME: &str = "In-Memory Storage Provider";

    pub const FILE_PROVIDER_ID: Uuid = Uuid::from_u128(0xff000000_0000_0000_0000_000000000002);
    pub const FILE_PROVIDER_NAME: &str = "JSON File Storage Provider";

    pub const MONGODB_PROVIDER_ID: Uuid = Uuid::from_u128(0x1ca9c449_7d86_40fe_ab7b_49525113773e);
    pub const MYSQL_PROVIDER_ID: Uuid = Uuid::from_u128(0x3240baaf_19f3_4d01_b580_604694faf904);
    pub const MSSQL_PROVIDER_ID: Uuid = Uuid::from_u128(0x044a4917_a96f_4b00_b60e_bc100ccbdb92);
    pub const POSTGRESQL_PROVIDER_ID: Uuid =
        Uuid::from_u128(0xab9264c9_2d2b_4010_abbe_36e832633a97);

    const PROVIDER_NAMES: [(Uuid, &str); 6] = [
        (IN_MEMORY_PROVIDER_ID, IN_MEMORY_PROVIDER_NAME),
        (FILE_PROVIDER_ID, FILE_PROVIDER_NAME),
        (MONGODB_PROVIDER_ID, "MongoDB Storage Provider"),
        (MYSQL_PROVIDER_ID, "MySql Storage Provider"),
        (MSSQL_PROVIDER_ID, "Microsoft SQL Server Storage Provider"),
        (POSTGRESQL_PROVIDER_ID, "PostgreSQL Storage Provider"),
    ];

    /// Display name of a known storage provider id.
    pub fn storage_provider_name(id: Uuid) -> Option<&'static str> {
        PROVIDER_NAMES
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, name)| *name)
    }
}
