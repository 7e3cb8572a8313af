//! Service configuration.
//!
//! A single immutable snapshot is built at startup: file first (TOML, YAML
//! or JSON by extension), then the `DES_*` environment overlay. Nothing
//! reloads it mid-operation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorCode, Result, ServiceError};
use crate::hash_method::HashMethod;
use crate::well_known;

/// Environment variables recognized by [`DataEncryptionServiceConfiguration::apply_env`].
pub mod env {
    pub const VAULT_SERVER_URL: &str = "DES_VAULT_SERVER_URL";
    pub const VAULT_AUTH_METHOD: &str = "DES_VAULT_AUTH_METHOD";
    pub const VAULT_AUTH_APPROLE_ROLE_ID: &str = "DES_VAULT_AUTH_APPROLE_ROLEID";
    pub const VAULT_AUTH_APPROLE_SECRET_ID: &str = "DES_VAULT_AUTH_APPROLE_SECRETID";
    pub const VAULT_AUTH_TOKEN: &str = "DES_VAULT_AUTH_TOKEN";
    pub const VAULT_AUTH_USERNAME: &str = "DES_VAULT_AUTH_USERNAME";
    pub const VAULT_AUTH_PASSWORD: &str = "DES_VAULT_AUTH_PASSWORD";
    pub const VAULT_ENCRYPTION_KEY: &str = "DES_VAULT_ENCRYPTION_KEY";
    pub const VAULT_ENCRYPTION_MOUNT_POINT: &str = "DES_VAULT_ENCRYPTION_MOUNTPOINT";
    pub const STORAGE_PROVIDER: &str = "DES_STORAGE_PROVIDER";
    pub const STORAGE_FILE_PATH: &str = "DES_STORAGE_FILE_PATH";
    pub const HASHING_METHOD: &str = "DES_HASHING_METHOD";
    pub const ENCRYPTION_ENGINE_ID: &str = "DES_ENCRYPTION_ENGINEID";
}

/// Keys of the Vault parameter map.
pub mod vault_param {
    pub const DEFAULT_KEY_NAME: &str = "DefaultKeyName";
    pub const DEFAULT_MOUNT_POINT: &str = "DefaultMountPoint";
    pub const TOKEN: &str = "Token";
    pub const USER_NAME: &str = "UserName";
    pub const PASSWORD: &str = "Password";
    pub const ROLE_ID: &str = "RoleId";
    pub const SECRET_ID: &str = "SecretId";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataEncryptionServiceConfiguration {
    pub hashing: HashingConfig,
    pub encryption: EncryptionConfig,
    pub storage: StorageConfig,
    pub vault_service: VaultServiceConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingConfig {
    pub default_hash: HashMethod,
    pub hash_key: Option<String>,
}

impl fmt::Debug for HashingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashingConfig")
            .field("default_hash", &self.default_hash)
            .field("hash_key", &self.hash_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub allow_request_parameters: bool,
    pub default_engine: Uuid,
    /// Active key name per engine id.
    pub active_keys: BTreeMap<String, String>,
    pub key_configurations: Vec<KeyConfiguration>,
    pub engine_configurations: Vec<EngineConfiguration>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            allow_request_parameters: false,
            default_engine: well_known::AES_ENGINE_ID,
            active_keys: BTreeMap::new(),
            key_configurations: Vec::new(),
            engine_configurations: Vec::new(),
        }
    }
}

impl EncryptionConfig {
    pub fn active_key_name(&self, engine_id: Uuid) -> Option<&str> {
        self.active_keys
            .iter()
            .find(|(id, _)| Uuid::parse_str(id).map(|id| id == engine_id).unwrap_or(false))
            .map(|(_, name)| name.as_str())
    }

    pub fn key_configuration(&self, name: &str) -> Option<&KeyConfiguration> {
        self.key_configurations.iter().find(|key| key.name == name)
    }

    pub fn engine_parameters(&self, engine_id: Uuid) -> Option<&BTreeMap<String, String>> {
        self.engine_configurations
            .iter()
            .find(|engine| engine.engine_id == engine_id)
            .map(|engine| &engine.parameters)
    }

    fn engine_parameters_mut(&mut self, engine_id: Uuid) -> &mut BTreeMap<String, String> {
        let index = match self
            .engine_configurations
            .iter()
            .position(|engine| engine.engine_id == engine_id)
        {
            Some(index) => index,
            None => {
                self.engine_configurations.push(EngineConfiguration {
                    engine_id,
                    parameters: BTreeMap::new(),
                });
                self.engine_configurations.len() - 1
            }
        };
        &mut self.engine_configurations[index].parameters
    }
}

/// Named symmetric key material, base64 encoded.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfiguration {
    pub name: String,
    pub key: String,
    pub iv: String,
}

impl fmt::Debug for KeyConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyConfiguration")
            .field("name", &self.name)
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    pub engine_id: Uuid,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub storage_provider: Uuid,
    pub file_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_provider: well_known::IN_MEMORY_PROVIDER_ID,
            file_path: None,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultServiceConfig {
    pub service_url: Option<String>,
    pub auth_method: Option<String>,
    /// Seconds; zero keeps the client default.
    pub api_timeout: u64,
    pub parameters: BTreeMap<String, String>,
}

impl VaultServiceConfig {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

impl fmt::Debug for VaultServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&String> = self.parameters.keys().collect();
        f.debug_struct("VaultServiceConfig")
            .field("service_url", &self.service_url)
            .field("auth_method", &self.auth_method)
            .field("api_timeout", &self.api_timeout)
            .field("parameters", &names)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub app_source_name: String,
    pub sinks: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            app_source_name: "data-encryption-service".to_string(),
            sinks: vec!["tracing".to_string()],
        }
    }
}

impl DataEncryptionServiceConfiguration {
    /// Parses a configuration file, choosing the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            ServiceError::new(
                ErrorCode::GenericMissingConfiguration,
                format!("cannot read configuration {}: {err}", path.display()),
            )
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let parsed = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&text).map_err(|err| err.to_string()),
            "json" => serde_json::from_str(&text).map_err(|err| err.to_string()),
            _ => toml::from_str(&text).map_err(|err| err.to_string()),
        };

        parsed.map_err(|err| {
            ServiceError::invalid_configuration(format!(
                "invalid configuration {}: {err}",
                path.display()
            ))
        })
    }

    /// Overlays values from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overlays values from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(url) = get(env::VAULT_SERVER_URL) {
            self.vault_service.service_url = Some(url);
        }
        if let Some(method) = get(env::VAULT_AUTH_METHOD) {
            self.vault_service.auth_method = Some(method);
        }

        let vault_params = [
            (env::VAULT_AUTH_TOKEN, vault_param::TOKEN),
            (env::VAULT_AUTH_USERNAME, vault_param::USER_NAME),
            (env::VAULT_AUTH_PASSWORD, vault_param::PASSWORD),
            (env::VAULT_AUTH_APPROLE_ROLE_ID, vault_param::ROLE_ID),
            (env::VAULT_AUTH_APPROLE_SECRET_ID, vault_param::SECRET_ID),
        ];
        for (var, param) in vault_params {
            if let Some(value) = get(var) {
                self.vault_service.parameters.insert(param.to_string(), value);
            }
        }

        let engine_params = [
            (env::VAULT_ENCRYPTION_KEY, vault_param::DEFAULT_KEY_NAME),
            (env::VAULT_ENCRYPTION_MOUNT_POINT, vault_param::DEFAULT_MOUNT_POINT),
        ];
        for (var, param) in engine_params {
            if let Some(value) = get(var) {
                self.encryption
                    .engine_parameters_mut(well_known::VAULT_TRANSIT_ENGINE_ID)
                    .insert(param.to_string(), value);
            }
        }

        if let Some(value) = get(env::STORAGE_PROVIDER) {
            self.storage.storage_provider = parse_uuid(env::STORAGE_PROVIDER, &value)?;
        }
        if let Some(value) = get(env::STORAGE_FILE_PATH) {
            self.storage.file_path = Some(PathBuf::from(value));
        }
        if let Some(value) = get(env::HASHING_METHOD) {
            self.hashing.default_hash = value.parse().map_err(|err: String| {
                ServiceError::invalid_configuration(format!("{}: {err}", env::HASHING_METHOD))
            })?;
        }
        if let Some(value) = get(env::ENCRYPTION_ENGINE_ID) {
            self.encryption.default_engine = parse_uuid(env::ENCRYPTION_ENGINE_ID, &value)?;
        }

        debug!(
            default_engine = %self.encryption.default_engine,
            storage_provider = %self.storage.storage_provider,
            default_hash = %self.hashing.default_hash,
            "applied environment overlay"
        );
        Ok(())
    }

    /// File (if any) plus environment overlay.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }
}

fn parse_uuid(var: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|err| {
        ServiceError::invalid_configuration(format!("{var} is not a valid UUID: {err}"))
    })
}
