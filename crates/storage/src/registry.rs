use std::sync::Arc;

use common::config::StorageConfig;
use common::{well_known, StorageProvider};
use tracing::{error, info};
use uuid::Uuid;

use crate::file::FileStorageProvider;
use crate::memory::InMemoryStorageProvider;

/// Picks the single active storage provider.
#[derive(Clone)]
pub struct StorageProviderRegistry {
    active: Option<Arc<dyn StorageProvider>>,
}

impl std::fmt::Debug for StorageProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageProviderRegistry")
            .field("active", &self.active.as_ref().map(|p| p.provider_id()))
            .finish()
    }
}

impl StorageProviderRegistry {
    /// Selects the configured provider among `providers`; it must also
    /// report itself configured.
    pub fn new(config: &StorageConfig, providers: Vec<Arc<dyn StorageProvider>>) -> Self {
        let wanted = config.storage_provider;
        let active = providers
            .into_iter()
            .find(|p| p.provider_id() == wanted && p.is_configured());

        match &active {
            Some(provider) => info!(
                provider_id = %wanted,
                provider = provider.display_name(),
                "storage provider selected"
            ),
            None => error!(
                provider_id = %wanted,
                provider = well_known::storage_provider_name(wanted).unwrap_or("unknown"),
                "configured storage provider is not available"
            ),
        }

        Self { active }
    }

    /// Builds the built-in providers. The file provider is only offered
    /// when a path is configured and the file opens.
    pub fn from_config(config: &StorageConfig) -> Self {
        let mut providers: Vec<Arc<dyn StorageProvider>> =
            vec![Arc::new(InMemoryStorageProvider::new())];

        if config.storage_provider == well_known::FILE_PROVIDER_ID {
            match config.file_path.as_deref() {
                Some(path) => match FileStorageProvider::open(path) {
                    Ok(provider) => providers.push(Arc::new(provider)),
                    Err(err) => error!(error = %err, "cannot open storage file"),
                },
                None => error!("file storage selected but no file_path configured"),
            }
        }

        Self::new(config, providers)
    }

    pub fn active(&self) -> Option<Arc<dyn StorageProvider>> {
        self.active.clone()
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active.as_ref().map(|p| p.provider_id())
    }
}
