//! Set of usable crypto engines, built once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{CryptoEngine, DataEncryptionServiceConfiguration};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aes_cbc::AesCbcEngine;
use crate::transit::VaultTransitEngine;

/// Immutable lookup of configured engines by id.
#[derive(Clone)]
pub struct CryptoEngineRegistry {
    default_engine: Uuid,
    engines: BTreeMap<Uuid, Arc<dyn CryptoEngine>>,
}

impl std::fmt::Debug for CryptoEngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngineRegistry")
            .field("default_engine", &self.default_engine)
            .field("engines", &self.engines.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CryptoEngineRegistry {
    /// Keeps only the engines reporting themselves configured.
    pub fn new(default_engine: Uuid, candidates: Vec<Arc<dyn CryptoEngine>>) -> Self {
        let mut engines = BTreeMap::new();
        for engine in candidates {
            if engine.is_configured() {
                info!(
                    engine_id = %engine.engine_id(),
                    engine = engine.display_name(),
                    "crypto engine available"
                );
                engines.insert(engine.engine_id(), engine);
            } else {
                warn!(
                    engine_id = %engine.engine_id(),
                    engine = engine.display_name(),
                    "crypto engine not configured; excluded"
                );
            }
        }

        if !engines.contains_key(&default_engine) {
            warn!(engine_id = %default_engine, "default crypto engine is not available");
        }

        Self {
            default_engine,
            engines,
        }
    }

    /// Builds the built-in engines from configuration.
    pub fn from_config(config: &DataEncryptionServiceConfiguration) -> Self {
        let candidates: Vec<Arc<dyn CryptoEngine>> = vec![
            Arc::new(AesCbcEngine::from_config(&config.encryption)),
            Arc::new(VaultTransitEngine::from_config(config)),
        ];
        Self::new(config.encryption.default_engine, candidates)
    }

    pub fn default_engine_id(&self) -> Uuid {
        self.default_engine
    }

    pub fn default_engine(&self) -> Option<Arc<dyn CryptoEngine>> {
        self.get(self.default_engine)
    }

    pub fn get(&self, engine_id: Uuid) -> Option<Arc<dyn CryptoEngine>> {
        self.engines.get(&engine_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
