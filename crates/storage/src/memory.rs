use std::sync::Arc;

use common::{well_known, EncryptedRecord, RecordFilter, ServiceError, StorageProvider};
use futures::future::{self, BoxFuture};
use futures::stream::{BoxStream, StreamExt};
use uuid::Uuid;

use crate::table::{self, now_utc_seconds, SharedTable};

/// Process-local provider. Contents vanish with the process.
#[derive(Clone, Default)]
pub struct InMemoryStorageProvider {
    inner: SharedTable,
}

impl InMemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        table::lock(&self.inner).map(|t| t.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for InMemoryStorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorageProvider")
            .field("records", &self.len())
            .finish()
    }
}

impl StorageProvider for InMemoryStorageProvider {
    fn provider_id(&self) -> Uuid {
        well_known::IN_MEMORY_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        well_known::IN_MEMORY_PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn save<'a>(&'a self, record: &'a mut EncryptedRecord) -> BoxFuture<'a, common::Result<()>> {
        let result = table::lock(&self.inner)
            .and_then(|mut guard| guard.save(record, now_utc_seconds()))
            .map_err(ServiceError::from);
        Box::pin(future::ready(result))
    }

    fn load_by_label<'a>(
        &'a self,
        label: &'a str,
    ) -> BoxFuture<'a, common::Result<Option<EncryptedRecord>>> {
        let result = table::lock(&self.inner)
            .map(|guard| guard.load(label))
            .map_err(ServiceError::from);
        Box::pin(future::ready(result))
    }

    fn delete_by_label<'a>(&'a self, label: &'a str) -> BoxFuture<'a, common::Result<bool>> {
        let result = table::lock(&self.inner)
            .map(|mut guard| guard.delete(label))
            .map_err(ServiceError::from);
        Box::pin(future::ready(result))
    }

    fn enumerate(&self, filter: RecordFilter) -> BoxStream<'_, common::Result<EncryptedRecord>> {
        table::enumerate(Arc::clone(&self.inner), filter)
            .map(|item| item.map_err(ServiceError::from))
            .boxed()
    }
}
