//! JSON-file provider.
//!
//! The whole table lives in memory and is rewritten to disk after every
//! mutation: serialized to a sibling temp file, then renamed over the
//! target. A mutation only becomes visible once its file write succeeded.
//! Writers queue on an async gate and the file I/O runs on the blocking
//! pool, so the executor never waits on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use common::{well_known, EncryptedRecord, RecordFilter, ServiceError, StorageProvider};
use futures::future::{self, BoxFuture};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::table::{self, now_utc_seconds, RecordTable, SharedTable};

#[derive(Clone)]
pub struct FileStorageProvider {
    path: PathBuf,
    inner: SharedTable,
    writer: Arc<AsyncMutex<()>>,
}

impl std::fmt::Debug for FileStorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorageProvider")
            .field("path", &self.path)
            .finish()
    }
}

impl FileStorageProvider {
    /// Loads `path` if it exists; otherwise starts empty and creates the
    /// file on the first save.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = if path.exists() {
            let data = fs::read_to_string(&path).map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<RecordTable>(&data).map_err(|source| StorageError::Corrupt {
                path: path.clone(),
                source,
            })?
        } else {
            RecordTable::default()
        };
        info!(path = %path.display(), records = table.len(), "opened storage file");

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(table)),
            writer: Arc::new(AsyncMutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `change` to a copy of the table, persists the copy and only
    /// then publishes it. Readers keep seeing the previous table meanwhile.
    async fn mutate<T>(&self, change: impl FnOnce(&mut RecordTable) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock().await;
        let mut staged = table::lock(&self.inner)?.clone();
        let outcome = change(&mut staged)?;

        let path = self.path.clone();
        let staged = task::spawn_blocking(move || {
            write_atomically(&path, &staged)?;
            Ok::<_, StorageError>(staged)
        })
        .await
            .map_err(|err| StorageError::Background(err.to_string()))??;

        *table::lock(&self.inner)? = staged;
        Ok(outcome)
    }
}

fn write_atomically(path: &Path, table: &RecordTable) -> Result<()> {
    let json = serde_json::to_string_pretty(table)?;
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    debug!(path = %path.display(), records = table.len(), "storage file written");
    Ok(())
}

impl StorageProvider for FileStorageProvider {
    fn provider_id(&self) -> Uuid {
        well_known::FILE_PROVIDER_ID
    }

    fn display_name(&self) -> &str {
        well_known::FILE_PROVIDER_NAME
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn save<'a>(&'a self, record: &'a mut EncryptedRecord) -> BoxFuture<'a, common::Result<()>> {
        Box::pin(async move {
            let now = now_utc_seconds();
            let mut working = record.clone();
            self.mutate(|table| table.save(&mut working, now))
                .await
                .map_err(ServiceError::from)?;
            *record = working;
            Ok(())
        })
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
        Box::pin(async move {
            let known = table::lock(&self.inner)
                .map(|guard| guard.id_of_label(label).is_some())
                .map_err(ServiceError::from)?;
            if !known {
                return Ok(false);
            }
            self.mutate(|table| Ok(table.delete(label)))
                .await
                .map_err(ServiceError::from)
        })
    }

    fn enumerate(&self, filter: RecordFilter) -> BoxStream<'_, common::Result<EncryptedRecord>> {
        table::enumerate(Arc::clone(&self.inner), filter)
            .map(|item| item.map_err(ServiceError::from))
            .boxed()
    }
}
