use futures::future::BoxFuture;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;
use crate::record::{EncryptedRecord, Parameters, RecordFilter, TextMap};

/// Output of an engine encrypt or re-encrypt call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncryptionResult {
    /// Ciphertext keyed by item name.
    pub data: TextMap,
    /// Key coordinates the engine actually used.
    pub parameters: Parameters,
    /// Engine-side correlation id.
    pub request_id: Option<String>,
}

/// Output of an engine decrypt call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecryptionResult {
    pub data: TextMap,
}

/// Version window of a named key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyVersionInfo {
    pub current_version: u32,
    pub min_decryption_version: u32,
    pub min_encryption_version: u32,
}

/// Cryptographic backend.
///
/// Every map key passed to `encrypt` is the item's encryption context and
/// must be non-empty. `decrypt` receives the coordinates stored with the
/// record, never caller-supplied ones.
pub trait CryptoEngine: Send + Sync {
    fn engine_id(&self) -> Uuid;

    fn display_name(&self) -> &str;

    fn is_configured(&self) -> bool;

    fn encrypt<'a>(
        &'a self,
        clear_text: &'a TextMap,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, Result<EncryptionResult>>;

    fn decrypt<'a>(
        &'a self,
        cipher_text: &'a TextMap,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, Result<DecryptionResult>>;

    fn reencrypt<'a>(
        &'a self,
        cipher_text: &'a TextMap,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, Result<EncryptionResult>>;

    fn rotate_key<'a>(
        &'a self,
        key_name: &'a str,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, Result<()>>;

    fn key_version_info<'a>(
        &'a self,
        key_name: &'a str,
        key_scope: &'a str,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, Result<KeyVersionInfo>>;
}

/// Persistence backend for encrypted records.
pub trait StorageProvider: Send + Sync {
    fn provider_id(&self) -> Uuid;

    fn display_name(&self) -> &str;

    fn is_configured(&self) -> bool;

    /// New record with a freshly minted label and no items.
    fn allocate_new(&self) -> EncryptedRecord {
        EncryptedRecord::new()
    }

    /// Inserts when `record.id` is unset, updates otherwise. Stamps
    /// `encrypted_on` on every save and `created_on` on insert only.
    fn save<'a>(&'a self, record: &'a mut EncryptedRecord) -> BoxFuture<'a, Result<()>>;

    fn load_by_label<'a>(&'a self, label: &'a str)
        -> BoxFuture<'a, Result<Option<EncryptedRecord>>>;

    fn delete_by_label<'a>(&'a self, label: &'a str) -> BoxFuture<'a, Result<bool>>;

    /// Finite, insertion-ordered sequence of matching records.
    fn enumerate(&self, filter: RecordFilter) -> BoxStream<'_, Result<EncryptedRecord>>;
}
