//! Request and response shapes of the protection operations.
//!
//! Every response carries a top-level `code`/`message`; batch responses
//! add `has_errors` plus per-label detail. Callers check both.

use std::collections::{BTreeMap, BTreeSet};

use common::{ErrorCode, HashMethod, Parameters, ServiceError, TextMap};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptRequest {
    /// Plaintext keyed by item name.
    pub data: TextMap,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Overrides the configured hash method unless `None`.
    #[serde(default)]
    pub hash_method: Option<HashMethod>,
    /// Engine parameters; ignored unless the service allows them.
    #[serde(default)]
    pub parameters: Option<Parameters>,
}

impl EncryptRequest {
    pub fn new(data: TextMap) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

/// Per-item result of an encryption. The ciphertext stays in storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptResponse {
    pub request_id: String,
    pub code: ErrorCode,
    pub message: Option<String>,
    pub label: Option<String>,
    pub items: BTreeMap<String, EncryptedValue>,
}

impl EncryptResponse {
    pub fn is_success(&self) -> bool {
        self.code.is_none()
    }
}

/// Items wanted from one label. An empty set means every item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledItemSet {
    pub label: String,
    /// Item names or item hashes.
    #[serde(default)]
    pub items: BTreeSet<String>,
}

impl LabeledItemSet {
    pub fn new<I, S>(label: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            items: items.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all(label: impl Into<String>) -> Self {
        Self::new(label, Vec::<String>::new())
    }
}

/// Outcome for one label of a decrypt or delete batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabeledResult {
    pub label: String,
    pub code: ErrorCode,
    pub message: Option<String>,
    /// Clear text by item name; decrypt only.
    pub data: Option<TextMap>,
}

impl LabeledResult {
    pub fn success(label: impl Into<String>, data: Option<TextMap>) -> Self {
        Self {
            label: label.into(),
            data,
            ..Self::default()
        }
    }

    pub fn failure(label: impl Into<String>, err: ServiceError) -> Self {
        Self {
            label: label.into(),
            code: err.code,
            message: Some(err.message),
            data: None,
        }
    }

    pub fn is_error(&self) -> bool {
        !self.code.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecryptResponse {
    pub request_id: String,
    pub code: ErrorCode,
    pub message: Option<String>,
    pub has_errors: bool,
    pub results: Vec<LabeledResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub request_id: String,
    pub code: ErrorCode,
    pub message: Option<String>,
    pub has_errors: bool,
    pub results: Vec<LabeledResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RotateKeyRequest {
    /// Defaults to the Vault transit engine.
    #[serde(default)]
    pub engine_id: Option<Uuid>,
    pub key_name: String,
    pub key_scope: String,
    /// Resume after this label.
    #[serde(default)]
    pub starting_after_label: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub encrypted_on_or_after: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RotateKeyResponse {
    pub request_id: String,
    pub code: ErrorCode,
    pub message: Option<String>,
    /// Records handed to the engine.
    pub processed: u64,
    /// Records re-encrypted and saved.
    pub reencrypted: u64,
    pub failed: u64,
    /// Last label attempted; the cursor for a resumed run.
    pub last_label: Option<String>,
    pub has_warnings: bool,
    pub cancelled: bool,
}

/// Progress notification: label, key version before the attempt, outcome.
pub type ProgressCallback<'a> = dyn Fn(&str, u32, ErrorCode, &str) + Send + Sync + 'a;
