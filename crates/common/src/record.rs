use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::hash_method::HashMethod;

/// Engine-specific parameter bag (key scope, name, version and extras).
pub type Parameters = BTreeMap<String, Value>;

/// Values keyed by item name; plaintext or ciphertext depending on context.
pub type TextMap = BTreeMap<String, String>;

/// Well-known parameter names understood by every engine.
pub mod param {
    pub const KEY_SCOPE: &str = "KeyScope";
    pub const KEY_NAME: &str = "KeyName";
    pub const KEY_VERSION: &str = "KeyVersion";
    pub const HASH_METHOD: &str = "HashMethod";
}

/// Reads a string parameter, accepting numbers as their decimal text.
pub fn param_str(parameters: Option<&Parameters>, name: &str) -> Option<String> {
    match parameters?.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads an unsigned parameter, accepting numeric strings.
pub fn param_u32(parameters: Option<&Parameters>, name: &str) -> Option<u32> {
    match parameters?.get(name)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One encrypted field of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedItem {
    pub name: String,
    pub cipher: String,
    pub hash: Option<String>,
}

/// Persisted unit addressed by its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Storage-assigned identity; `None` until the first save.
    #[serde(default)]
    pub id: Option<u64>,
    pub label: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_on: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub encrypted_on: Option<OffsetDateTime>,
    pub engine_id: Uuid,
    #[serde(default)]
    pub engine_request_id: Option<String>,
    #[serde(default)]
    pub key_scope: Option<String>,
    #[serde(default)]
    pub key_name: Option<String>,
    #[serde(default)]
    pub key_version: u32,
    pub hash_method: HashMethod,
    #[serde(default)]
    pub encryption_parameters: Option<Parameters>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub items: Vec<EncryptedItem>,
}

impl EncryptedRecord {
    /// Fresh record with a newly minted label and no items.
    pub fn new() -> Self {
        Self::with_label(Uuid::new_v4().simple().to_string())
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
            created_on: None,
            encrypted_on: None,
            engine_id: Uuid::nil(),
            engine_request_id: None,
            key_scope: None,
            key_name: None,
            key_version: 0,
            hash_method: HashMethod::None,
            encryption_parameters: None,
            tags: BTreeSet::new(),
            items: Vec::new(),
        }
    }

    /// Item ciphers keyed by name, as handed to an engine.
    pub fn cipher_map(&self) -> TextMap {
        self.items
            .iter()
            .map(|item| (item.name.clone(), item.cipher.clone()))
            .collect()
    }

    /// Key coordinates of the stored record as an engine parameter bag.
    pub fn key_parameters(&self) -> Parameters {
        let mut params = self.encryption_parameters.clone().unwrap_or_default();
        if let Some(scope) = &self.key_scope {
            params.insert(param::KEY_SCOPE.to_string(), Value::from(scope.clone()));
        }
        if let Some(name) = &self.key_name {
            params.insert(param::KEY_NAME.to_string(), Value::from(name.clone()));
        }
        params.insert(param::KEY_VERSION.to_string(), Value::from(self.key_version));
        params
    }
}

impl Default for EncryptedRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Predicates for [`crate::traits::StorageProvider::enumerate`].
///
/// `starting_after_label` is resolved before anything else; an unknown
/// label yields an empty sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub starting_after_label: Option<String>,
    pub engine_id: Option<Uuid>,
    pub key_name: Option<String>,
    pub key_scope: Option<String>,
    pub key_version_at_most: Option<u32>,
    pub encrypted_on_or_after: Option<OffsetDateTime>,
}

impl RecordFilter {
    /// Applies every predicate except the cursor.
    pub fn matches(&self, record: &EncryptedRecord) -> bool {
        if let Some(engine_id) = self.engine_id {
            if record.engine_id != engine_id {
                return false;
            }
        }
        if let Some(name) = self.key_name.as_deref().filter(|n| !n.is_empty()) {
            if record.key_name.as_deref() != Some(name) {
                return false;
            }
        }
        if let Some(scope) = self.key_scope.as_deref().filter(|s| !s.is_empty()) {
            if record.key_scope.as_deref() != Some(scope) {
                return false;
            }
        }
        if let Some(version) = self.key_version_at_most {
            if record.key_version > version {
                return false;
            }
        }
        if let Some(floor) = self.encrypted_on_or_after {
            match record.encrypted_on {
                Some(encrypted_on) if encrypted_on >= floor => {}
                _ => return false,
            }
        }
        true
    }
}
