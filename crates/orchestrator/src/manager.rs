use std::collections::BTreeSet;
use std::sync::Arc;

use common::record::{param_str, param_u32};
use common::telemetry::{
    take_spans, Attributes, NoOpTelemetry, SpanList, SpanMeasure, TelemetryWarning,
    TracingTelemetry,
};
use common::{
    param, DataEncryptionServiceConfiguration, EncryptedItem, EncryptedRecord, ErrorCode,
    EventName, HashMethod, Parameters, ServiceError, StorageProvider, TelemetrySink, TextMap,
};
use encryption::{CryptoEngineRegistry, StringHasher};
use serde_json::Value;
use storage::StorageProviderRegistry;
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::messages::{
    DecryptResponse, DeleteResponse, EncryptRequest, EncryptResponse, EncryptedValue,
    LabeledItemSet, LabeledResult,
};

pub(crate) const ENGINE_UNAVAILABLE: &str =
    "Cannot access required encryption engine. Check the configuration.";
const COMMIT_FAILED: &str = "Failed to save the encrypted data.";
const DECRYPT_HAS_ERRORS: &str =
    "At least one of the labeled data value lists could not be decrypted.";
const DELETE_HAS_ERRORS: &str = "At least one of the labeled data value lists could not be deleted.";

/// Sequences encrypt, decrypt, delete and key rotation over the crypto
/// engines and the active storage provider.
///
/// Holds no per-request state; one instance serves concurrent callers.
#[derive(Clone)]
pub struct ProtectionOrchestrator {
    pub(crate) engines: Arc<CryptoEngineRegistry>,
    pub(crate) storage: Arc<dyn StorageProvider>,
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
    config: Arc<DataEncryptionServiceConfiguration>,
}

impl std::fmt::Debug for ProtectionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionOrchestrator")
            .field("engines", &self.engines)
            .field("storage", &self.storage.provider_id())
            .finish_non_exhaustive()
    }
}

/// Sink named by the telemetry configuration.
pub fn telemetry_from_config(config: &DataEncryptionServiceConfiguration) -> Arc<dyn TelemetrySink> {
    let wants_tracing = config
        .telemetry
        .sinks
        .iter()
        .any(|sink| sink.eq_ignore_ascii_case("tracing"));
    if wants_tracing {
        Arc::new(TracingTelemetry::new(config.telemetry.app_source_name.clone()))
    } else {
        Arc::new(NoOpTelemetry)
    }
}

impl ProtectionOrchestrator {
    /// Fails when the configured default hash method cannot be built.
    pub fn new(
        engines: Arc<CryptoEngineRegistry>,
        storage: Arc<dyn StorageProvider>,
        telemetry: Arc<dyn TelemetrySink>,
        config: Arc<DataEncryptionServiceConfiguration>,
    ) -> Result<Self> {
        StringHasher::new(
            config.hashing.default_hash,
            config.hashing.hash_key.as_deref(),
        )
        .map_err(|source| OrchestratorError::Hashing { source })?;

        Ok(Self {
            engines,
            storage,
            telemetry,
            config,
        })
    }

    /// Wires the built-in engines, storage providers and telemetry sink.
    pub fn from_config(config: DataEncryptionServiceConfiguration) -> Result<Self> {
        let engines = Arc::new(CryptoEngineRegistry::from_config(&config));
        let storage = StorageProviderRegistry::from_config(&config.storage)
            .active()
            .ok_or(OrchestratorError::StorageUnavailable(
                config.storage.storage_provider,
            ))?;
        let telemetry = telemetry_from_config(&config);
        Self::new(engines, storage, telemetry, Arc::new(config))
    }

    pub fn engines(&self) -> &CryptoEngineRegistry {
        &self.engines
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    /// Encrypts and stores one set of named values under a new label.
    ///
    /// Either the record is saved and its label returned, or nothing is
    /// returned at all; ciphertext never leaves without being committed.
    #[instrument(skip(self, request), fields(items = request.data.len()))]
    pub async fn encrypt(&self, request: EncryptRequest) -> EncryptResponse {
        let request_id = Uuid::new_v4().to_string();
        let spans = SpanList::default();
        let mut attributes = Attributes::new();

        let outcome = {
            let _total = SpanMeasure::start("Encrypt", &spans);
            self.encrypt_inner(&request, &mut attributes, &spans).await
        };

        let mut response = EncryptResponse {
            request_id: request_id.clone(),
            ..EncryptResponse::default()
        };
        match outcome {
            Ok((label, items)) => {
                info!(request_id = %request_id, label = %label, "data encrypted");
                response.label = Some(label);
                response.items = items;
            }
            Err(err) => {
                error!(request_id = %request_id, code = ?err.code, error = %err, "encrypt failed");
                attributes.insert("ErrorCode".into(), Value::from(err.code.as_u32()));
                self.telemetry
                    .raise_error(err.code, &err.message, &request_id)
                    .await;
                response.code = err.code;
                response.message = Some(err.message);
            }
        }

        self.telemetry
            .raise_event(
                EventName::DataEncryptCompleted,
                &request_id,
                take_spans(&spans),
                attributes,
            )
            .await;
        response
    }

    async fn encrypt_inner(
        &self,
        request: &EncryptRequest,
        attributes: &mut Attributes,
        spans: &SpanList,
    ) -> common::Result<(String, std::collections::BTreeMap<String, EncryptedValue>)> {
        let engine = self.engines.default_engine().ok_or_else(|| {
            ServiceError::new(ErrorCode::CryptoEngineNotAvailable, ENGINE_UNAVAILABLE)
        })?;
        attributes.insert("EngineId".into(), Value::from(engine.engine_id().to_string()));

        let parameters = if self.config.encryption.allow_request_parameters {
            request.parameters.as_ref()
        } else {
            if request.parameters.is_some() {
                debug!("request parameters ignored; not allowed by configuration");
            }
            None
        };

        let result = {
            let _engine = SpanMeasure::start_nested("EngineEncrypt", 2, spans);
            engine.encrypt(&request.data, parameters).await?
        };

        let hash_method = match request.hash_method {
            Some(method) if method != HashMethod::None => method,
            _ => self.config.hashing.default_hash,
        };
        let hasher = StringHasher::new(hash_method, self.config.hashing.hash_key.as_deref())?;

        let mut record = self.storage.allocate_new();
        record.engine_id = engine.engine_id();
        record.engine_request_id = result.request_id.clone();
        record.key_scope = param_str(Some(&result.parameters), param::KEY_SCOPE);
        record.key_name = param_str(Some(&result.parameters), param::KEY_NAME);
        record.key_version = param_u32(Some(&result.parameters), param::KEY_VERSION).unwrap_or(1);
        record.hash_method = hash_method;
        record.encryption_parameters = strip_key_coordinates(&result.parameters);
        record.tags = request.tags.clone();

        let mut items = std::collections::BTreeMap::new();
        for (name, cipher) in &result.data {
            let hash = match request.data.get(name) {
                Some(plain) => hasher.hash_base64(&plain.to_lowercase())?,
                None => None,
            };
            record.items.push(EncryptedItem {
                name: name.clone(),
                cipher: cipher.clone(),
                hash: hash.clone(),
            });
            items.insert(name.clone(), EncryptedValue { hash });
        }

        attributes.insert("DataLabel".into(), Value::from(record.label.clone()));
        attributes.insert(
            "EngineRequestId".into(),
            Value::from(record.engine_request_id.clone().unwrap_or_default()),
        );
        attributes.insert(
            "KeyScope".into(),
            Value::from(record.key_scope.clone().unwrap_or_default()),
        );
        attributes.insert(
            "KeyName".into(),
            Value::from(record.key_name.clone().unwrap_or_default()),
        );
        attributes.insert("KeyVersion".into(), Value::from(record.key_version));
        attributes.insert("HashMethod".into(), Value::from(hash_method.name()));
        if let Some(extra) = &record.encryption_parameters {
            attributes.insert(
                "Parameters".into(),
                Value::Object(extra.clone().into_iter().collect()),
            );
        }

        {
            let _save = SpanMeasure::start_nested("StorageSave", 2, spans);
            if let Err(err) = self.storage.save(&mut record).await {
                error!(label = %record.label, error = %err, "failed to save encrypted record");
                return Err(ServiceError::new(
                    ErrorCode::StorageCannotCommitValues,
                    COMMIT_FAILED,
                ));
            }
        }

        Ok((record.label, items))
    }

    /// Decrypts items from any number of labels. Per-label failures land in
    /// that label's result; siblings are still processed.
    #[instrument(skip(self, request), fields(sets = ?request.as_ref().map(Vec::len)))]
    pub async fn decrypt(&self, request: Option<Vec<LabeledItemSet>>) -> DecryptResponse {
        let request_id = Uuid::new_v4().to_string();
        let mut response = DecryptResponse {
            request_id: request_id.clone(),
            ..DecryptResponse::default()
        };

        let Some(sets) = request else {
            let err = ServiceError::new(
                ErrorCode::CryptoInvalidTaggedDataList,
                "The list of labeled data items is missing.",
            );
            warn!(request_id = %request_id, "decrypt called without a labeled data list");
            self.telemetry
                .raise_error(err.code, &err.message, &request_id)
                .await;
            response.code = err.code;
            response.message = Some(err.message);
            return response;
        };

        let spans = SpanList::default();
        let requests = coalesce(sets);
        {
            let _total = SpanMeasure::start("Decrypt", &spans);
            for request in &requests {
                let result = self.decrypt_label(request, &spans).await;
                response.results.push(result);
            }
        }

        let warnings: Vec<TelemetryWarning> = response
            .results
            .iter()
            .filter(|result| result.is_error())
            .map(|result| TelemetryWarning {
                key: result.label.clone(),
                code: result.code,
                message: result.message.clone().unwrap_or_default(),
            })
            .collect();
        if !warnings.is_empty() {
            response.has_errors = true;
            response.message = Some(DECRYPT_HAS_ERRORS.to_string());
            warn!(request_id = %request_id, failed = warnings.len(), "{DECRYPT_HAS_ERRORS}");
            self.telemetry
                .raise_warning(DECRYPT_HAS_ERRORS, warnings, &request_id)
                .await;
        }

        let mut attributes = Attributes::new();
        attributes.insert(
            "RequestedLabels".into(),
            Value::from(
                requests
                    .iter()
                    .map(|r| r.label.clone())
                    .collect::<Vec<_>>(),
            ),
        );
        self.telemetry
            .raise_event(
                EventName::DataDecryptCompleted,
                &request_id,
                take_spans(&spans),
                attributes,
            )
            .await;
        response
    }

    async fn decrypt_label(&self, request: &CoalescedRequest, spans: &SpanList) -> LabeledResult {
        let label = request.label.as_str();
        let record = {
            let _load = SpanMeasure::start_nested("StorageLoad", 2, spans);
            match self.storage.load_by_label(label).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    return LabeledResult::failure(
                        label,
                        ServiceError::new(
                            ErrorCode::StorageLabeledValuesNotFound,
                            format!("Labeled values [{label}] not found."),
                        ),
                    )
                }
                Err(err) => {
                    error!(label, error = %err, "failed to load labeled values");
                    return LabeledResult::failure(
                        label,
                        ServiceError::new(ErrorCode::StorageLabeledValuesFailedToLoad, err.message),
                    );
                }
            }
        };

        let Some(engine) = self.engines.get(record.engine_id) else {
            return LabeledResult::failure(
                label,
                ServiceError::new(ErrorCode::CryptoEngineNotAvailable, ENGINE_UNAVAILABLE),
            );
        };

        let selected = select_items(&record, request.items.as_ref());
        if selected.is_empty() {
            return LabeledResult::success(label, Some(TextMap::new()));
        }

        let _engine = SpanMeasure::start_nested("EngineDecrypt", 2, spans);
        let parameters = record.key_parameters();
        match engine.decrypt(&selected, Some(&parameters)).await {
            Ok(result) => LabeledResult::success(label, Some(result.data)),
            Err(err) => {
                warn!(label, code = ?err.code, error = %err, "engine failed to decrypt label");
                LabeledResult::failure(label, err)
            }
        }
    }

    /// Deletes every label independently.
    #[instrument(skip(self, labels), fields(labels = labels.len()))]
    pub async fn delete(&self, labels: Vec<String>) -> DeleteResponse {
        let request_id = Uuid::new_v4().to_string();
        let spans = SpanList::default();
        let mut response = DeleteResponse {
            request_id: request_id.clone(),
            ..DeleteResponse::default()
        };

        {
            let _total = SpanMeasure::start("Delete", &spans);
            for label in &labels {
                let result = match self.storage.delete_by_label(label).await {
                    Ok(true) => {
                        info!(label = %label, "labeled data deleted");
                        LabeledResult::success(label.clone(), None)
                    }
                    Ok(false) => LabeledResult::failure(
                        label.clone(),
                        ServiceError::new(
                            ErrorCode::StorageLabelNotFoundCannotDelete,
                            "Data label not found.",
                        ),
                    ),
                    Err(err) => {
                        error!(label = %label, error = %err, "failed to delete labeled data");
                        LabeledResult::failure(
                            label.clone(),
                            ServiceError::new(ErrorCode::StorageErrorDeletingData, err.message),
                        )
                    }
                };
                response.results.push(result);
            }
        }

        let warnings: Vec<TelemetryWarning> = response
            .results
            .iter()
            .filter(|result| result.is_error())
            .map(|result| TelemetryWarning {
                key: result.label.clone(),
                code: result.code,
                message: result.message.clone().unwrap_or_default(),
            })
            .collect();
        if !warnings.is_empty() {
            response.has_errors = true;
            response.message = Some(DELETE_HAS_ERRORS.to_string());
            self.telemetry
                .raise_warning(DELETE_HAS_ERRORS, warnings, &request_id)
                .await;
        }

        let mut attributes = Attributes::new();
        attributes.insert("Labels".into(), Value::from(labels));
        self.telemetry
            .raise_event(
                EventName::DataDeleteCompleted,
                &request_id,
                take_spans(&spans),
                attributes,
            )
            .await;
        response
    }
}

/// One label with the merged item selection; `None` selects every item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CoalescedRequest {
    pub label: String,
    pub items: Option<BTreeSet<String>>,
}

/// Merges repeated labels, keeping first-seen order. An empty selection
/// anywhere widens that label to all of its items.
pub(crate) fn coalesce(sets: Vec<LabeledItemSet>) -> Vec<CoalescedRequest> {
    let mut merged: Vec<CoalescedRequest> = Vec::new();
    for set in sets {
        let wanted = if set.items.is_empty() {
            None
        } else {
            Some(set.items)
        };
        match merged.iter_mut().find(|entry| entry.label == set.label) {
            Some(entry) => match (&mut entry.items, wanted) {
                (Some(existing), Some(more)) => existing.extend(more),
                (items, None) => *items = None,
                (None, Some(_)) => {}
            },
            None => merged.push(CoalescedRequest {
                label: set.label,
                items: wanted,
            }),
        }
    }
    merged
}

/// Resolves requested names to stored ciphers: case-insensitive name
/// first, then exact hash. Unmatched requests are dropped.
pub(crate) fn select_items(record: &EncryptedRecord, wanted: Option<&BTreeSet<String>>) -> TextMap {
    let Some(wanted) = wanted else {
        return record.cipher_map();
    };

    let mut selected = TextMap::new();
    for requested in wanted {
        let lowered = requested.to_lowercase();
        let by_name = record
            .items
            .iter()
            .find(|item| item.name.to_lowercase() == lowered);
        let item = by_name.or_else(|| {
            record.items.iter().find(|item| {
                item.hash
                    .as_deref()
                    .is_some_and(|hash| bool::from(hash.as_bytes().ct_eq(requested.as_bytes())))
            })
        });
        if let Some(item) = item {
            selected.insert(item.name.clone(), item.cipher.clone());
        }
    }
    selected
}

/// Drops the key coordinates from an engine parameter bag; `None` when
/// nothing else remains.
pub(crate) fn strip_key_coordinates(parameters: &Parameters) -> Option<Parameters> {
    let extra: Parameters = parameters
        .iter()
        .filter(|(key, _)| {
            !matches!(
                key.as_str(),
                param::KEY_SCOPE | param::KEY_NAME | param::KEY_VERSION
            )
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    (!extra.is_empty()).then_some(extra)
}
