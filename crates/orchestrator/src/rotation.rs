//! Key rotation: re-encrypt stored records under the newest key version.
//!
//! One forward pass over the storage enumeration, a record at a time, in
//! insertion order. Every re-encrypted record is saved before the next
//! one is touched, so an interrupted run resumes from `last_label`.

use std::panic::{self, AssertUnwindSafe};

use common::telemetry::{take_spans, Attributes, SpanList, SpanMeasure, TelemetryWarning};
use common::{well_known, EncryptedRecord, ErrorCode, EventName, RecordFilter, ServiceError};
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::manager::{ProtectionOrchestrator, ENGINE_UNAVAILABLE};
use crate::messages::{ProgressCallback, RotateKeyRequest, RotateKeyResponse};

const NOT_SUPPORTED: &str = "Key rotation and re-encryption not supported by the specified engine.";

/// Engines whose keys carry versions.
pub fn supports_rotation(engine_id: Uuid) -> bool {
    engine_id == well_known::VAULT_TRANSIT_ENGINE_ID
}

/// Result of one record's re-encryption attempt.
struct Attempt {
    code: ErrorCode,
    message: String,
    saved: bool,
    commit_failed: bool,
}

impl ProtectionOrchestrator {
    /// Re-encrypts every record of `key_scope`/`key_name` that is older
    /// than the key's current version.
    ///
    /// `cancel` is checked after each record; records already processed
    /// stay committed. `progress` sees every attempted record, and a
    /// panicking callback is logged and ignored.
    #[instrument(
        skip(self, request, progress, cancel),
        fields(engine_id = ?request.engine_id, key_scope = %request.key_scope, key_name = %request.key_name)
    )]
    pub async fn rotate_key(
        &self,
        request: RotateKeyRequest,
        progress: Option<&ProgressCallback<'_>>,
        cancel: &CancellationToken,
    ) -> RotateKeyResponse {
        let request_id = Uuid::new_v4().to_string();
        let spans = SpanList::default();
        let engine_id = request
            .engine_id
            .unwrap_or(well_known::VAULT_TRANSIT_ENGINE_ID);

        let mut response = RotateKeyResponse {
            request_id: request_id.clone(),
            ..RotateKeyResponse::default()
        };
        let mut attributes = Attributes::new();
        attributes.insert("EngineId".into(), Value::from(engine_id.to_string()));
        attributes.insert("KeyScope".into(), Value::from(request.key_scope.clone()));
        attributes.insert("KeyName".into(), Value::from(request.key_name.clone()));

        let mut warnings = Vec::new();
        let outcome = {
            let _total = SpanMeasure::start("RotateKey", &spans);
            self.rotate_inner(
                engine_id,
                &request,
                progress,
                cancel,
                &mut response,
                &mut warnings,
                &spans,
            )
            .await
        };

        if let Err(err) = outcome {
            error!(request_id = %request_id, code = ?err.code, error = %err, "key rotation failed");
            self.telemetry
                .raise_error(err.code, &err.message, &request_id)
                .await;
            response.code = err.code;
            response.message = Some(err.message);
        }

        if !warnings.is_empty() {
            response.has_warnings = true;
            self.telemetry
                .raise_warning(
                    "Some re-encrypted records could not be saved.",
                    warnings,
                    &request_id,
                )
                .await;
        }

        attributes.insert("Processed".into(), Value::from(response.processed));
        attributes.insert("Reencrypted".into(), Value::from(response.reencrypted));
        attributes.insert("Failed".into(), Value::from(response.failed));
        attributes.insert("Cancelled".into(), Value::from(response.cancelled));
        if let Some(label) = &response.last_label {
            attributes.insert("LastLabel".into(), Value::from(label.clone()));
        }
        self.telemetry
            .raise_event(
                EventName::EncryptionKeyRotationCompleted,
                &request_id,
                take_spans(&spans),
                attributes,
            )
            .await;

        info!(
            request_id = %request_id,
            processed = response.processed,
            reencrypted = response.reencrypted,
            failed = response.failed,
            cancelled = response.cancelled,
            "key rotation finished"
        );
        response
    }

    #[allow(clippy::too_many_arguments)]
    async fn rotate_inner(
        &self,
        engine_id: Uuid,
        request: &RotateKeyRequest,
        progress: Option<&ProgressCallback<'_>>,
        cancel: &CancellationToken,
        response: &mut RotateKeyResponse,
        warnings: &mut Vec<TelemetryWarning>,
        spans: &SpanList,
    ) -> common::Result<()> {
        if !supports_rotation(engine_id) {
            return Err(ServiceError::not_supported(NOT_SUPPORTED));
        }
        let engine = self.engines.get(engine_id).ok_or_else(|| {
            ServiceError::new(ErrorCode::CryptoEngineNotAvailable, ENGINE_UNAVAILABLE)
        })?;

        let info = engine
            .key_version_info(&request.key_name, &request.key_scope, None)
            .await?;
        let current_version = info.current_version;
        let last_version = current_version.saturating_sub(1);

        // Versions up to 1 are treated as never rotated; records still on
        // version 1 after a single rotation are left for the next one.
        if last_version <= 1 {
            info!(current_version, "no key version eligible for re-encryption");
            return Ok(());
        }

        let filter = RecordFilter {
            starting_after_label: request.starting_after_label.clone(),
            engine_id: Some(engine_id),
            key_name: Some(request.key_name.clone()),
            key_scope: Some(request.key_scope.clone()),
            key_version_at_most: Some(last_version),
            encrypted_on_or_after: request.encrypted_on_or_after,
        };

        let mut records = self.storage.enumerate(filter);
        while let Some(next) = records.next().await {
            let record = next.map_err(|err| {
                ServiceError::new(
                    ErrorCode::GenericUndefinedError,
                    format!("Failed to enumerate records for re-encryption: {}", err.message),
                )
            })?;

            let label = record.label.clone();
            let old_version = record.key_version;
            let attempt = {
                let _span = SpanMeasure::start_nested("ReencryptRecord", 2, spans);
                self.reencrypt_record(record, current_version).await
            };

            response.processed += 1;
            response.last_label = Some(label.clone());
            if attempt.saved {
                response.reencrypted += 1;
            } else {
                response.failed += 1;
            }
            if attempt.commit_failed {
                warnings.push(TelemetryWarning {
                    key: label.clone(),
                    code: attempt.code,
                    message: attempt.message.clone(),
                });
            }

            if let Some(callback) = progress {
                let notified = panic::catch_unwind(AssertUnwindSafe(|| {
                    callback(&label, old_version, attempt.code, &attempt.message)
                }));
                if notified.is_err() {
                    error!(label = %label, "rotation progress callback panicked");
                }
            }

            if cancel.is_cancelled() {
                warn!(label = %label, "key rotation cancelled");
                response.cancelled = true;
                break;
            }
        }
        Ok(())
    }

    async fn reencrypt_record(&self, mut record: EncryptedRecord, current_version: u32) -> Attempt {
        let ciphers = record.cipher_map();
        let parameters = record.key_parameters();

        let result = match self
            .engines
            .get(record.engine_id)
            .ok_or_else(|| ServiceError::new(ErrorCode::CryptoEngineNotAvailable, ENGINE_UNAVAILABLE))
        {
            Ok(engine) => engine.reencrypt(&ciphers, Some(&parameters)).await,
            Err(err) => Err(err),
        };
        let result = match result {
            Ok(result) => result,
            Err(err) => {
                warn!(label = %record.label, code = ?err.code, error = %err, "re-encryption failed");
                return Attempt {
                    code: err.code,
                    message: err.message,
                    saved: false,
                    commit_failed: false,
                };
            }
        };

        for item in &mut record.items {
            match result.data.get(&item.name) {
                Some(cipher) => item.cipher = cipher.clone(),
                None => {
                    let message = format!("Engine returned no ciphertext for item {}.", item.name);
                    warn!(label = %record.label, item = %item.name, "incomplete re-encryption result");
                    return Attempt {
                        code: ErrorCode::CryptoUndefinedError,
                        message,
                        saved: false,
                        commit_failed: false,
                    };
                }
            }
        }
        record.key_version = current_version;
        if result.request_id.is_some() {
            record.engine_request_id = result.request_id;
        }

        match self.storage.save(&mut record).await {
            Ok(()) => Attempt {
                code: ErrorCode::None,
                message: String::new(),
                saved: true,
                commit_failed: false,
            },
            Err(err) => {
                error!(label = %record.label, error = %err, "failed to save re-encrypted record");
                Attempt {
                    code: ErrorCode::StorageCannotCommitValues,
                    message: err.message,
                    saved: false,
                    commit_failed: true,
                }
            }
        }
    }
}
