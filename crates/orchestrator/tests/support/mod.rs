#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::config::KeyConfiguration;
use common::telemetry::{Attributes, TelemetrySpan, TelemetryWarning};
use common::{
    param, well_known, CryptoEngine, DataEncryptionServiceConfiguration, DecryptionResult,
    EncryptedRecord, EncryptionResult, ErrorCode, EventName, KeyVersionInfo, Parameters,
    RecordFilter, ServiceError, StorageProvider, TelemetrySink, TextMap,
};
use encryption::{AesCbcEngine, CryptoEngineRegistry};
use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use orchestrator::ProtectionOrchestrator;
use serde_json::Value;
use storage::InMemoryStorageProvider;
use uuid::Uuid;

pub const AES_KEY: &str = "5FWpu4ZJqe5VR5LiBkwcqHGvwgOF1mdkZOMohwDmrmI=";
pub const AES_IV: &str = "QYUo16NhdqdSCwW1ccfh2w==";

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Event {
        name: EventName,
        correlation_id: String,
        spans: Vec<TelemetrySpan>,
        attributes: Attributes,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
    Warning {
        message: String,
        warnings: Vec<TelemetryWarning>,
    },
}

/// Keeps everything it is sent.
#[derive(Default)]
pub struct RecordingTelemetry {
    pub recorded: Mutex<Vec<Recorded>>,
}

impl RecordingTelemetry {
    pub fn all(&self) -> Vec<Recorded> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn events(&self, wanted: EventName) -> Vec<(String, Attributes)> {
        self.all()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Event {
                    name,
                    correlation_id,
                    attributes,
                    ..
                } if name == wanted => Some((correlation_id, attributes)),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorCode> {
        self.all()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Error { code, .. } => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<Vec<TelemetryWarning>> {
        self.all()
            .into_iter()
            .filter_map(|r| match r {
                Recorded::Warning { warnings, .. } => Some(warnings),
                _ => None,
            })
            .collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn raise_event<'a>(
        &'a self,
        name: EventName,
        correlation_id: &'a str,
        spans: Vec<TelemetrySpan>,
        attributes: Attributes,
    ) -> BoxFuture<'a, ()> {
        self.recorded.lock().unwrap().push(Recorded::Event {
            name,
            correlation_id: correlation_id.to_string(),
            spans,
            attributes,
        });
        Box::pin(future::ready(()))
    }

    fn raise_error<'a>(
        &'a self,
        code: ErrorCode,
        message: &'a str,
        _correlation_id: &'a str,
    ) -> BoxFuture<'a, ()> {
        self.recorded.lock().unwrap().push(Recorded::Error {
            code,
            message: message.to_string(),
        });
        Box::pin(future::ready(()))
    }

    fn raise_warning<'a>(
        &'a self,
        message: &'a str,
        warnings: Vec<TelemetryWarning>,
        _correlation_id: &'a str,
    ) -> BoxFuture<'a, ()> {
        self.recorded.lock().unwrap().push(Recorded::Warning {
            message: message.to_string(),
            warnings,
        });
        Box::pin(future::ready(()))
    }
}

/// Versioned engine posing as the Vault transit engine.
///
/// Ciphertext is `fake:v<version>:<value>`, readable by design so tests
/// can see which version produced it. Values containing `poison` fail
/// re-encryption.
pub struct FakeVersionedEngine {
    version: AtomicU32,
    fail_key_info: AtomicBool,
    pub reencrypt_calls: AtomicUsize,
}

impl FakeVersionedEngine {
    pub fn at_version(version: u32) -> Self {
        Self {
            version: AtomicU32::new(version),
            fail_key_info: AtomicBool::new(false),
            reencrypt_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_version(&self, version: u32) {
        self.version.store(version, Ordering::SeqCst);
    }

    pub fn fail_key_info(&self) {
        self.fail_key_info.store(true, Ordering::SeqCst);
    }

    fn current(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    fn value_of(cipher: &str) -> Option<&str> {
        let mut parts = cipher.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("fake"), Some(_), Some(value)) => Some(value),
            _ => None,
        }
    }

    fn used_parameters(&self, parameters: Option<&Parameters>) -> Parameters {
        let name = parameters
            .and_then(|p| p.get(param::KEY_NAME))
            .cloned()
            .unwrap_or_else(|| Value::from("orders"));
        Parameters::from([
            (param::KEY_SCOPE.to_string(), Value::from("transit")),
            (param::KEY_NAME.to_string(), name),
            (param::KEY_VERSION.to_string(), Value::from(self.current())),
            ("Region".to_string(), Value::from("test")),
        ])
    }
}

impl CryptoEngine for FakeVersionedEngine {
    fn engine_id(&self) -> Uuid {
        well_known::VAULT_TRANSIT_ENGINE_ID
    }

    fn display_name(&self) -> &str {
        "fake versioned engine"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn encrypt<'a>(
        &'a self,
        clear_text: &'a TextMap,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<EncryptionResult>> {
        let result = if clear_text.keys().any(String::is_empty) {
            Err(ServiceError::new(
                ErrorCode::CryptoEncryptionContextNotSet,
                "empty item name",
            ))
        } else {
            let version = self.current();
            Ok(EncryptionResult {
                data: clear_text
                    .iter()
                    .map(|(k, v)| (k.clone(), format!("fake:v{version}:{v}")))
                    .collect(),
                parameters: self.used_parameters(parameters),
                request_id: Some("fake-request".into()),
            })
        };
        Box::pin(future::ready(result))
    }

    fn decrypt<'a>(
        &'a self,
        cipher_text: &'a TextMap,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<DecryptionResult>> {
        let result = cipher_text
            .iter()
            .map(|(name, cipher)| {
                Self::value_of(cipher)
                    .map(|value| (name.clone(), value.to_string()))
                    .ok_or_else(|| ServiceError::new(ErrorCode::CryptoUndefinedError, "bad cipher"))
            })
            .collect::<common::Result<TextMap>>()
            .map(|data| DecryptionResult { data });
        Box::pin(future::ready(result))
    }

    fn reencrypt<'a>(
        &'a self,
        cipher_text: &'a TextMap,
        parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<EncryptionResult>> {
        self.reencrypt_calls.fetch_add(1, Ordering::SeqCst);
        let version = self.current();
        let result = cipher_text
            .iter()
            .map(|(name, cipher)| match Self::value_of(cipher) {
                Some(value) if value.contains("poison") => Err(ServiceError::new(
                    ErrorCode::CryptoUndefinedError,
                    "cannot rewrap poisoned value",
                )),
                Some(value) => Ok((name.clone(), format!("fake:v{version}:{value}"))),
                None => Err(ServiceError::new(ErrorCode::CryptoUndefinedError, "bad cipher")),
            })
            .collect::<common::Result<TextMap>>()
            .map(|data| EncryptionResult {
                data,
                parameters: self.used_parameters(parameters),
                request_id: Some(format!("rewrap-v{version}")),
            });
        Box::pin(future::ready(result))
    }

    fn rotate_key<'a>(
        &'a self,
        _key_name: &'a str,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<()>> {
        self.version.fetch_add(1, Ordering::SeqCst);
        Box::pin(future::ready(Ok(())))
    }

    fn key_version_info<'a>(
        &'a self,
        _key_name: &'a str,
        _key_scope: &'a str,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<KeyVersionInfo>> {
        let result = if self.fail_key_info.load(Ordering::SeqCst) {
            Err(ServiceError::new(
                ErrorCode::CryptoAccessDeniedToKeyOrService,
                "Vault access denied - permission denied",
            ))
        } else {
            Ok(KeyVersionInfo {
                current_version: self.current(),
                min_decryption_version: 1,
                min_encryption_version: 0,
            })
        };
        Box::pin(future::ready(result))
    }
}

/// Engine that reports no key coordinates at all.
pub struct UnversionedEngine;

impl UnversionedEngine {
    pub const ID: Uuid = Uuid::from_u128(0x5a1e_0000_0000_4000_8000_0000_0000_0001);
}

impl CryptoEngine for UnversionedEngine {
    fn engine_id(&self) -> Uuid {
        Self::ID
    }

    fn display_name(&self) -> &str {
        "unversioned engine"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn encrypt<'a>(
        &'a self,
        clear_text: &'a TextMap,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<EncryptionResult>> {
        let data = clear_text
            .iter()
            .map(|(k, v)| (k.clone(), format!("plain:{v}")))
            .collect();
        Box::pin(future::ready(Ok(EncryptionResult {
            data,
            ..EncryptionResult::default()
        })))
    }

    fn decrypt<'a>(
        &'a self,
        cipher_text: &'a TextMap,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<DecryptionResult>> {
        let data = cipher_text
            .iter()
            .map(|(k, v)| (k.clone(), v.trim_start_matches("plain:").to_string()))
            .collect();
        Box::pin(future::ready(Ok(DecryptionResult { data })))
    }

    fn reencrypt<'a>(
        &'a self,
        _cipher_text: &'a TextMap,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<EncryptionResult>> {
        Box::pin(future::ready(Err(ServiceError::not_supported("no rewrap"))))
    }

    fn rotate_key<'a>(
        &'a self,
        _key_name: &'a str,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<()>> {
        Box::pin(future::ready(Ok(())))
    }

    fn key_version_info<'a>(
        &'a self,
        _key_name: &'a str,
        _key_scope: &'a str,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<KeyVersionInfo>> {
        Box::pin(future::ready(Err(ServiceError::not_supported("no versions"))))
    }
}

/// In-memory provider that counts reads and can refuse saves.
#[derive(Default)]
pub struct InstrumentedStorage {
    inner: InMemoryStorageProvider,
    pub enumerations: AtomicUsize,
    pub loads: AtomicUsize,
    fail_all_saves: AtomicBool,
    fail_labels: Mutex<HashSet<String>>,
}

impl InstrumentedStorage {
    pub fn fail_saves(&self) {
        self.fail_all_saves.store(true, Ordering::SeqCst);
    }

    pub fn fail_save_of(&self, label: &str) {
        self.fail_labels.lock().unwrap().insert(label.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn reads(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst) + self.loads.load(Ordering::SeqCst)
    }
}

impl StorageProvider for InstrumentedStorage {
    fn provider_id(&self) -> Uuid {
        self.inner.provider_id()
    }

    fn display_name(&self) -> &str {
        "instrumented in-memory"
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn save<'a>(&'a self, record: &'a mut EncryptedRecord) -> BoxFuture<'a, common::Result<()>> {
        let refused = self.fail_all_saves.load(Ordering::SeqCst)
            || self.fail_labels.lock().unwrap().contains(&record.label);
        if refused {
            return Box::pin(future::ready(Err(ServiceError::storage("disk full"))));
        }
        self.inner.save(record)
    }

    fn load_by_label<'a>(
        &'a self,
        label: &'a str,
    ) -> BoxFuture<'a, common::Result<Option<EncryptedRecord>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_by_label(label)
    }

    fn delete_by_label<'a>(&'a self, label: &'a str) -> BoxFuture<'a, common::Result<bool>> {
        self.inner.delete_by_label(label)
    }

    fn enumerate(&self, filter: RecordFilter) -> BoxStream<'_, common::Result<EncryptedRecord>> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        self.inner.enumerate(filter)
    }
}

pub fn aes_config() -> DataEncryptionServiceConfiguration {
    let mut config = DataEncryptionServiceConfiguration::default();
    config
        .encryption
        .active_keys
        .insert(well_known::AES_ENGINE_ID.to_string(), "unit-key".into());
    config.encryption.key_configurations.push(KeyConfiguration {
        name: "unit-key".into(),
        key: AES_KEY.into(),
        iv: AES_IV.into(),
    });
    config
}

pub struct Harness {
    pub orchestrator: ProtectionOrchestrator,
    pub storage: Arc<InstrumentedStorage>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub versioned: Arc<FakeVersionedEngine>,
}

/// Orchestrator over both an AES engine and the fake versioned engine.
/// `default_engine` picks which one `encrypt` uses.
pub fn harness(config: DataEncryptionServiceConfiguration, default_engine: Uuid) -> Harness {
    let storage = Arc::new(InstrumentedStorage::default());
    let versioned = Arc::new(FakeVersionedEngine::at_version(1));
    harness_with(config, default_engine, storage, versioned)
}

pub fn harness_with(
    config: DataEncryptionServiceConfiguration,
    default_engine: Uuid,
    storage: Arc<InstrumentedStorage>,
    versioned: Arc<FakeVersionedEngine>,
) -> Harness {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let engines: Vec<Arc<dyn CryptoEngine>> = vec![
        Arc::new(AesCbcEngine::from_config(&config.encryption)),
        versioned.clone(),
        Arc::new(UnversionedEngine),
    ];
    let registry = Arc::new(CryptoEngineRegistry::new(default_engine, engines));
    let orchestrator = ProtectionOrchestrator::new(
        registry,
        storage.clone(),
        telemetry.clone(),
        Arc::new(config),
    )
    .expect("orchestrator");
    Harness {
        orchestrator,
        storage,
        telemetry,
        versioned,
    }
}

pub fn text_map(pairs: &[(&str, &str)]) -> TextMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
