mod support;

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::{
    param, well_known, EncryptedItem, EncryptedRecord, ErrorCode, EventName, HashMethod,
    Parameters, StorageProvider, TextMap,
};
use orchestrator::{EncryptRequest, LabeledItemSet};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use support::{aes_config, harness, harness_with, text_map, FakeVersionedEngine, UnversionedEngine};
use uuid::Uuid;

fn sha512_b64(text: &str) -> String {
    STANDARD.encode(Sha512::digest(text.as_bytes()))
}

#[tokio::test]
async fn encrypt_then_decrypt_single_item() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);

    let response = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("A", "hello")])))
        .await;
    assert!(response.is_success(), "{response:?}");
    let label = response.label.expect("label");
    assert!(!label.is_empty());
    assert_eq!(response.items["A"].hash.as_deref(), Some(sha512_b64("hello").as_str()));

    let decrypted = h
        .orchestrator
        .decrypt(Some(vec![LabeledItemSet::new(label.clone(), ["A"])]))
        .await;
    assert_eq!(decrypted.code, ErrorCode::None);
    assert!(!decrypted.has_errors);
    assert_eq!(decrypted.results.len(), 1);
    assert_eq!(decrypted.results[0].label, label);
    assert_eq!(decrypted.results[0].data, Some(text_map(&[("A", "hello")])));
}

#[tokio::test]
async fn stored_record_carries_engine_coordinates() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let mut request = EncryptRequest::new(text_map(&[("Email", "a@b.c"), ("Phone", "555")]));
    request.tags = BTreeSet::from(["customer".to_string()]);

    let response = h.orchestrator.encrypt(request).await;
    let label = response.label.expect("label");

    let record = h
        .storage
        .load_by_label(&label)
        .await
        .expect("load")
        .expect("record");
    assert_eq!(record.engine_id, well_known::AES_ENGINE_ID);
    assert_eq!(record.key_name.as_deref(), Some("unit-key"));
    assert_eq!(record.key_version, 1);
    assert_eq!(record.hash_method, HashMethod::Sha2_512);
    assert_eq!(record.encryption_parameters, None);
    assert!(record.tags.contains("customer"));
    assert_eq!(record.items.len(), 2);
    assert!(record.items.iter().all(|item| item.cipher != "a@b.c" && item.cipher != "555"));
    assert!(record.created_on.is_some());
    assert!(record.engine_request_id.is_some());
}

#[tokio::test]
async fn items_found_by_case_insensitive_name_or_lowercased_hash() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let response = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[
            ("Email", "Alice@Example.COM"),
            ("Phone", "555-0100"),
        ])))
        .await;
    let label = response.label.expect("label");
    let email_hash = sha512_b64("alice@example.com");
    assert_eq!(response.items["Email"].hash.as_deref(), Some(email_hash.as_str()));

    let by_name = h
        .orchestrator
        .decrypt(Some(vec![LabeledItemSet::new(label.clone(), ["EMAIL"])]))
        .await;
    assert_eq!(
        by_name.results[0].data,
        Some(text_map(&[("Email", "Alice@Example.COM")]))
    );

    let by_hash = h
        .orchestrator
        .decrypt(Some(vec![LabeledItemSet::new(label.clone(), [email_hash])]))
        .await;
    assert_eq!(
        by_hash.results[0].data,
        Some(text_map(&[("Email", "Alice@Example.COM")]))
    );

    let unknown = h
        .orchestrator
        .decrypt(Some(vec![LabeledItemSet::new(label, ["Address"])]))
        .await;
    assert_eq!(unknown.results[0].code, ErrorCode::None);
    assert_eq!(unknown.results[0].data, Some(TextMap::new()));
}

#[tokio::test]
async fn repeated_labels_are_coalesced() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let label = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("a", "1"), ("b", "2"), ("c", "3")])))
        .await
        .label
        .expect("label");

    let merged = h
        .orchestrator
        .decrypt(Some(vec![
            LabeledItemSet::new(label.clone(), ["a"]),
            LabeledItemSet::new(label.clone(), ["b"]),
        ]))
        .await;
    assert_eq!(merged.results.len(), 1);
    assert_eq!(merged.results[0].data, Some(text_map(&[("a", "1"), ("b", "2")])));

    let everything = h
        .orchestrator
        .decrypt(Some(vec![
            LabeledItemSet::new(label.clone(), ["a"]),
            LabeledItemSet::all(label),
        ]))
        .await;
    assert_eq!(everything.results.len(), 1);
    assert_eq!(
        everything.results[0].data,
        Some(text_map(&[("a", "1"), ("b", "2"), ("c", "3")]))
    );
}

#[tokio::test]
async fn one_missing_label_does_not_fail_the_batch() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let label = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("A", "hello")])))
        .await
        .label
        .expect("label");

    let response = h
        .orchestrator
        .decrypt(Some(vec![
            LabeledItemSet::all(label.clone()),
            LabeledItemSet::all("missing"),
        ]))
        .await;
    assert!(response.has_errors);
    assert_eq!(response.code, ErrorCode::None);
    assert_eq!(response.results.len(), 2);

    let ok = &response.results[0];
    assert_eq!(ok.label, label);
    assert_eq!(ok.data, Some(text_map(&[("A", "hello")])));

    let missing = &response.results[1];
    assert_eq!(missing.label, "missing");
    assert_eq!(missing.code, ErrorCode::StorageLabeledValuesNotFound);
    assert_eq!(missing.message.as_deref(), Some("Labeled values [missing] not found."));
    assert_eq!(missing.data, None);

    let warnings = h.telemetry.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0][0].key, "missing");
}

#[tokio::test]
async fn empty_item_name_stores_nothing() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let response = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("", "x")])))
        .await;
    assert_eq!(response.code, ErrorCode::CryptoEncryptionContextNotSet);
    assert_eq!(response.label, None);
    assert!(response.items.is_empty());
    assert_eq!(h.storage.len(), 0);
    assert_eq!(h.telemetry.errors(), vec![ErrorCode::CryptoEncryptionContextNotSet]);
}

#[tokio::test]
async fn failed_save_returns_no_label() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    h.storage.fail_saves();

    let response = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("A", "hello")])))
        .await;
    assert_eq!(response.code, ErrorCode::StorageCannotCommitValues);
    assert_eq!(response.message.as_deref(), Some("Failed to save the encrypted data."));
    assert_eq!(response.label, None);
    assert!(response.items.is_empty());
}

#[tokio::test]
async fn encrypt_without_default_engine() {
    let h = harness(
        common::DataEncryptionServiceConfiguration::default(),
        well_known::AES_ENGINE_ID,
    );
    let response = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("A", "hello")])))
        .await;
    assert_eq!(response.code, ErrorCode::CryptoEngineNotAvailable);
    assert_eq!(response.label, None);
    assert_eq!(h.storage.len(), 0);
}

#[tokio::test]
async fn decrypt_without_list_is_rejected() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let response = h.orchestrator.decrypt(None).await;
    assert_eq!(response.code, ErrorCode::CryptoInvalidTaggedDataList);
    assert!(response.results.is_empty());
    assert_eq!(h.telemetry.errors(), vec![ErrorCode::CryptoInvalidTaggedDataList]);
}

#[tokio::test]
async fn decrypt_reports_record_of_unknown_engine() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let mut record = EncryptedRecord::with_label("orphan");
    record.engine_id = Uuid::new_v4();
    record.items.push(EncryptedItem {
        name: "A".into(),
        cipher: "opaque".into(),
        hash: None,
    });
    h.storage.save(&mut record).await.expect("save");

    let response = h
        .orchestrator
        .decrypt(Some(vec![LabeledItemSet::all("orphan")]))
        .await;
    assert!(response.has_errors);
    assert_eq!(response.results[0].code, ErrorCode::CryptoEngineNotAvailable);
}

#[tokio::test]
async fn decrypt_uses_the_engine_that_encrypted() {
    let config = aes_config();
    let aes_side = harness(config.clone(), well_known::AES_ENGINE_ID);
    let vault_side = harness_with(
        config,
        well_known::VAULT_TRANSIT_ENGINE_ID,
        aes_side.storage.clone(),
        std::sync::Arc::new(FakeVersionedEngine::at_version(1)),
    );

    let label = aes_side
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("A", "hello")])))
        .await
        .label
        .expect("label");

    let response = vault_side
        .orchestrator
        .decrypt(Some(vec![LabeledItemSet::all(label)]))
        .await;
    assert_eq!(response.results[0].data, Some(text_map(&[("A", "hello")])));
}

#[tokio::test]
async fn delete_reports_each_label() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let label = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("A", "hello")])))
        .await
        .label
        .expect("label");

    let response = h
        .orchestrator
        .delete(vec![label.clone(), "nope".to_string()])
        .await;
    assert!(response.has_errors);
    assert_eq!(response.code, ErrorCode::None);
    assert_eq!(response.results[0].code, ErrorCode::None);
    assert_eq!(response.results[1].code, ErrorCode::StorageLabelNotFoundCannotDelete);
    assert_eq!(response.results[1].message.as_deref(), Some("Data label not found."));
    assert_eq!(h.storage.len(), 0);

    let after = h
        .orchestrator
        .decrypt(Some(vec![LabeledItemSet::all(label)]))
        .await;
    assert_eq!(after.results[0].code, ErrorCode::StorageLabeledValuesNotFound);

    let events = h.telemetry.events(EventName::DataDeleteCompleted);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, response.request_id);
}

#[tokio::test]
async fn encrypt_event_describes_the_record() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let response = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("A", "hello")])))
        .await;
    let label = response.label.clone().expect("label");

    let events = h.telemetry.events(EventName::DataEncryptCompleted);
    assert_eq!(events.len(), 1);
    let (correlation_id, attributes) = &events[0];
    assert_eq!(correlation_id, &response.request_id);
    assert_eq!(attributes["DataLabel"], Value::from(label));
    assert_eq!(
        attributes["EngineId"],
        Value::from(well_known::AES_ENGINE_ID.to_string())
    );
    assert_eq!(attributes["KeyName"], Value::from("unit-key"));
    assert_eq!(attributes["KeyVersion"], Value::from(1));
    assert_eq!(attributes["HashMethod"], Value::from("SHA2_512"));
    assert!(!attributes.contains_key("ErrorCode"));
}

#[tokio::test]
async fn failed_encrypt_still_raises_the_event() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    h.storage.fail_saves();
    h.orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("A", "hello")])))
        .await;

    let events = h.telemetry.events(EventName::DataEncryptCompleted);
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].1["ErrorCode"],
        Value::from(ErrorCode::StorageCannotCommitValues.as_u32())
    );
}

#[tokio::test]
async fn hash_method_override() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);

    let mut request = EncryptRequest::new(text_map(&[("A", "Hello")]));
    request.hash_method = Some(HashMethod::Sha2_256);
    let response = h.orchestrator.encrypt(request).await;
    assert_eq!(
        response.items["A"].hash,
        Some(STANDARD.encode(Sha256::digest(b"hello")))
    );

    let mut request = EncryptRequest::new(text_map(&[("A", "Hello")]));
    request.hash_method = Some(HashMethod::None);
    let response = h.orchestrator.encrypt(request).await;
    assert_eq!(response.items["A"].hash, Some(sha512_b64("hello")));
}

fn key_override() -> Parameters {
    Parameters::from([(param::KEY_NAME.to_string(), Value::from("billing"))])
}

#[tokio::test]
async fn request_parameters_ignored_unless_allowed() {
    let h = harness(aes_config(), well_known::VAULT_TRANSIT_ENGINE_ID);
    let mut request = EncryptRequest::new(text_map(&[("A", "hello")]));
    request.parameters = Some(key_override());

    let label = h.orchestrator.encrypt(request).await.label.expect("label");
    let record = h
        .storage
        .load_by_label(&label)
        .await
        .expect("load")
        .expect("record");
    assert_eq!(record.key_name.as_deref(), Some("orders"));
    assert_eq!(record.key_scope.as_deref(), Some("transit"));
}

#[tokio::test]
async fn request_parameters_reach_the_engine_when_allowed() {
    let mut config = aes_config();
    config.encryption.allow_request_parameters = true;
    let h = harness(config, well_known::VAULT_TRANSIT_ENGINE_ID);
    let mut request = EncryptRequest::new(text_map(&[("A", "hello")]));
    request.parameters = Some(key_override());

    let label = h.orchestrator.encrypt(request).await.label.expect("label");
    let record = h
        .storage
        .load_by_label(&label)
        .await
        .expect("load")
        .expect("record");
    assert_eq!(record.key_name.as_deref(), Some("billing"));
    assert_eq!(
        record.encryption_parameters,
        Some(Parameters::from([("Region".to_string(), Value::from("test"))]))
    );
}

#[tokio::test]
async fn engine_without_versions_stores_version_one() {
    let h = harness(aes_config(), UnversionedEngine::ID);

    let response = h
        .orchestrator
        .encrypt(EncryptRequest::new(text_map(&[("A", "hello")])))
        .await;
    assert!(response.is_success(), "{response:?}");
    let label = response.label.expect("label");

    let record = h
        .storage
        .load_by_label(&label)
        .await
        .expect("load")
        .expect("record");
    assert_eq!(record.engine_id, UnversionedEngine::ID);
    assert_eq!(record.key_version, 1);
    assert_eq!(record.key_name, None);
    assert_eq!(record.key_scope, None);

    let decrypted = h
        .orchestrator
        .decrypt(Some(vec![LabeledItemSet::all(label)]))
        .await;
    assert_eq!(decrypted.results[0].data, Some(text_map(&[("A", "hello")])));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_round_trips_share_one_orchestrator() {
    let h = harness(aes_config(), well_known::AES_ENGINE_ID);
    let orchestrator = Arc::new(h.orchestrator);

    let tasks = (0..32).map(|n| {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            let input = text_map(&[
                ("Email", format!("user{n}@example.com").as_str()),
                ("Card", "x".repeat(n + 1).as_str()),
            ]);
            let response = orchestrator.encrypt(EncryptRequest::new(input.clone())).await;
            let label = response.label.expect("label");
            let decrypted = orchestrator
                .decrypt(Some(vec![LabeledItemSet::all(label.clone())]))
                .await;
            (input, label, decrypted)
        })
    });

    let mut labels = BTreeSet::new();
    for joined in futures::future::join_all(tasks).await {
        let (input, label, decrypted) = joined.expect("join");
        assert!(!decrypted.has_errors, "{decrypted:?}");
        assert_eq!(decrypted.results.len(), 1);
        assert_eq!(decrypted.results[0].label, label);
        assert_eq!(decrypted.results[0].data, Some(input));
        labels.insert(label);
    }
    assert_eq!(labels.len(), 32);
    assert_eq!(h.storage.len(), 32);
}
