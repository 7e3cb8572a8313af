//! Local fixed-key AES-CBC engine.
//!
//! Key and IV come from configuration and never change, so every value is
//! reported under key version 1. A fresh CBC context is derived from the
//! stored material on every call; no cipher state is shared between
//! concurrent requests.

use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use common::config::EncryptionConfig;
use common::{
    param, well_known, CryptoEngine, DecryptionResult, EncryptionResult, ErrorCode,
    KeyVersionInfo, Parameters, ServiceError, TextMap,
};
use futures::future::{self, BoxFuture};
use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{EncryptionError, Result};

/// AES block / IV size (128 bits)
pub const AES_IV_SIZE: usize = 16;

/// Accepted AES key sizes: AES-128, AES-192, AES-256
pub const AES_KEY_SIZES: &[usize] = &[16, 24, 32];

/// Key version reported for every value produced by this engine
pub const FIXED_KEY_VERSION: u32 = 1;

/// Symmetric key material, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    key: Vec<u8>,
    iv: [u8; AES_IV_SIZE],
}

impl SymmetricKey {
    pub fn new(key: Vec<u8>, iv: &[u8]) -> Result<Self> {
        if !AES_KEY_SIZES.contains(&key.len()) {
            return Err(EncryptionError::InvalidKeyLength {
                expected: AES_KEY_SIZES,
                actual: key.len(),
            });
        }
        let iv: [u8; AES_IV_SIZE] = iv.try_into().map_err(|_| EncryptionError::InvalidIvLength {
            expected: AES_IV_SIZE,
            actual: iv.len(),
        })?;
        Ok(Self { key, iv })
    }

    /// Decodes base64 key and IV strings.
    pub fn from_base64(key: &str, iv: &str) -> Result<Self> {
        let key_bytes = STANDARD
            .decode(key.trim())
            .map_err(|source| EncryptionError::InvalidBase64 {
                what: "key".into(),
                source,
            })?;
        let iv_bytes = STANDARD
            .decode(iv.trim())
            .map_err(|source| EncryptionError::InvalidBase64 {
                what: "iv".into(),
                source,
            })?;
        Self::new(key_bytes, &iv_bytes)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let invalid = || EncryptionError::InvalidKeyLength {
            expected: AES_KEY_SIZES,
            actual: self.key.len(),
        };
        let ciphertext = match self.key.len() {
            16 => cbc::Encryptor::<Aes128>::new_from_slices(&self.key, &self.iv)
                .map_err(|_| invalid())?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            24 => cbc::Encryptor::<Aes192>::new_from_slices(&self.key, &self.iv)
                .map_err(|_| invalid())?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            32 => cbc::Encryptor::<Aes256>::new_from_slices(&self.key, &self.iv)
                .map_err(|_| invalid())?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            _ => return Err(invalid()),
        };
        Ok(ciphertext)
    }

    fn decrypt(&self, item: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let invalid = || EncryptionError::InvalidKeyLength {
            expected: AES_KEY_SIZES,
            actual: self.key.len(),
        };
        let failed = |_| EncryptionError::DecryptionFailed(item.to_string());
        match self.key.len() {
            16 => cbc::Decryptor::<Aes128>::new_from_slices(&self.key, &self.iv)
                .map_err(|_| invalid())?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(failed),
            24 => cbc::Decryptor::<Aes192>::new_from_slices(&self.key, &self.iv)
                .map_err(|_| invalid())?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(failed),
            32 => cbc::Decryptor::<Aes256>::new_from_slices(&self.key, &self.iv)
                .map_err(|_| invalid())?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(failed),
            _ => Err(invalid()),
        }
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// Fixed-key AES-CBC engine.
#[derive(Debug)]
pub struct AesCbcEngine {
    key_name: String,
    key: Option<SymmetricKey>,
}

impl AesCbcEngine {
    pub fn new(key_name: impl Into<String>, key: SymmetricKey) -> Self {
        Self {
            key_name: key_name.into(),
            key: Some(key),
        }
    }

    /// Resolves the active key of this engine from configuration.
    ///
    /// Missing or malformed key material leaves the engine unconfigured,
    /// which keeps it out of the registry.
    pub fn from_config(config: &EncryptionConfig) -> Self {
        let Some(key_name) = config.active_key_name(well_known::AES_ENGINE_ID) else {
            warn!(
                engine_id = %well_known::AES_ENGINE_ID,
                "no active key configured; AES engine disabled"
            );
            return Self::unconfigured();
        };

        let Some(key_config) = config.key_configuration(key_name) else {
            error!(key_name, "active key has no key configuration; AES engine disabled");
            return Self::unconfigured_named(key_name);
        };

        if key_config.key.is_empty() || key_config.iv.is_empty() {
            error!(key_name, "key or IV missing; AES engine disabled");
            return Self::unconfigured_named(key_name);
        }

        match SymmetricKey::from_base64(&key_config.key, &key_config.iv) {
            Ok(key) => {
                debug!(key_name, "AES engine configured");
                Self::new(key_name, key)
            }
            Err(err) => {
                error!(key_name, error = %err, "invalid key material; AES engine disabled");
                Self::unconfigured_named(key_name)
            }
        }
    }

    fn unconfigured() -> Self {
        Self::unconfigured_named("")
    }

    fn unconfigured_named(key_name: &str) -> Self {
        Self {
            key_name: key_name.to_string(),
            key: None,
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    fn require_key(&self) -> Result<&SymmetricKey> {
        self.key.as_ref().ok_or_else(|| {
            EncryptionError::MissingKeyMaterial("AES engine has no key configured".into())
        })
    }

    fn encrypt_all(&self, clear_text: &TextMap) -> Result<EncryptionResult> {
        if clear_text.keys().any(|name| name.is_empty()) {
            return Err(EncryptionError::EmptyContext);
        }
        let key = self.require_key()?;

        let mut data = TextMap::new();
        for (name, value) in clear_text {
            let ciphertext = key.encrypt(value.as_bytes())?;
            data.insert(name.clone(), STANDARD.encode(ciphertext));
        }

        let mut parameters = Parameters::new();
        parameters.insert(param::KEY_NAME.into(), Value::from(self.key_name.clone()));
        parameters.insert(param::KEY_VERSION.into(), Value::from(FIXED_KEY_VERSION));

        Ok(EncryptionResult {
            data,
            parameters,
            request_id: Some(Uuid::new_v4().to_string()),
        })
    }

    fn decrypt_all(&self, cipher_text: &TextMap) -> Result<DecryptionResult> {
        let key = self.require_key()?;

        let mut data = TextMap::new();
        for (name, value) in cipher_text {
            let bytes = STANDARD
                .decode(value.trim())
                .map_err(|_| EncryptionError::InvalidCiphertext(name.clone()))?;
            let clear = key.decrypt(name, &bytes)?;
            let text =
                String::from_utf8(clear).map_err(|_| EncryptionError::InvalidUtf8(name.clone()))?;
            data.insert(name.clone(), text);
        }
        Ok(DecryptionResult { data })
    }
}

impl CryptoEngine for AesCbcEngine {
    fn engine_id(&self) -> Uuid {
        well_known::AES_ENGINE_ID
    }

    fn display_name(&self) -> &str {
        well_known::AES_ENGINE_NAME
    }

    fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    fn encrypt<'a>(
        &'a self,
        clear_text: &'a TextMap,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<EncryptionResult>> {
        Box::pin(future::ready(
            self.encrypt_all(clear_text).map_err(ServiceError::from),
        ))
    }

    fn decrypt<'a>(
        &'a self,
        cipher_text: &'a TextMap,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<DecryptionResult>> {
        Box::pin(future::ready(
            self.decrypt_all(cipher_text).map_err(ServiceError::from),
        ))
    }

    fn reencrypt<'a>(
        &'a self,
        _cipher_text: &'a TextMap,
        _parameters: Option<&'a Parameters>,
    ) -> BoxFuture<'a, common::Result<EncryptionResult>> {
        Box::pin(future::ready(Err(ServiceError::not_supported(
            "Re-encryption is not supported by the AES engine.",
        ))))
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
        Box::pin(future::ready(Err(ServiceError::new(
            ErrorCode::CryptoFunctionalityNotSupported,
            "Key versioning is not supported by the AES engine.",
        ))))
    }
}
