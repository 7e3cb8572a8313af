//! Secondary lookup hashing.
//!
//! A stored item carries a digest of its (case-folded) plaintext so callers
//! can locate it by value-derived token instead of field name. Keyed
//! methods use HMAC over the configured hash key; unkeyed methods are plain
//! SHA-2.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use common::{ErrorCode, HashMethod, Result, ServiceError};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

/// Computes digests of UTF-8 text with one configured method.
#[derive(Clone)]
pub struct StringHasher {
    method: HashMethod,
    key: Option<Zeroizing<Vec<u8>>>,
}

impl std::fmt::Debug for StringHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringHasher")
            .field("method", &self.method)
            .field("key", &self.key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl StringHasher {
    /// Keyed methods require a non-empty `hash_key`.
    pub fn new(method: HashMethod, hash_key: Option<&str>) -> Result<Self> {
        let key = hash_key
            .filter(|key| !key.is_empty())
            .map(|key| Zeroizing::new(key.as_bytes().to_vec()));

        if method.is_keyed() && key.is_none() {
            return Err(ServiceError::new(
                ErrorCode::GenericMissingConfiguration,
                format!("hash method {method} requires a hash key"),
            ));
        }

        Ok(Self { method, key })
    }

    pub fn method(&self) -> HashMethod {
        self.method
    }

    /// Raw digest, or `None` for [`HashMethod::None`].
    pub fn hash(&self, text: &str) -> Result<Option<Vec<u8>>> {
        let data = text.as_bytes();
        let digest = match self.method {
            HashMethod::None => return Ok(None),
            HashMethod::Sha2_256 => Sha256::digest(data).to_vec(),
            HashMethod::Sha2_384 => Sha384::digest(data).to_vec(),
            HashMethod::Sha2_512 => Sha512::digest(data).to_vec(),
            HashMethod::Hmac256 => self.hmac::<Hmac<Sha256>>(data)?,
            HashMethod::Hmac384 => self.hmac::<Hmac<Sha384>>(data)?,
            HashMethod::Hmac512 => self.hmac::<Hmac<Sha512>>(data)?,
        };
        Ok(Some(digest))
    }

    /// Base64 form of [`StringHasher::hash`].
    pub fn hash_base64(&self, text: &str) -> Result<Option<String>> {
        Ok(self.hash(text)?.map(|digest| STANDARD.encode(digest)))
    }

    fn hmac<M: Mac + hmac::digest::KeyInit>(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.key.as_ref().ok_or_else(|| {
            ServiceError::new(
                ErrorCode::GenericMissingConfiguration,
                "hash key is not configured",
            )
        })?;
        let mut mac = <M as Mac>::new_from_slice(key).map_err(|e| {
            ServiceError::new(
                ErrorCode::GenericInvalidConfiguration,
                format!("HMAC init failed: {e}"),
            )
        })?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
