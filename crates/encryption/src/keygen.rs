//! Fresh key material for the AES engine's configuration.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::Rng;
use zeroize::Zeroizing;

use crate::aes_cbc::AES_IV_SIZE;

/// AES-256 key length in bytes
pub const GENERATED_KEY_SIZE: usize = 32;

/// Base64 key and IV, ready for a `key_configurations` entry.
pub struct GeneratedKey {
    pub key: Zeroizing<String>,
    pub iv: String,
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("key", &"[REDACTED]")
            .field("iv", &self.iv)
            .finish()
    }
}

/// Generates a random 256-bit key and 128-bit IV.
pub fn generate_aes_key() -> GeneratedKey {
    let mut rng = rand::rng();
    let mut key = Zeroizing::new([0u8; GENERATED_KEY_SIZE]);
    let mut iv = [0u8; AES_IV_SIZE];
    rng.fill(&mut key[..]);
    rng.fill(&mut iv[..]);

    GeneratedKey {
        key: Zeroizing::new(STANDARD.encode(&key[..])),
        iv: STANDARD.encode(iv),
    }
}
