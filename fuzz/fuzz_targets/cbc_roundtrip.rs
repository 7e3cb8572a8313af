#![no_main]

use common::{CryptoEngine, TextMap};
use encryption::{AesCbcEngine, SymmetricKey};
use futures::executor::block_on;
use libfuzzer_sys::fuzz_target;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

fuzz_target!(|data: &[u8]| {
    if data.len() < KEY_LEN + IV_LEN {
        return;
    }

    let key = match SymmetricKey::new(data[..KEY_LEN].to_vec(), &data[KEY_LEN..KEY_LEN + IV_LEN]) {
        Ok(key) => key,
        Err(_) => return,
    };
    let engine = AesCbcEngine::new("fuzz", key);
    let payload = String::from_utf8_lossy(&data[KEY_LEN + IV_LEN..]).into_owned();

    let mut clear = TextMap::new();
    clear.insert("value".to_string(), payload.clone());
    let encrypted = match block_on(engine.encrypt(&clear, None)) {
        Ok(result) => result,
        Err(_) => return,
    };
    let decrypted = block_on(engine.decrypt(&encrypted.data, Some(&encrypted.parameters)))
        .expect("own ciphertext decrypts");
    assert_eq!(decrypted.data["value"], payload);

    // Arbitrary input as ciphertext must fail cleanly.
    let mut garbage = TextMap::new();
    garbage.insert("value".to_string(), payload);
    let _ = block_on(engine.decrypt(&garbage, None));
});
