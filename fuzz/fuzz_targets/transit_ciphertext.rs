#![no_main]

use encryption::parse_key_version;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Some(version) = parse_key_version(text) {
        assert!(text.starts_with("vault:v"));
        assert_eq!(
            parse_key_version(&format!("vault:v{version}:payload")),
            Some(version)
        );
    }
});
