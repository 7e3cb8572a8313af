use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Digest algorithm used to derive the secondary lookup hash of a value.
///
/// Stored on every record by name; the numeric value is the legacy wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum HashMethod {
    #[serde(rename = "None")]
    None = 0,
    #[serde(rename = "HMAC256")]
    Hmac256 = 10,
    #[serde(rename = "HMAC384")]
    Hmac384 = 20,
    #[serde(rename = "HMAC512")]
    Hmac512 = 30,
    #[serde(rename = "SHA2_256")]
    Sha2_256 = 110,
    #[serde(rename = "SHA2_384")]
    Sha2_384 = 120,
    #[default]
    #[serde(rename = "SHA2_512")]
    Sha2_512 = 130,
}

const ALL_METHODS: [HashMethod; 7] = [
    HashMethod::None,
    HashMethod::Hmac256,
    HashMethod::Hmac384,
    HashMethod::Hmac512,
    HashMethod::Sha2_256,
    HashMethod::Sha2_384,
    HashMethod::Sha2_512,
];

impl HashMethod {
    pub fn name(self) -> &'static str {
        match self {
            HashMethod::None => "None",
            HashMethod::Hmac256 => "HMAC256",
            HashMethod::Hmac384 => "HMAC384",
            HashMethod::Hmac512 => "HMAC512",
            HashMethod::Sha2_256 => "SHA2_256",
            HashMethod::Sha2_384 => "SHA2_384",
            HashMethod::Sha2_512 => "SHA2_512",
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_keyed(self) -> bool {
        matches!(
            self,
            HashMethod::Hmac256 | HashMethod::Hmac384 | HashMethod::Hmac512
        )
    }
}

impl fmt::Display for HashMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashMethod {
    type Err = String;

    /// Accepts the symbolic name (any case) or the numeric id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(value) = trimmed.parse::<u32>() {
            return ALL_METHODS
                .iter()
                .copied()
                .find(|method| method.as_u32() == value)
                .ok_or_else(|| format!("unknown hash method id {value}"));
        }

        ALL_METHODS
            .iter()
            .copied()
            .find(|method| method.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown hash method '{trimmed}'"))
    }
}
