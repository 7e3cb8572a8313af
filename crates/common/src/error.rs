use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Numeric error taxonomy shared by every layer of the service.
///
/// Codes are grouped by subsystem into disjoint ranges: generic (100s),
/// network (1000s), crypto (2000s) and storage (3000s). The numeric values
/// are part of the wire contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum ErrorCode {
    #[default]
    None = 0,

    GenericUndefinedError = 100,
    GenericMissingConfiguration = 101,
    GenericInvalidConfiguration = 102,

    NetworkUndefinedError = 1000,
    NetworkConnectionError = 1001,

    CryptoUndefinedError = 2000,
    CryptoMissingDefaultEncryptionKey = 2001,
    CryptoEncryptionKeyNotFound = 2002,
    CryptoEncryptionContextNotSet = 2003,
    CryptoAccessDeniedToKeyOrService = 2004,
    CryptoMissingConfiguration = 2005,
    CryptoInvalidConfiguration = 2006,
    CryptoServiceNotAvailable = 2007,
    CryptoInvalidServiceParameters = 2008,
    CryptoServiceNotFound = 2009,
    CryptoInvalidTaggedDataList = 2010,
    CryptoEngineNotAvailable = 2011,
    CryptoFunctionalityNotSupported = 2012,
    CryptoEncryptionKeyNotSpecified = 2013,
    CryptoEncryptionContextNotSpecified = 2014,

    StorageUndefinedError = 3000,
    StorageCannotCommitValues = 3001,
    StorageLabeledValuesFailedToLoad = 3002,
    StorageLabeledValuesNotFound = 3003,
    StorageLabelNotFoundCannotDelete = 3004,
    StorageErrorDeletingData = 3005,
}

/// Subsystem owning a range of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorGroup {
    None,
    Generic,
    Network,
    Crypto,
    Storage,
}

const ALL_CODES: [ErrorCode; 27] = [
    ErrorCode::None,
    ErrorCode::GenericUndefinedError,
    ErrorCode::GenericMissingConfiguration,
    ErrorCode::GenericInvalidConfiguration,
    ErrorCode::NetworkUndefinedError,
    ErrorCode::NetworkConnectionError,
    ErrorCode::CryptoUndefinedError,
    ErrorCode::CryptoMissingDefaultEncryptionKey,
    ErrorCode::CryptoEncryptionKeyNotFound,
    ErrorCode::CryptoEncryptionContextNotSet,
    ErrorCode::CryptoAccessDeniedToKeyOrService,
    ErrorCode::CryptoMissingConfiguration,
    ErrorCode::CryptoInvalidConfiguration,
    ErrorCode::CryptoServiceNotAvailable,
    ErrorCode::CryptoInvalidServiceParameters,
    ErrorCode::CryptoServiceNotFound,
    ErrorCode::CryptoInvalidTaggedDataList,
    ErrorCode::CryptoEngineNotAvailable,
    ErrorCode::CryptoFunctionalityNotSupported,
    ErrorCode::CryptoEncryptionKeyNotSpecified,
    ErrorCode::CryptoEncryptionContextNotSpecified,
    ErrorCode::StorageUndefinedError,
    ErrorCode::StorageCannotCommitValues,
    ErrorCode::StorageLabeledValuesFailedToLoad,
    ErrorCode::StorageLabeledValuesNotFound,
    ErrorCode::StorageLabelNotFoundCannotDelete,
    ErrorCode::StorageErrorDeletingData,
];

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        ALL_CODES.iter().copied().find(|code| code.as_u32() == value)
    }

    pub fn is_none(self) -> bool {
        self == ErrorCode::None
    }

    pub fn group(self) -> ErrorGroup {
        match self.as_u32() {
            0 => ErrorGroup::None,
            100..=999 => ErrorGroup::Generic,
            1000..=1999 => ErrorGroup::Network,
            2000..=2999 => ErrorGroup::Crypto,
            _ => ErrorGroup::Storage,
        }
    }

    /// Stable symbolic name, as printed by operator tooling.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::None => "None",
            ErrorCode::GenericUndefinedError => "Generic_Undefined_Error",
            ErrorCode::GenericMissingConfiguration => "Generic_Missing_Configuration",
            ErrorCode::GenericInvalidConfiguration => "Generic_Invalid_Configuration",
            ErrorCode::NetworkUndefinedError => "Network_Undefined_Error",
            ErrorCode::NetworkConnectionError => "Network_Connection_Error",
            ErrorCode::CryptoUndefinedError => "Crypto_Undefined_Error",
            ErrorCode::CryptoMissingDefaultEncryptionKey => "Crypto_Missing_Default_Encryption_Key",
            ErrorCode::CryptoEncryptionKeyNotFound => "Crypto_Encryption_Key_Not_Found",
            ErrorCode::CryptoEncryptionContextNotSet => "Crypto_Encryption_Context_Not_Set",
            ErrorCode::CryptoAccessDeniedToKeyOrService => "Crypto_Access_Denied_To_Key_or_Service",
            ErrorCode::CryptoMissingConfiguration => "Crypto_Missing_Configuration",
            ErrorCode::CryptoInvalidConfiguration => "Crypto_Invalid_Configuration",
            ErrorCode::CryptoServiceNotAvailable => "Crypto_Service_Not_Available",
            ErrorCode::CryptoInvalidServiceParameters => "Crypto_Invalid_Service_Parameters",
            ErrorCode::CryptoServiceNotFound => "Crypto_Service_Not_Found",
            ErrorCode::CryptoInvalidTaggedDataList => "Crypto_Invalid_Tagged_Data_List",
            ErrorCode::CryptoEngineNotAvailable => "Crypto_Engine_Not_Available",
            ErrorCode::CryptoFunctionalityNotSupported => "Crypto_Functionality_Not_Supported",
            ErrorCode::CryptoEncryptionKeyNotSpecified => "Crypto_Encryption_Key_Not_Specified",
            ErrorCode::CryptoEncryptionContextNotSpecified => {
                "Crypto_Encryption_Context_Not_Specified"
            }
            ErrorCode::StorageUndefinedError => "Storage_Undefined_Error",
            ErrorCode::StorageCannotCommitValues => "Storage_Cannot_Commit_Values",
            ErrorCode::StorageLabeledValuesFailedToLoad => "Storage_Labeled_Values_Failed_To_Load",
            ErrorCode::StorageLabeledValuesNotFound => "Storage_Labeled_Values_Not_Found",
            ErrorCode::StorageLabelNotFoundCannotDelete => "Storage_Label_Not_Found_Cannot_Delete",
            ErrorCode::StorageErrorDeletingData => "Storage_Error_Deleting_Data",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_u32())
    }
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code.as_u32()
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        ErrorCode::from_u32(value).ok_or_else(|| format!("unknown error code {value}"))
    }
}

/// Error value crossing engine, storage and orchestrator boundaries.
///
/// Adapters translate backend failures into one of the [`ErrorCode`]
/// values at their call boundary; nothing else escapes to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub code: ErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageUndefinedError, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CryptoFunctionalityNotSupported, message)
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::GenericInvalidConfiguration, message)
    }
}

/// Result alias used across the service crates.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_values_are_stable() {
        assert_eq!(ErrorCode::None.as_u32(), 0);
        assert_eq!(ErrorCode::GenericInvalidConfiguration.as_u32(), 102);
        assert_eq!(ErrorCode::NetworkConnectionError.as_u32(), 1001);
        assert_eq!(ErrorCode::CryptoEncryptionContextNotSet.as_u32(), 2003);
        assert_eq!(ErrorCode::CryptoEncryptionContextNotSpecified.as_u32(), 2014);
        assert_eq!(ErrorCode::StorageErrorDeletingData.as_u32(), 3005);
    }

    #[test]
    fn groups_follow_ranges() {
        assert_eq!(ErrorCode::None.group(), ErrorGroup::None);
        assert_eq!(ErrorCode::GenericUndefinedError.group(), ErrorGroup::Generic);
        assert_eq!(ErrorCode::NetworkConnectionError.group(), ErrorGroup::Network);
        assert_eq!(ErrorCode::CryptoEngineNotAvailable.group(), ErrorGroup::Crypto);
        assert_eq!(ErrorCode::StorageCannotCommitValues.group(), ErrorGroup::Storage);
    }

    #[test]
    fn round_trips_through_u32() {
        for code in ALL_CODES {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), Some(code));
        }
        assert_eq!(ErrorCode::from_u32(4242), None);
    }

    #[test]
    fn serializes_as_number() {
        let json = serde_json::to_string(&ErrorCode::CryptoEngineNotAvailable).unwrap();
        assert_eq!(json, "2011");
        let code: ErrorCode = serde_json::from_str("3003").unwrap();
        assert_eq!(code, ErrorCode::StorageLabeledValuesNotFound);
        assert!(serde_json::from_str::<ErrorCode>("7").is_err());
    }

    #[test]
    fn service_error_display() {
        let err = ServiceError::new(ErrorCode::CryptoEncryptionContextNotSet, "empty item name");
        assert_eq!(
            err.to_string(),
            "Crypto_Encryption_Context_Not_Set (2003): empty item name"
        );
    }
}
