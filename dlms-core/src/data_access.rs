//! Data-access-result codes returned per item by the device

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data-access-result enumeration (IEC 62056-5-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataAccessResult {
    Success,
    HardwareFault,
    TemporaryFailure,
    ReadWriteDenied,
    ObjectUndefined,
    ObjectClassInconsistent,
    ObjectUnavailable,
    TypeUnmatched,
    ScopeOfAccessViolated,
    DataBlockUnavailable,
    LongGetAborted,
    NoLongGetInProgress,
    LongSetAborted,
    NoLongSetInProgress,
    DataBlockNumberInvalid,
    OtherReason,
    /// A code this client does not know, kept verbatim
    Unknown(u8),
}

impl DataAccessResult {
    pub fn from_u8(code: u8) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::HardwareFault,
            2 => Self::TemporaryFailure,
            3 => Self::ReadWriteDenied,
            4 => Self::ObjectUndefined,
            9 => Self::ObjectClassInconsistent,
            11 => Self::ObjectUnavailable,
            12 => Self::TypeUnmatched,
            13 => Self::ScopeOfAccessViolated,
            14 => Self::DataBlockUnavailable,
            15 => Self::LongGetAborted,
            16 => Self::NoLongGetInProgress,
            17 => Self::LongSetAborted,
            18 => Self::NoLongSetInProgress,
            19 => Self::DataBlockNumberInvalid,
            250 => Self::OtherReason,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::HardwareFault => 1,
            Self::TemporaryFailure => 2,
            Self::ReadWriteDenied => 3,
            Self::ObjectUndefined => 4,
            Self::ObjectClassInconsistent => 9,
            Self::ObjectUnavailable => 11,
            Self::TypeUnmatched => 12,
            Self::ScopeOfAccessViolated => 13,
            Self::DataBlockUnavailable => 14,
            Self::LongGetAborted => 15,
            Self::NoLongGetInProgress => 16,
            Self::LongSetAborted => 17,
            Self::NoLongSetInProgress => 18,
            Self::DataBlockNumberInvalid => 19,
            Self::OtherReason => 250,
            Self::Unknown(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for DataAccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "success",
            Self::HardwareFault => "hardware-fault",
            Self::TemporaryFailure => "temporary-failure",
            Self::ReadWriteDenied => "read-write-denied",
            Self::ObjectUndefined => "object-undefined",
            Self::ObjectClassInconsistent => "object-class-inconsistent",
            Self::ObjectUnavailable => "object-unavailable",
            Self::TypeUnmatched => "type-unmatched",
            Self::ScopeOfAccessViolated => "scope-of-access-violated",
            Self::DataBlockUnavailable => "data-block-unavailable",
            Self::LongGetAborted => "long-get-aborted",
            Self::NoLongGetInProgress => "no-long-get-in-progress",
            Self::LongSetAborted => "long-set-aborted",
            Self::NoLongSetInProgress => "no-long-set-in-progress",
            Self::DataBlockNumberInvalid => "data-block-number-invalid",
            Self::OtherReason => "other-reason",
            Self::Unknown(code) => return write!(f, "unknown({})", code),
        };
        write!(f, "{} ({})", name, self.to_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(DataAccessResult::from_u8(11), DataAccessResult::ObjectUnavailable);
        assert_eq!(DataAccessResult::ScopeOfAccessViolated.to_u8(), 13);
        assert!(DataAccessResult::from_u8(0).is_success());
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let result = DataAccessResult::from_u8(77);
        assert_eq!(result, DataAccessResult::Unknown(77));
        assert_eq!(result.to_u8(), 77);
        assert_eq!(result.to_string(), "unknown(77)");
    }
}
