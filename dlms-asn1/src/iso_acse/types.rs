//! ACSE field types and the DLMS object identifiers they carry

use crate::error::{DlmsError, DlmsResult};

/// Prefix of every DLMS UA object identifier: {joint-iso-ccitt(2) country(16)
/// country-name(756) identified-organization(5) DLMS-UA(8)}
const DLMS_UA: [u32; 5] = [2, 16, 756, 5, 8];

/// Application context name, {DLMS-UA application-context(1) n}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationContextName {
    LogicalNameNoCiphering = 1,
    ShortNameNoCiphering = 2,
    LogicalNameWithCiphering = 3,
    ShortNameWithCiphering = 4,
}

impl ApplicationContextName {
    pub fn oid(self) -> Vec<u32> {
        let mut oid = DLMS_UA.to_vec();
        oid.extend([1, self as u32]);
        oid
    }

    pub fn from_oid(oid: &[u32]) -> DlmsResult<Self> {
        match oid {
            [2, 16, 756, 5, 8, 1, 1] => Ok(Self::LogicalNameNoCiphering),
            [2, 16, 756, 5, 8, 1, 2] => Ok(Self::ShortNameNoCiphering),
            [2, 16, 756, 5, 8, 1, 3] => Ok(Self::LogicalNameWithCiphering),
            [2, 16, 756, 5, 8, 1, 4] => Ok(Self::ShortNameWithCiphering),
            _ => Err(DlmsError::Asn1Decoding(format!(
                "Unknown application context {:?}",
                oid
            ))),
        }
    }

    pub fn is_ciphered(self) -> bool {
        matches!(
            self,
            Self::LogicalNameWithCiphering | Self::ShortNameWithCiphering
        )
    }
}

/// Authentication mechanism name, {DLMS-UA authentication-mechanism-name(2) n}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MechanismName {
    Lowest = 0,
    Low = 1,
    High = 2,
    HighMd5 = 3,
    HighSha1 = 4,
    HighGmac = 5,
    HighSha256 = 6,
    HighEcdsa = 7,
}

impl MechanismName {
    pub fn oid(self) -> Vec<u32> {
        let mut oid = DLMS_UA.to_vec();
        oid.extend([2, self as u32]);
        oid
    }

    pub fn from_oid(oid: &[u32]) -> DlmsResult<Self> {
        let id = match oid {
            [2, 16, 756, 5, 8, 2, id] => *id,
            _ => {
                return Err(DlmsError::Asn1Decoding(format!(
                    "Unknown mechanism name {:?}",
                    oid
                )))
            }
        };
        Ok(match id {
            0 => Self::Lowest,
            1 => Self::Low,
            2 => Self::High,
            3 => Self::HighMd5,
            4 => Self::HighSha1,
            5 => Self::HighGmac,
            6 => Self::HighSha256,
            7 => Self::HighEcdsa,
            other => {
                return Err(DlmsError::Asn1Decoding(format!(
                    "Unknown mechanism id {}",
                    other
                )))
            }
        })
    }
}

/// Result field of the AARE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociateResult {
    Accepted = 0,
    RejectedPermanent = 1,
    RejectedTransient = 2,
}

impl AssociateResult {
    pub fn from_value(value: u32) -> DlmsResult<Self> {
        match value {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::RejectedPermanent),
            2 => Ok(Self::RejectedTransient),
            other => Err(DlmsError::Asn1Decoding(format!(
                "Invalid associate result {}",
                other
            ))),
        }
    }
}

/// Reason codes of the acse-service-user diagnostic
pub mod service_user {
    pub const NULL: u8 = 0;
    pub const NO_REASON_GIVEN: u8 = 1;
    pub const APPLICATION_CONTEXT_NAME_NOT_SUPPORTED: u8 = 2;
    pub const AUTHENTICATION_MECHANISM_NAME_NOT_RECOGNISED: u8 = 11;
    pub const AUTHENTICATION_MECHANISM_NAME_REQUIRED: u8 = 12;
    pub const AUTHENTICATION_FAILURE: u8 = 13;
    pub const AUTHENTICATION_REQUIRED: u8 = 14;
}

/// Result-source-diagnostic of the AARE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociateSourceDiagnostic {
    ServiceUser(u8),
    ServiceProvider(u8),
}

impl AssociateSourceDiagnostic {
    pub fn reason(self) -> u8 {
        match self {
            Self::ServiceUser(r) | Self::ServiceProvider(r) => r,
        }
    }
}

/// Reason field of the release request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseRequestReason {
    Normal = 0,
    Urgent = 1,
    UserDefined = 30,
}
