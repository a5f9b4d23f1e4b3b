use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OBIS code, the 6-byte instance identifier of a COSEM object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObisCode {
    bytes: [u8; 6],
}

impl ObisCode {
    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self {
            bytes: [a, b, c, d, e, f],
        }
    }

    /// Logical name of the "current association" object (class 15)
    pub const CURRENT_ASSOCIATION: ObisCode = ObisCode::new(0, 0, 40, 0, 0, 255);

    /// Parse an OBIS code from its textual form
    ///
    /// Accepts the dotted form `1.0.99.1.0.255` and the reduced form
    /// `1-0:99.1.0*255`. In the reduced form a missing `*F` defaults to 255.
    pub fn from_string(s: &str) -> DlmsResult<Self> {
        let s = s.trim();
        if s.contains(':') || s.contains('-') || s.contains('*') {
            Self::parse_reduced_format(s)
        } else {
            Self::parse_dot_format(s)
        }
    }

    fn parse_part(part: &str) -> DlmsResult<u8> {
        part.trim()
            .parse::<u8>()
            .map_err(|_| DlmsError::InvalidData(format!("Invalid OBIS value group: {:?}", part)))
    }

    fn parse_dot_format(s: &str) -> DlmsResult<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 6 {
            return Err(DlmsError::InvalidData(format!(
                "Expected 6 dot-separated value groups in {:?}",
                s
            )));
        }
        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            *slot = Self::parse_part(part)?;
        }
        Ok(Self { bytes })
    }

    fn parse_reduced_format(s: &str) -> DlmsResult<Self> {
        let (ab, rest) = s
            .split_once(':')
            .ok_or_else(|| DlmsError::InvalidData(format!("Missing ':' in OBIS code {:?}", s)))?;
        let (a, b) = ab
            .split_once('-')
            .ok_or_else(|| DlmsError::InvalidData(format!("Missing '-' in OBIS code {:?}", s)))?;
        let (cde, f) = match rest.split_once('*') {
            Some((cde, f)) => (cde, Self::parse_part(f)?),
            None => (rest, 255),
        };
        let cde: Vec<&str> = cde.split('.').collect();
        if cde.len() != 3 {
            return Err(DlmsError::InvalidData(format!(
                "Expected C.D.E value groups in OBIS code {:?}",
                s
            )));
        }
        Ok(Self::new(
            Self::parse_part(a)?,
            Self::parse_part(b)?,
            Self::parse_part(cde[0])?,
            Self::parse_part(cde[1])?,
            Self::parse_part(cde[2])?,
            f,
        ))
    }

    pub fn from_bytes(bytes: &[u8]) -> DlmsResult<Self> {
        let bytes: [u8; 6] = bytes.try_into().map_err(|_| {
            DlmsError::InvalidData(format!("OBIS code needs 6 bytes, got {}", bytes.len()))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.bytes
    }

    pub fn to_bytes(&self) -> [u8; 6] {
        self.bytes
    }
}

impl From<[u8; 6]> for ObisCode {
    fn from(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }
}

impl FromStr for ObisCode {
    type Err = DlmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(f, "{}.{}.{}.{}.{}.{}", b[0], b[1], b[2], b[3], b[4], b[5])
    }
}
