//! COSEM time type

use crate::datatypes::cosem_date::{check_length, specified, CosemDateFormat, NOT_SPECIFIED};
use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// COSEM time: hour, minute, second and hundredths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CosemTime {
    hour: u8,
    minute: u8,
    second: u8,
    hundredths: u8,
}

impl CosemTime {
    pub fn new(hour: u8, minute: u8, second: u8) -> DlmsResult<Self> {
        Self::new_with_hundredths(hour, minute, second, NOT_SPECIFIED)
    }

    pub fn new_with_hundredths(hour: u8, minute: u8, second: u8, hundredths: u8) -> DlmsResult<Self> {
        let checks = [
            ("hour", hour, 23),
            ("minute", minute, 59),
            ("second", second, 59),
            ("hundredths", hundredths, 99),
        ];
        for (name, value, max) in checks {
            if value > max && value != NOT_SPECIFIED {
                return Err(DlmsError::InvalidData(format!("Invalid {} {}", name, value)));
            }
        }
        Ok(Self {
            hour,
            minute,
            second,
            hundredths,
        })
    }

    pub fn unspecified() -> Self {
        Self {
            hour: NOT_SPECIFIED,
            minute: NOT_SPECIFIED,
            second: NOT_SPECIFIED,
            hundredths: NOT_SPECIFIED,
        }
    }

    pub fn hour(&self) -> Option<u8> {
        specified(self.hour, NOT_SPECIFIED)
    }

    pub fn minute(&self) -> Option<u8> {
        specified(self.minute, NOT_SPECIFIED)
    }

    pub fn second(&self) -> Option<u8> {
        specified(self.second, NOT_SPECIFIED)
    }

    pub fn hundredths(&self) -> Option<u8> {
        specified(self.hundredths, NOT_SPECIFIED)
    }
}

impl CosemDateFormat for CosemTime {
    const LENGTH: usize = 4;

    fn encode(&self) -> Vec<u8> {
        vec![self.hour, self.minute, self.second, self.hundredths]
    }

    fn decode(bytes: &[u8]) -> DlmsResult<Self> {
        check_length(bytes, Self::LENGTH, "time")?;
        Ok(Self {
            hour: bytes[0],
            minute: bytes[1],
            second: bytes[2],
            hundredths: bytes[3],
        })
    }
}

impl fmt::Display for CosemTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [self.hour(), self.minute(), self.second()];
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            match part {
                Some(v) => write!(f, "{:02}", v)?,
                None => write!(f, "**")?,
            }
        }
        if let Some(h) = self.hundredths() {
            write!(f, ".{:02}", h)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_round_trip() {
        let time = CosemTime::new_with_hundredths(13, 8, 12, 0).unwrap();
        assert_eq!(time.encode(), vec![13, 8, 12, 0]);
        assert_eq!(CosemTime::decode(&time.encode()).unwrap(), time);
        assert_eq!(time.to_string(), "13:08:12.00");
    }

    #[test]
    fn test_time_validation() {
        assert!(CosemTime::new(24, 0, 0).is_err());
        assert!(CosemTime::new(NOT_SPECIFIED, 0, 0).is_ok());
        assert!(CosemTime::decode(&[1, 2, 3]).is_err());
    }
}
