//! COSEM date-time type

use crate::datatypes::cosem_date::{check_length, CosemDate, CosemDateFormat};
use crate::datatypes::cosem_time::CosemTime;
use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Deviation value meaning "not specified" (0x8000 on the wire)
pub const DEVIATION_NOT_SPECIFIED: i16 = i16::MIN;

/// Clock status flags for COSEM date-time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStatus {
    InvalidValue = 0x01,
    DoubtfulValue = 0x02,
    DifferentClockBase = 0x04,
    InvalidClockStatus = 0x08,
    DaylightSavingActive = 0x80,
}

impl ClockStatus {
    const ALL: [ClockStatus; 5] = [
        ClockStatus::InvalidValue,
        ClockStatus::DoubtfulValue,
        ClockStatus::DifferentClockBase,
        ClockStatus::InvalidClockStatus,
        ClockStatus::DaylightSavingActive,
    ];

    pub fn to_byte(statuses: &[ClockStatus]) -> u8 {
        statuses.iter().fold(0u8, |acc, s| acc | *s as u8)
    }

    /// Known flags set in `byte`. Reserved bits are ignored here but kept
    /// in the raw value of the date-time.
    pub fn from_byte(byte: u8) -> Vec<ClockStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| byte & (*s as u8) != 0)
            .collect()
    }
}

/// COSEM date-time, the 12-byte calendar encoding
///
/// Deviation and clock status are carried as raw values. Their meaning
/// (sign convention of the deviation, vendor-specific status bits) differs
/// between devices, so no timezone arithmetic is done here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CosemDateTime {
    date: CosemDate,
    time: CosemTime,
    deviation: i16,
    clock_status: u8,
}

impl CosemDateTime {
    pub fn new(
        year: u16,
        month: u8,
        day_of_month: u8,
        hour: u8,
        minute: u8,
        second: u8,
        deviation: i16,
        clock_status: &[ClockStatus],
    ) -> DlmsResult<Self> {
        let date = CosemDate::new(year, month, day_of_month)?;
        let time = CosemTime::new(hour, minute, second)?;
        Self::from_date_time(date, time, deviation, ClockStatus::to_byte(clock_status))
    }

    pub fn from_date_time(
        date: CosemDate,
        time: CosemTime,
        deviation: i16,
        clock_status: u8,
    ) -> DlmsResult<Self> {
        if deviation != DEVIATION_NOT_SPECIFIED && !(-720..=720).contains(&deviation) {
            return Err(DlmsError::InvalidData(format!(
                "Deviation {} outside -720..=720",
                deviation
            )));
        }
        Ok(Self {
            date,
            time,
            deviation,
            clock_status,
        })
    }

    /// A date-time with every field "not specified"
    pub fn unspecified() -> Self {
        Self {
            date: CosemDate::unspecified(),
            time: CosemTime::unspecified(),
            deviation: DEVIATION_NOT_SPECIFIED,
            clock_status: 0xFF,
        }
    }

    pub fn date(&self) -> &CosemDate {
        &self.date
    }

    pub fn time(&self) -> &CosemTime {
        &self.time
    }

    /// Deviation in minutes as sent by the device
    pub fn deviation(&self) -> Option<i16> {
        if self.deviation == DEVIATION_NOT_SPECIFIED {
            None
        } else {
            Some(self.deviation)
        }
    }

    /// Raw clock status byte
    pub fn clock_status(&self) -> u8 {
        self.clock_status
    }

    pub fn clock_status_flags(&self) -> Vec<ClockStatus> {
        ClockStatus::from_byte(self.clock_status)
    }
}

impl CosemDateFormat for CosemDateTime {
    const LENGTH: usize = 12;

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LENGTH);
        out.extend(self.date.encode());
        out.extend(self.time.encode());
        out.extend(self.deviation.to_be_bytes());
        out.push(self.clock_status);
        out
    }

    fn decode(bytes: &[u8]) -> DlmsResult<Self> {
        check_length(bytes, Self::LENGTH, "date-time")?;
        Ok(Self {
            date: CosemDate::decode(&bytes[0..5])?,
            time: CosemTime::decode(&bytes[5..9])?,
            deviation: i16::from_be_bytes([bytes[9], bytes[10]]),
            clock_status: bytes[11],
        })
    }
}

impl fmt::Display for CosemDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time)?;
        if let Some(dev) = self.deviation() {
            write!(f, " dev={}", dev)?;
        }
        write!(f, " status=0x{:02X}", self.clock_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_value_from_meter() {
        // clock attribute 2 as written by a set-time request
        let raw = [0x07, 0xE0, 0x02, 0x1D, 0x01, 0x0D, 0x08, 0x0C, 0xFF, 0x80, 0x00, 0x00];
        let dt = CosemDateTime::decode(&raw).unwrap();
        assert_eq!(dt.date().year(), Some(2016));
        assert_eq!(dt.time().hour(), Some(13));
        assert_eq!(dt.time().hundredths(), None);
        assert_eq!(dt.deviation(), None);
        assert_eq!(dt.clock_status(), 0);
        assert_eq!(dt.encode(), raw.to_vec());
    }

    #[test]
    fn test_unspecified_round_trip() {
        let dt = CosemDateTime::unspecified();
        let bytes = dt.encode();
        assert_eq!(&bytes[9..11], &[0x80, 0x00]);
        assert_eq!(CosemDateTime::decode(&bytes).unwrap(), dt);
    }

    #[test]
    fn test_reserved_status_bits_preserved() {
        let mut raw = CosemDateTime::unspecified().encode();
        raw[11] = 0x41;
        let dt = CosemDateTime::decode(&raw).unwrap();
        assert_eq!(dt.clock_status(), 0x41);
        assert_eq!(dt.clock_status_flags(), vec![ClockStatus::InvalidValue]);
    }

    #[test]
    fn test_deviation_range() {
        let date = CosemDate::new(2024, 1, 1).unwrap();
        let time = CosemTime::new(0, 0, 0).unwrap();
        assert!(CosemDateTime::from_date_time(date, time, 721, 0).is_err());
        assert!(CosemDateTime::from_date_time(date, time, -60, 0).is_ok());
    }
}
