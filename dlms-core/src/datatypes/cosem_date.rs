//! COSEM date type

use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte value meaning "not specified" in single-byte calendar fields
pub const NOT_SPECIFIED: u8 = 0xFF;
/// Year value meaning "not specified"
pub const YEAR_NOT_SPECIFIED: u16 = 0xFFFF;
/// Month value for "daylight saving end"
pub const DAYLIGHT_SAVINGS_END: u8 = 0xFD;
/// Month value for "daylight saving begin"
pub const DAYLIGHT_SAVINGS_BEGIN: u8 = 0xFE;
/// Day-of-month value for "second last day of month"
pub const SECOND_LAST_DAY_OF_MONTH: u8 = 0xFD;
/// Day-of-month value for "last day of month"
pub const LAST_DAY_OF_MONTH: u8 = 0xFE;

/// Shared behaviour of the fixed-width calendar encodings
pub trait CosemDateFormat: Sized {
    /// Encoded length in bytes, without the type tag
    const LENGTH: usize;

    fn encode(&self) -> Vec<u8>;

    /// Decode from exactly `LENGTH` bytes. Field values are kept as sent.
    fn decode(bytes: &[u8]) -> DlmsResult<Self>;
}

pub(crate) fn check_length(bytes: &[u8], expected: usize, what: &str) -> DlmsResult<()> {
    if bytes.len() != expected {
        return Err(DlmsError::InvalidData(format!(
            "{} needs {} bytes, got {}",
            what,
            expected,
            bytes.len()
        )));
    }
    Ok(())
}

pub(crate) fn specified<T: PartialEq>(value: T, sentinel: T) -> Option<T> {
    if value == sentinel { None } else { Some(value) }
}

/// COSEM date: year, month, day of month and day of week
///
/// Each field may hold its "not specified" sentinel. Decoding never coerces
/// a sentinel into a real value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CosemDate {
    year: u16,
    month: u8,
    day_of_month: u8,
    day_of_week: u8,
}

impl CosemDate {
    pub fn new(year: u16, month: u8, day_of_month: u8) -> DlmsResult<Self> {
        Self::new_with_day_of_week(year, month, day_of_month, NOT_SPECIFIED)
    }

    pub fn new_with_day_of_week(
        year: u16,
        month: u8,
        day_of_month: u8,
        day_of_week: u8,
    ) -> DlmsResult<Self> {
        if !(1..=12).contains(&month)
            && ![DAYLIGHT_SAVINGS_END, DAYLIGHT_SAVINGS_BEGIN, NOT_SPECIFIED].contains(&month)
        {
            return Err(DlmsError::InvalidData(format!("Invalid month {}", month)));
        }
        if !(1..=31).contains(&day_of_month)
            && ![SECOND_LAST_DAY_OF_MONTH, LAST_DAY_OF_MONTH, NOT_SPECIFIED].contains(&day_of_month)
        {
            return Err(DlmsError::InvalidData(format!(
                "Invalid day of month {}",
                day_of_month
            )));
        }
        if !(1..=7).contains(&day_of_week) && day_of_week != NOT_SPECIFIED {
            return Err(DlmsError::InvalidData(format!(
                "Invalid day of week {}",
                day_of_week
            )));
        }
        Ok(Self {
            year,
            month,
            day_of_month,
            day_of_week,
        })
    }

    /// A date with every field "not specified"
    pub fn unspecified() -> Self {
        Self {
            year: YEAR_NOT_SPECIFIED,
            month: NOT_SPECIFIED,
            day_of_month: NOT_SPECIFIED,
            day_of_week: NOT_SPECIFIED,
        }
    }

    pub fn year(&self) -> Option<u16> {
        specified(self.year, YEAR_NOT_SPECIFIED)
    }

    pub fn month(&self) -> Option<u8> {
        specified(self.month, NOT_SPECIFIED)
    }

    pub fn day_of_month(&self) -> Option<u8> {
        specified(self.day_of_month, NOT_SPECIFIED)
    }

    pub fn day_of_week(&self) -> Option<u8> {
        specified(self.day_of_week, NOT_SPECIFIED)
    }
}

impl CosemDateFormat for CosemDate {
    const LENGTH: usize = 5;

    fn encode(&self) -> Vec<u8> {
        let year = self.year.to_be_bytes();
        vec![year[0], year[1], self.month, self.day_of_month, self.day_of_week]
    }

    fn decode(bytes: &[u8]) -> DlmsResult<Self> {
        check_length(bytes, Self::LENGTH, "date")?;
        Ok(Self {
            year: u16::from_be_bytes([bytes[0], bytes[1]]),
            month: bytes[2],
            day_of_month: bytes[3],
            day_of_week: bytes[4],
        })
    }
}

fn write_field(f: &mut fmt::Formatter<'_>, value: Option<u8>, width: usize) -> fmt::Result {
    match value {
        Some(v) => write!(f, "{:0width$}", v, width = width),
        None => write!(f, "{}", "*".repeat(width)),
    }
}

impl fmt::Display for CosemDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year() {
            Some(y) => write!(f, "{:04}", y)?,
            None => write!(f, "****")?,
        }
        write!(f, "-")?;
        write_field(f, self.month(), 2)?;
        write!(f, "-")?;
        write_field(f, self.day_of_month(), 2)
    }
}
