//! Typed value model

use crate::datatypes::bit_string::BitString;
use crate::datatypes::cosem_date::{CosemDate, CosemDateFormat};
use crate::datatypes::cosem_date_time::CosemDateTime;
use crate::datatypes::cosem_time::CosemTime;
use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed value exchanged with a meter
///
/// Closed set of A-XDR data kinds. Containers always hold fully decoded
/// children; there is no partially decoded state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataObject {
    Null,
    Boolean(bool),
    BitString(BitString),
    /// double-long
    Integer32(i32),
    /// double-long-unsigned
    Unsigned32(u32),
    OctetString(Vec<u8>),
    VisibleString(Vec<u8>),
    Utf8String(Vec<u8>),
    Bcd(u8),
    /// integer
    Integer8(i8),
    /// long
    Integer16(i16),
    /// unsigned
    Unsigned8(u8),
    /// long-unsigned
    Unsigned16(u16),
    Integer64(i64),
    Unsigned64(u64),
    Enumerate(u8),
    Float32(f32),
    Float64(f64),
    DateTime(CosemDateTime),
    Date(CosemDate),
    Time(CosemTime),
    /// Homogeneous sequence
    Array(Vec<DataObject>),
    /// Heterogeneous sequence
    Structure(Vec<DataObject>),
}

/// Kind of a [`DataObject`], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataObjectType {
    NullData,
    Boolean,
    BitString,
    DoubleLong,
    DoubleLongUnsigned,
    OctetString,
    VisibleString,
    Utf8String,
    Bcd,
    Integer,
    Long,
    Unsigned,
    LongUnsigned,
    Long64,
    Long64Unsigned,
    Enumerate,
    Float32,
    Float64,
    DateTime,
    Date,
    Time,
    Array,
    Structure,
}

impl DataObject {
    pub fn get_type(&self) -> DataObjectType {
        match self {
            DataObject::Null => DataObjectType::NullData,
            DataObject::Boolean(_) => DataObjectType::Boolean,
            DataObject::BitString(_) => DataObjectType::BitString,
            DataObject::Integer32(_) => DataObjectType::DoubleLong,
            DataObject::Unsigned32(_) => DataObjectType::DoubleLongUnsigned,
            DataObject::OctetString(_) => DataObjectType::OctetString,
            DataObject::VisibleString(_) => DataObjectType::VisibleString,
            DataObject::Utf8String(_) => DataObjectType::Utf8String,
            DataObject::Bcd(_) => DataObjectType::Bcd,
            DataObject::Integer8(_) => DataObjectType::Integer,
            DataObject::Integer16(_) => DataObjectType::Long,
            DataObject::Unsigned8(_) => DataObjectType::Unsigned,
            DataObject::Unsigned16(_) => DataObjectType::LongUnsigned,
            DataObject::Integer64(_) => DataObjectType::Long64,
            DataObject::Unsigned64(_) => DataObjectType::Long64Unsigned,
            DataObject::Enumerate(_) => DataObjectType::Enumerate,
            DataObject::Float32(_) => DataObjectType::Float32,
            DataObject::Float64(_) => DataObjectType::Float64,
            DataObject::DateTime(_) => DataObjectType::DateTime,
            DataObject::Date(_) => DataObjectType::Date,
            DataObject::Time(_) => DataObjectType::Time,
            DataObject::Array(_) => DataObjectType::Array,
            DataObject::Structure(_) => DataObjectType::Structure,
        }
    }

    /// Build an array, checking that every element has the same kind
    pub fn new_array(elements: Vec<DataObject>) -> DlmsResult<Self> {
        if let Some(first) = elements.first() {
            let kind = first.get_type();
            if let Some((index, odd)) = elements
                .iter()
                .enumerate()
                .find(|(_, e)| e.get_type() != kind)
            {
                return Err(DlmsError::InvalidData(format!(
                    "Array is of type {:?}, but element at {} is of type {:?}",
                    kind,
                    index,
                    odd.get_type()
                )));
            }
        }
        Ok(DataObject::Array(elements))
    }

    pub fn new_structure(elements: Vec<DataObject>) -> Self {
        DataObject::Structure(elements)
    }

    pub fn new_visible_string(s: &str) -> Self {
        DataObject::VisibleString(s.as_bytes().to_vec())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataObject::Null)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DataObject::Array(_) | DataObject::Structure(_))
    }

    fn type_error<T>(&self, expected: &str) -> DlmsResult<T> {
        Err(DlmsError::InvalidData(format!(
            "Expected {}, got {:?}",
            expected,
            self.get_type()
        )))
    }

    pub fn as_bool(&self) -> DlmsResult<bool> {
        match self {
            DataObject::Boolean(b) => Ok(*b),
            _ => self.type_error("Boolean"),
        }
    }

    pub fn as_octet_string(&self) -> DlmsResult<&[u8]> {
        match self {
            DataObject::OctetString(s) => Ok(s),
            _ => self.type_error("OctetString"),
        }
    }

    pub fn as_array(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Array(a) => Ok(a),
            _ => self.type_error("Array"),
        }
    }

    pub fn as_structure(&self) -> DlmsResult<&[DataObject]> {
        match self {
            DataObject::Structure(s) => Ok(s),
            _ => self.type_error("Structure"),
        }
    }

    /// Integral value widened to i128, for any integer-like kind
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            DataObject::Integer8(v) => Some(*v as i128),
            DataObject::Integer16(v) => Some(*v as i128),
            DataObject::Integer32(v) => Some(*v as i128),
            DataObject::Integer64(v) => Some(*v as i128),
            DataObject::Unsigned8(v) | DataObject::Enumerate(v) => Some(*v as i128),
            DataObject::Unsigned16(v) => Some(*v as i128),
            DataObject::Unsigned32(v) => Some(*v as i128),
            DataObject::Unsigned64(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Date-time value, also accepted when carried as a 12-byte octet-string
    ///
    /// Many meters report profile timestamps and the clock as octet-strings.
    pub fn as_date_time(&self) -> DlmsResult<CosemDateTime> {
        match self {
            DataObject::DateTime(dt) => Ok(*dt),
            DataObject::OctetString(bytes) if bytes.len() == CosemDateTime::LENGTH => {
                CosemDateTime::decode(bytes)
            }
            _ => self.type_error("DateTime"),
        }
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataObject::Null => write!(f, "null"),
            DataObject::Boolean(b) => write!(f, "{}", b),
            DataObject::BitString(bs) => write!(f, "b'{}'", bs),
            DataObject::Integer8(v) => write!(f, "{}", v),
            DataObject::Integer16(v) => write!(f, "{}", v),
            DataObject::Integer32(v) => write!(f, "{}", v),
            DataObject::Integer64(v) => write!(f, "{}", v),
            DataObject::Unsigned8(v) | DataObject::Bcd(v) => write!(f, "{}", v),
            DataObject::Unsigned16(v) => write!(f, "{}", v),
            DataObject::Unsigned32(v) => write!(f, "{}", v),
            DataObject::Unsigned64(v) => write!(f, "{}", v),
            DataObject::Enumerate(v) => write!(f, "enum({})", v),
            DataObject::Float32(v) => write!(f, "{}", v),
            DataObject::Float64(v) => write!(f, "{}", v),
            DataObject::OctetString(bytes) => {
                for byte in bytes {
                    write!(f, "{:02X}", byte)?;
                }
                Ok(())
            }
            DataObject::VisibleString(s) | DataObject::Utf8String(s) => {
                write!(f, "{:?}", String::from_utf8_lossy(s))
            }
            DataObject::DateTime(dt) => write!(f, "{}", dt),
            DataObject::Date(d) => write!(f, "{}", d),
            DataObject::Time(t) => write!(f, "{}", t),
            DataObject::Array(items) | DataObject::Structure(items) => {
                let (open, close) = if matches!(self, DataObject::Array(_)) {
                    ('[', ']')
                } else {
                    ('{', '}')
                };
                write!(f, "{}", open)?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "{}", close)
            }
        }
    }
}
