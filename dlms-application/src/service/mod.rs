//! Get, Set and Action service PDUs
//!
//! Every request starts with the service tag and a choice byte, followed by
//! the invoke-id-and-priority byte. Logical-name referencing only.

pub mod action;
pub mod get;
pub mod set;

pub use action::{ActionRequest, ActionResponse};
pub use get::{BlockAssembler, DataBlock, DataBlockResult, GetRequest, GetResponse};
pub use set::{SetRequest, SetResponse};

use crate::error::{DlmsError, DlmsResult};
use crate::selector::AccessSelector;
use dlms_asn1::{AxdrDecoder, AxdrEncoder};
use dlms_core::{DataAccessResult, DataObject, ObisCode};
use std::fmt;

const PRIORITY_HIGH: u8 = 0x80;
const SERVICE_CLASS_CONFIRMED: u8 = 0x40;

/// invoke-id-and-priority byte
///
/// Bits 0-3 carry the invoke id, bit 6 the confirmed service class, bit 7
/// the high priority flag. This client always asks for confirmed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvokeIdAndPriority(u8);

impl InvokeIdAndPriority {
    pub fn new(invoke_id: u8, high_priority: bool) -> DlmsResult<Self> {
        if invoke_id > 0x0F {
            return Err(DlmsError::InvalidData(format!(
                "Invoke id {} does not fit 4 bits",
                invoke_id
            )));
        }
        let priority = if high_priority { PRIORITY_HIGH } else { 0 };
        Ok(Self(priority | SERVICE_CLASS_CONFIRMED | invoke_id))
    }

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn to_byte(self) -> u8 {
        self.0
    }

    pub fn invoke_id(self) -> u8 {
        self.0 & 0x0F
    }

    pub fn is_high_priority(self) -> bool {
        self.0 & PRIORITY_HIGH != 0
    }
}

impl Default for InvokeIdAndPriority {
    /// 0xC1: invoke id 1, confirmed, high priority
    fn default() -> Self {
        Self(PRIORITY_HIGH | SERVICE_CLASS_CONFIRMED | 1)
    }
}

/// class-id, logical name, attribute-id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CosemAttributeDescriptor {
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub attribute_id: i8,
}

impl CosemAttributeDescriptor {
    pub fn new(class_id: u16, instance_id: ObisCode, attribute_id: i8) -> Self {
        Self {
            class_id,
            instance_id,
            attribute_id,
        }
    }

    pub(crate) fn encode(&self, encoder: &mut AxdrEncoder) {
        encoder.encode_u16(self.class_id);
        encoder.encode_raw(self.instance_id.as_bytes());
        encoder.encode_i8(self.attribute_id);
    }

    pub(crate) fn decode(decoder: &mut AxdrDecoder<'_>) -> DlmsResult<Self> {
        let class_id = decoder.decode_u16()?;
        let instance_id = ObisCode::from_bytes(decoder.decode_fixed_bytes(6)?)?;
        Ok(Self {
            class_id,
            instance_id,
            attribute_id: decoder.decode_i8()?,
        })
    }
}

impl fmt::Display for CosemAttributeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.class_id, self.instance_id, self.attribute_id)
    }
}

/// class-id, logical name, method-id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CosemMethodDescriptor {
    pub class_id: u16,
    pub instance_id: ObisCode,
    pub method_id: i8,
}

impl CosemMethodDescriptor {
    pub fn new(class_id: u16, instance_id: ObisCode, method_id: i8) -> Self {
        Self {
            class_id,
            instance_id,
            method_id,
        }
    }

    pub(crate) fn encode(&self, encoder: &mut AxdrEncoder) {
        encoder.encode_u16(self.class_id);
        encoder.encode_raw(self.instance_id.as_bytes());
        encoder.encode_i8(self.method_id);
    }

    pub(crate) fn decode(decoder: &mut AxdrDecoder<'_>) -> DlmsResult<Self> {
        let class_id = decoder.decode_u16()?;
        let instance_id = ObisCode::from_bytes(decoder.decode_fixed_bytes(6)?)?;
        Ok(Self {
            class_id,
            instance_id,
            method_id: decoder.decode_i8()?,
        })
    }
}

/// Attribute descriptor with its optional selective access
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeReference {
    pub descriptor: CosemAttributeDescriptor,
    pub access_selection: Option<AccessSelector>,
}

impl AttributeReference {
    pub fn new(descriptor: CosemAttributeDescriptor) -> Self {
        Self {
            descriptor,
            access_selection: None,
        }
    }

    pub fn with_selector(descriptor: CosemAttributeDescriptor, selector: AccessSelector) -> Self {
        Self {
            descriptor,
            access_selection: Some(selector),
        }
    }

    pub(crate) fn encode(&self, encoder: &mut AxdrEncoder) {
        self.descriptor.encode(encoder);
        match &self.access_selection {
            Some(selector) => {
                encoder.encode_u8(0x01);
                encoder.encode_u8(selector.selector_id());
                encoder.encode_data_object(&selector.to_parameters());
            }
            None => encoder.encode_u8(0x00),
        }
    }

    pub(crate) fn decode(decoder: &mut AxdrDecoder<'_>) -> DlmsResult<Self> {
        let descriptor = CosemAttributeDescriptor::decode(decoder)?;
        let access_selection = if decoder.decode_bool()? {
            let selector = decoder.decode_u8()?;
            let parameters = decoder.decode_data_object()?;
            Some(AccessSelector::from_parameters(selector, &parameters)?)
        } else {
            None
        };
        Ok(Self {
            descriptor,
            access_selection,
        })
    }
}

/// Get-Data-Result: a value or the reason there is none
#[derive(Debug, Clone, PartialEq)]
pub enum GetDataResult {
    Data(DataObject),
    DataAccessResult(DataAccessResult),
}

impl GetDataResult {
    pub(crate) fn encode(&self, encoder: &mut AxdrEncoder) {
        match self {
            GetDataResult::Data(value) => {
                encoder.encode_u8(0x00);
                encoder.encode_data_object(value);
            }
            GetDataResult::DataAccessResult(result) => {
                encoder.encode_u8(0x01);
                encoder.encode_u8(result.to_u8());
            }
        }
    }

    pub(crate) fn decode(decoder: &mut AxdrDecoder<'_>) -> DlmsResult<Self> {
        let offset = decoder.position();
        match decoder.decode_u8()? {
            0x00 => Ok(GetDataResult::Data(decoder.decode_data_object()?)),
            0x01 => Ok(GetDataResult::DataAccessResult(DataAccessResult::from_u8(
                decoder.decode_u8()?,
            ))),
            other => Err(DlmsError::decode(
                offset,
                format!("invalid Get-Data-Result choice {}", other),
            )),
        }
    }

    /// The value, or the access result as an error
    pub fn into_result(self) -> DlmsResult<DataObject> {
        match self {
            GetDataResult::Data(value) => Ok(value),
            GetDataResult::DataAccessResult(result) => Err(DlmsError::DataAccess(result)),
        }
    }
}

/// Decode a SEQUENCE OF count and check it against what is left
pub(crate) fn decode_count(decoder: &mut AxdrDecoder<'_>) -> DlmsResult<usize> {
    let offset = decoder.position();
    let (count, _) = decoder.decode_length()?;
    if count > decoder.remaining() {
        return Err(DlmsError::decode(
            offset,
            format!("list of {} items with {} bytes left", count, decoder.remaining()),
        ));
    }
    Ok(count)
}

/// Fail unless the whole APDU was consumed
pub(crate) fn expect_end(decoder: &AxdrDecoder<'_>, name: &str) -> DlmsResult<()> {
    if decoder.is_empty() {
        Ok(())
    } else {
        Err(DlmsError::decode(
            decoder.position(),
            format!("{} trailing bytes after {}", decoder.remaining(), name),
        ))
    }
}
