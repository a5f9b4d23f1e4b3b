//! A-XDR encoder

use crate::axdr::types::{encode_length, AxdrTag};
use dlms_core::datatypes::{CosemDateFormat, DataObject};

/// Appends A-XDR encoded values to an owned buffer
#[derive(Debug, Default)]
pub struct AxdrEncoder {
    buffer: Vec<u8>,
}

impl AxdrEncoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Encode a tagged value, recursing into containers
    pub fn encode_data_object(&mut self, value: &DataObject) {
        match value {
            DataObject::Null => self.encode_tag(AxdrTag::Null),
            DataObject::Boolean(b) => {
                self.encode_tag(AxdrTag::Boolean);
                self.encode_bool(*b);
            }
            DataObject::BitString(bs) => {
                self.encode_tag(AxdrTag::BitString);
                encode_length(bs.num_bits(), &mut self.buffer);
                self.buffer.extend_from_slice(bs.as_bytes());
            }
            DataObject::Integer32(v) => {
                self.encode_tag(AxdrTag::Integer32);
                self.buffer.extend(v.to_be_bytes());
            }
            DataObject::Unsigned32(v) => {
                self.encode_tag(AxdrTag::Unsigned32);
                self.encode_u32(*v);
            }
            DataObject::OctetString(bytes) => {
                self.encode_tag(AxdrTag::OctetString);
                self.encode_octet_string(bytes);
            }
            DataObject::VisibleString(bytes) => {
                self.encode_tag(AxdrTag::VisibleString);
                self.encode_octet_string(bytes);
            }
            DataObject::Utf8String(bytes) => {
                self.encode_tag(AxdrTag::Utf8String);
                self.encode_octet_string(bytes);
            }
            DataObject::Bcd(v) => {
                self.encode_tag(AxdrTag::Bcd);
                self.encode_u8(*v);
            }
            DataObject::Integer8(v) => {
                self.encode_tag(AxdrTag::Integer8);
                self.encode_i8(*v);
            }
            DataObject::Integer16(v) => {
                self.encode_tag(AxdrTag::Integer16);
                self.buffer.extend(v.to_be_bytes());
            }
            DataObject::Unsigned8(v) => {
                self.encode_tag(AxdrTag::Unsigned8);
                self.encode_u8(*v);
            }
            DataObject::Unsigned16(v) => {
                self.encode_tag(AxdrTag::Unsigned16);
                self.encode_u16(*v);
            }
            DataObject::Integer64(v) => {
                self.encode_tag(AxdrTag::Integer64);
                self.buffer.extend(v.to_be_bytes());
            }
            DataObject::Unsigned64(v) => {
                self.encode_tag(AxdrTag::Unsigned64);
                self.buffer.extend(v.to_be_bytes());
            }
            DataObject::Enumerate(v) => {
                self.encode_tag(AxdrTag::Enumerate);
                self.encode_u8(*v);
            }
            DataObject::Float32(v) => {
                self.encode_tag(AxdrTag::Float32);
                self.buffer.extend(v.to_be_bytes());
            }
            DataObject::Float64(v) => {
                self.encode_tag(AxdrTag::Float64);
                self.buffer.extend(v.to_be_bytes());
            }
            DataObject::DateTime(dt) => {
                self.encode_tag(AxdrTag::DateTime);
                self.buffer.extend(dt.encode());
            }
            DataObject::Date(d) => {
                self.encode_tag(AxdrTag::Date);
                self.buffer.extend(d.encode());
            }
            DataObject::Time(t) => {
                self.encode_tag(AxdrTag::Time);
                self.buffer.extend(t.encode());
            }
            DataObject::Array(items) => {
                self.encode_tag(AxdrTag::Array);
                self.encode_sequence(items);
            }
            DataObject::Structure(items) => {
                self.encode_tag(AxdrTag::Structure);
                self.encode_sequence(items);
            }
        }
    }

    fn encode_sequence(&mut self, items: &[DataObject]) {
        encode_length(items.len(), &mut self.buffer);
        for item in items {
            self.encode_data_object(item);
        }
    }

    pub fn encode_tag(&mut self, tag: AxdrTag) {
        self.buffer.push(tag.to_u8());
    }

    pub fn encode_bool(&mut self, value: bool) {
        self.buffer.push(if value { 0x01 } else { 0x00 });
    }

    pub fn encode_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn encode_i8(&mut self, value: i8) {
        self.buffer.push(value as u8);
    }

    pub fn encode_u16(&mut self, value: u16) {
        self.buffer.extend(value.to_be_bytes());
    }

    pub fn encode_u32(&mut self, value: u32) {
        self.buffer.extend(value.to_be_bytes());
    }

    pub fn encode_length(&mut self, len: usize) {
        encode_length(len, &mut self.buffer);
    }

    /// Length-prefixed raw bytes
    pub fn encode_octet_string(&mut self, bytes: &[u8]) {
        encode_length(bytes.len(), &mut self.buffer);
        self.buffer.extend_from_slice(bytes);
    }

    /// Raw bytes without any prefix
    pub fn encode_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

/// Encode a single value into a fresh buffer
pub fn encode_data_object(value: &DataObject) -> Vec<u8> {
    let mut encoder = AxdrEncoder::new();
    encoder.encode_data_object(value);
    encoder.into_bytes()
}
