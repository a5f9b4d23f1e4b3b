//! A-XDR decoder

use crate::axdr::types::{decode_length, AxdrTag};
use crate::error::{DlmsError, DlmsResult};
use dlms_core::datatypes::*;

/// Maximum container nesting accepted from the wire
const MAX_DEPTH: usize = 32;

/// Cursor over an A-XDR encoded buffer
///
/// Errors raised while decoding a typed value are [`DlmsError::Decode`],
/// carrying the absolute byte offset and, inside containers, the element
/// path that failed.
pub struct AxdrDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> AxdrDecoder<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unconsumed bytes
    pub fn rest(&self) -> &'a [u8] {
        &self.buffer[self.position..]
    }

    /// Decode one tagged value
    pub fn decode_data_object(&mut self) -> DlmsResult<DataObject> {
        self.decode_nested(0)
    }

    fn decode_nested(&mut self, depth: usize) -> DlmsResult<DataObject> {
        let tag_offset = self.position;
        let raw_tag = self.decode_u8()?;
        let tag = AxdrTag::from_u8(raw_tag).ok_or_else(|| {
            DlmsError::decode(tag_offset, format!("unsupported type tag 0x{:02X}", raw_tag))
        })?;

        let value = match tag {
            AxdrTag::Null => DataObject::Null,
            AxdrTag::Boolean => DataObject::Boolean(self.decode_u8()? != 0),
            AxdrTag::BitString => {
                let (num_bits, _) = self.decode_length()?;
                let bytes = self.decode_fixed_bytes(num_bits.div_ceil(8))?;
                let offset = self.position;
                let bs = BitString::new(bytes.to_vec(), num_bits)
                    .map_err(|e| DlmsError::decode(offset, e.to_string()))?;
                DataObject::BitString(bs)
            }
            AxdrTag::Integer32 => DataObject::Integer32(i32::from_be_bytes(self.decode_array_of()?)),
            AxdrTag::Unsigned32 => DataObject::Unsigned32(self.decode_u32()?),
            AxdrTag::OctetString => DataObject::OctetString(self.decode_octet_string()?),
            AxdrTag::VisibleString => DataObject::VisibleString(self.decode_octet_string()?),
            AxdrTag::Utf8String => DataObject::Utf8String(self.decode_octet_string()?),
            AxdrTag::Bcd => DataObject::Bcd(self.decode_u8()?),
            AxdrTag::Integer8 => DataObject::Integer8(self.decode_u8()? as i8),
            AxdrTag::Integer16 => DataObject::Integer16(i16::from_be_bytes(self.decode_array_of()?)),
            AxdrTag::Unsigned8 => DataObject::Unsigned8(self.decode_u8()?),
            AxdrTag::Unsigned16 => DataObject::Unsigned16(self.decode_u16()?),
            AxdrTag::Integer64 => DataObject::Integer64(i64::from_be_bytes(self.decode_array_of()?)),
            AxdrTag::Unsigned64 => DataObject::Unsigned64(u64::from_be_bytes(self.decode_array_of()?)),
            AxdrTag::Enumerate => DataObject::Enumerate(self.decode_u8()?),
            AxdrTag::Float32 => DataObject::Float32(f32::from_be_bytes(self.decode_array_of()?)),
            AxdrTag::Float64 => DataObject::Float64(f64::from_be_bytes(self.decode_array_of()?)),
            AxdrTag::DateTime => {
                DataObject::DateTime(self.decode_calendar::<CosemDateTime>()?)
            }
            AxdrTag::Date => DataObject::Date(self.decode_calendar::<CosemDate>()?),
            AxdrTag::Time => DataObject::Time(self.decode_calendar::<CosemTime>()?),
            AxdrTag::Array => DataObject::Array(self.decode_sequence(depth, tag_offset)?),
            AxdrTag::Structure => DataObject::Structure(self.decode_sequence(depth, tag_offset)?),
        };
        Ok(value)
    }

    fn decode_sequence(&mut self, depth: usize, tag_offset: usize) -> DlmsResult<Vec<DataObject>> {
        if depth >= MAX_DEPTH {
            return Err(DlmsError::decode(tag_offset, "containers nested too deeply"));
        }
        let (count, _) = self.decode_length()?;
        // every element takes at least one byte
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for index in 0..count {
            let item = self
                .decode_nested(depth + 1)
                .map_err(|e| e.within_element(index))?;
            items.push(item);
        }
        Ok(items)
    }

    fn decode_calendar<T: CosemDateFormat>(&mut self) -> DlmsResult<T> {
        let offset = self.position;
        let bytes = self.decode_fixed_bytes(T::LENGTH)?;
        T::decode(bytes).map_err(|e| DlmsError::decode(offset, e.to_string()))
    }

    fn truncated(&self, wanted: usize) -> DlmsError {
        DlmsError::decode(
            self.position,
            format!("needs {} more bytes, {} left", wanted, self.remaining()),
        )
    }

    pub fn decode_fixed_bytes(&mut self, len: usize) -> DlmsResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.truncated(len));
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    fn decode_array_of<const N: usize>(&mut self) -> DlmsResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.decode_fixed_bytes(N)?);
        Ok(out)
    }

    pub fn decode_u8(&mut self) -> DlmsResult<u8> {
        Ok(self.decode_fixed_bytes(1)?[0])
    }

    pub fn decode_i8(&mut self) -> DlmsResult<i8> {
        Ok(self.decode_u8()? as i8)
    }

    pub fn decode_bool(&mut self) -> DlmsResult<bool> {
        Ok(self.decode_u8()? != 0)
    }

    pub fn decode_u16(&mut self) -> DlmsResult<u16> {
        Ok(u16::from_be_bytes(self.decode_array_of()?))
    }

    pub fn decode_u32(&mut self) -> DlmsResult<u32> {
        Ok(u32::from_be_bytes(self.decode_array_of()?))
    }

    /// Decode a length prefix, returning the length and its encoded size
    pub fn decode_length(&mut self) -> DlmsResult<(usize, usize)> {
        let offset = self.position;
        let (len, consumed) = decode_length(self.rest())
            .map_err(|e| DlmsError::decode(offset, e.to_string()))?;
        self.position += consumed;
        Ok((len, consumed))
    }

    pub fn decode_octet_string(&mut self) -> DlmsResult<Vec<u8>> {
        let (len, _) = self.decode_length()?;
        Ok(self.decode_fixed_bytes(len)?.to_vec())
    }
}

/// Decode exactly one value from `bytes`, rejecting trailing data
pub fn decode_data_object(bytes: &[u8]) -> DlmsResult<DataObject> {
    let mut decoder = AxdrDecoder::new(bytes);
    let value = decoder.decode_data_object()?;
    if !decoder.is_empty() {
        return Err(DlmsError::decode(
            decoder.position(),
            format!("{} trailing bytes after value", decoder.remaining()),
        ));
    }
    Ok(value)
}
