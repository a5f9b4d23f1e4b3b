//! HDLC address fields
//!
//! Every address byte carries 7 bits of address and a stop bit in the
//! least significant position, set only on the last byte. A server address
//! is the upper (logical device) address optionally followed by the lower
//! (physical device) address; the client address is a single byte.

use crate::error::{DlmsError, DlmsResult};
use std::fmt;

/// Reserved addresses
pub mod reserved {
    pub const NO_STATION: u16 = 0x00;
    pub const CLIENT_MANAGEMENT_PROCESS: u16 = 0x01;
    pub const CLIENT_PUBLIC_CLIENT: u16 = 0x10;
    pub const SERVER_MANAGEMENT_LOGICAL_DEVICE: u16 = 0x01;
    pub const ALL_STATIONS_1BYTE: u16 = 0x7F;
    pub const ALL_STATIONS_2BYTE: u16 = 0x3FFF;
}

const ONE_BYTE_UPPER_BOUND: u16 = 0x7F;
const TWO_BYTE_UPPER_BOUND: u16 = 0x3FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HdlcAddress {
    byte_length: usize,
    logical_id: u16,
    physical_id: u16,
}

impl HdlcAddress {
    /// One-byte client address (client SAP)
    pub fn client(sap: u16) -> DlmsResult<Self> {
        if sap > ONE_BYTE_UPPER_BOUND {
            return Err(DlmsError::InvalidData(format!(
                "Client address 0x{:X} exceeds 0x{:02X}",
                sap, ONE_BYTE_UPPER_BOUND
            )));
        }
        Ok(Self {
            byte_length: 1,
            logical_id: sap,
            physical_id: 0,
        })
    }

    /// Server address of `byte_length` 1, 2 or 4
    ///
    /// A one-byte address carries only the logical device.
    pub fn server(logical_id: u16, physical_id: u16, byte_length: usize) -> DlmsResult<Self> {
        let bound = match byte_length {
            1 | 2 => ONE_BYTE_UPPER_BOUND,
            4 => TWO_BYTE_UPPER_BOUND,
            other => {
                return Err(DlmsError::InvalidData(format!(
                    "Server address length must be 1, 2 or 4, got {}",
                    other
                )))
            }
        };
        if logical_id > bound || physical_id > bound {
            return Err(DlmsError::InvalidData(format!(
                "Server address {}/{} does not fit in {} bytes",
                logical_id, physical_id, byte_length
            )));
        }
        if byte_length == 1 && physical_id != 0 {
            return Err(DlmsError::InvalidData(
                "One-byte server address cannot carry a physical device".to_string(),
            ));
        }
        Ok(Self {
            byte_length,
            logical_id,
            physical_id,
        })
    }

    pub fn logical_id(&self) -> u16 {
        self.logical_id
    }

    pub fn physical_id(&self) -> u16 {
        self.physical_id
    }

    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        match self.byte_length {
            1 => out.push((self.logical_id as u8) << 1),
            2 => {
                out.push((self.logical_id as u8) << 1);
                out.push((self.physical_id as u8) << 1);
            }
            _ => {
                for part in [self.logical_id, self.physical_id] {
                    out.push((((part >> 7) & 0x7F) as u8) << 1);
                    out.push(((part & 0x7F) as u8) << 1);
                }
            }
        }
        if let Some(last) = out.get_mut(start + self.byte_length - 1) {
            *last |= 1;
        }
    }

    /// Read an address up to and including the byte with the stop bit,
    /// returning it with the number of bytes consumed
    pub fn decode(data: &[u8]) -> DlmsResult<(Self, usize)> {
        let length = data
            .iter()
            .take(4)
            .position(|b| b & 1 == 1)
            .map(|p| p + 1)
            .ok_or_else(|| DlmsError::FrameInvalid("Address field without stop bit".to_string()))?;
        let group = |i: usize| (data[i] >> 1) as u16;
        let address = match length {
            1 => Self {
                byte_length: 1,
                logical_id: group(0),
                physical_id: 0,
            },
            2 => Self {
                byte_length: 2,
                logical_id: group(0),
                physical_id: group(1),
            },
            4 => Self {
                byte_length: 4,
                logical_id: group(0) << 7 | group(1),
                physical_id: group(2) << 7 | group(3),
            },
            other => {
                return Err(DlmsError::FrameInvalid(format!(
                    "Address field of invalid length {}",
                    other
                )))
            }
        };
        Ok((address, length))
    }
}

impl fmt::Display for HdlcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.byte_length == 1 {
            write!(f, "{}", self.logical_id)
        } else {
            write!(f, "{}/{}", self.logical_id, self.physical_id)
        }
    }
}

/// Source and destination of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HdlcAddressPair {
    source: HdlcAddress,
    destination: HdlcAddress,
}

impl HdlcAddressPair {
    pub fn new(source: HdlcAddress, destination: HdlcAddress) -> Self {
        Self {
            source,
            destination,
        }
    }

    pub fn source(&self) -> HdlcAddress {
        self.source
    }

    pub fn destination(&self) -> HdlcAddress {
        self.destination
    }

    /// The same pair seen from the other end
    pub fn swapped(&self) -> Self {
        Self {
            source: self.destination,
            destination: self.source,
        }
    }
}
