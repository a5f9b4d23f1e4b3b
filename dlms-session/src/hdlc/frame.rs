//! HDLC frame format type 3 encoding and decoding
//!
//! ```text
//! 7E | A0|S|len | dst | src | ctrl | HCS | info | FCS | 7E
//! ```
//! The HCS is present only when there is an information field.

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::address::{HdlcAddress, HdlcAddressPair};
use crate::hdlc::fcs;
use std::fmt;

pub const FLAG: u8 = 0x7E;

/// LLC header in front of every client APDU
pub const LLC_REQUEST: [u8; 3] = [0xE6, 0xE6, 0x00];
/// LLC header in front of every server APDU
pub const LLC_RESPONSE: [u8; 3] = [0xE6, 0xE7, 0x00];

/// Largest value the 11-bit length field can hold
pub const MAX_FRAME_LENGTH: usize = 0x7FF;

const FORMAT_TYPE_3: u8 = 0xA0;
const SEGMENTATION_BIT: u8 = 0x08;
const POLL_FINAL: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Information { send_seq: u8, recv_seq: u8 },
    ReceiveReady { recv_seq: u8 },
    ReceiveNotReady { recv_seq: u8 },
    SetNormalResponseMode,
    Disconnect,
    UnnumberedAcknowledge,
    DisconnectMode,
    FrameReject,
    UnnumberedInformation,
}

impl FrameType {
    pub fn from_control_byte(control: u8) -> DlmsResult<Self> {
        let recv_seq = (control >> 5) & 0x07;
        let frame_type = if control & 0x01 == 0 {
            FrameType::Information {
                send_seq: (control >> 1) & 0x07,
                recv_seq,
            }
        } else {
            match control & !POLL_FINAL {
                c if c & 0x0F == 0x01 => FrameType::ReceiveReady { recv_seq },
                c if c & 0x0F == 0x05 => FrameType::ReceiveNotReady { recv_seq },
                0x83 => FrameType::SetNormalResponseMode,
                0x43 => FrameType::Disconnect,
                0x63 => FrameType::UnnumberedAcknowledge,
                0x0F => FrameType::DisconnectMode,
                0x87 => FrameType::FrameReject,
                0x03 => FrameType::UnnumberedInformation,
                _ => {
                    return Err(DlmsError::FrameInvalid(format!(
                        "Unknown control field 0x{:02X}",
                        control
                    )))
                }
            }
        };
        Ok(frame_type)
    }

    /// Control byte with the poll/final bit as given
    pub fn to_control_byte(&self, poll_final: bool) -> u8 {
        let base = match *self {
            FrameType::Information { send_seq, recv_seq } => {
                ((recv_seq & 0x07) << 5) | ((send_seq & 0x07) << 1)
            }
            FrameType::ReceiveReady { recv_seq } => ((recv_seq & 0x07) << 5) | 0x01,
            FrameType::ReceiveNotReady { recv_seq } => ((recv_seq & 0x07) << 5) | 0x05,
            FrameType::SetNormalResponseMode => 0x83,
            FrameType::Disconnect => 0x43,
            FrameType::UnnumberedAcknowledge => 0x63,
            FrameType::DisconnectMode => 0x0F,
            FrameType::FrameReject => 0x87,
            FrameType::UnnumberedInformation => 0x03,
        };
        if poll_final {
            base | POLL_FINAL
        } else {
            base
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HdlcFrame {
    address_pair: HdlcAddressPair,
    frame_type: FrameType,
    poll_final: bool,
    segmented: bool,
    information_field: Vec<u8>,
}

impl HdlcFrame {
    /// Control frame with the poll/final bit set
    pub fn new(address_pair: HdlcAddressPair, frame_type: FrameType, information: Vec<u8>) -> Self {
        Self {
            address_pair,
            frame_type,
            poll_final: true,
            segmented: false,
            information_field: information,
        }
    }

    /// I-frame; `segmented` marks every segment but the last
    pub fn new_information(
        address_pair: HdlcAddressPair,
        information: Vec<u8>,
        send_seq: u8,
        recv_seq: u8,
        segmented: bool,
    ) -> Self {
        Self {
            address_pair,
            frame_type: FrameType::Information { send_seq, recv_seq },
            poll_final: true,
            segmented,
            information_field: information,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn information_field(&self) -> &[u8] {
        &self.information_field
    }

    pub fn into_information_field(self) -> Vec<u8> {
        self.information_field
    }

    pub fn is_segmented(&self) -> bool {
        self.segmented
    }

    pub fn poll_final(&self) -> bool {
        self.poll_final
    }

    pub fn address_pair(&self) -> HdlcAddressPair {
        self.address_pair
    }

    /// Whole frame including both flags
    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let mut body = Vec::with_capacity(16 + self.information_field.len());
        body.extend([0, 0]);
        self.address_pair.destination().encode(&mut body);
        self.address_pair.source().encode(&mut body);
        body.push(self.frame_type.to_control_byte(self.poll_final));

        // frame format, both addresses, control, HCS/FCS bytes
        let length = body.len()
            + 2
            + if self.information_field.is_empty() {
                0
            } else {
                2 + self.information_field.len()
            };
        if length > MAX_FRAME_LENGTH {
            return Err(DlmsError::FrameInvalid(format!(
                "Frame length {} exceeds {}",
                length, MAX_FRAME_LENGTH
            )));
        }
        let mut format = FORMAT_TYPE_3 | ((length >> 8) as u8 & 0x07);
        if self.segmented {
            format |= SEGMENTATION_BIT;
        }
        body[0] = format;
        body[1] = (length & 0xFF) as u8;

        if !self.information_field.is_empty() {
            let hcs = fcs::checksum(&body);
            body.extend(hcs);
            body.extend_from_slice(&self.information_field);
        }
        let fcs = fcs::checksum(&body);
        body.extend(fcs);

        let mut out = Vec::with_capacity(body.len() + 2);
        out.push(FLAG);
        out.extend(body);
        out.push(FLAG);
        Ok(out)
    }

    /// Decode one frame including both flags
    pub fn decode(frame: &[u8]) -> DlmsResult<Self> {
        if frame.len() < 9 {
            return Err(DlmsError::FrameInvalid(format!(
                "Frame of {} bytes is too short",
                frame.len()
            )));
        }
        if frame[0] != FLAG || frame[frame.len() - 1] != FLAG {
            return Err(DlmsError::FrameInvalid("Frame not delimited by flags".to_string()));
        }
        let body = &frame[1..frame.len() - 1];
        if body[0] & 0xF0 != FORMAT_TYPE_3 {
            return Err(DlmsError::FrameInvalid(format!(
                "Illegal frame format 0x{:02X}",
                body[0]
            )));
        }
        let length = frame_length(body[0], body[1]);
        if length != body.len() {
            return Err(DlmsError::FrameInvalid(format!(
                "Length field says {} bytes, frame has {}",
                length,
                body.len()
            )));
        }
        fcs::verify(body)?;
        let segmented = body[0] & SEGMENTATION_BIT != 0;

        let mut pos = 2;
        let (destination, used) = HdlcAddress::decode(&body[pos..])?;
        pos += used;
        let (source, used) = HdlcAddress::decode(&body[pos..])?;
        pos += used;
        let control = *body
            .get(pos)
            .ok_or_else(|| DlmsError::FrameInvalid("Frame ends before control field".to_string()))?;
        pos += 1;
        let frame_type = FrameType::from_control_byte(control)?;

        let fcs_start = body.len() - 2;
        if pos > fcs_start {
            return Err(DlmsError::FrameInvalid("Header overlaps the FCS".to_string()));
        }
        let information_field = match fcs_start - pos {
            0 => Vec::new(),
            1 => {
                return Err(DlmsError::FrameInvalid(
                    "Dangling byte between header and FCS".to_string(),
                ))
            }
            _ => {
                fcs::verify(&body[..pos + 2])?;
                body[pos + 2..fcs_start].to_vec()
            }
        };

        Ok(Self {
            address_pair: HdlcAddressPair::new(source, destination),
            frame_type,
            poll_final: control & POLL_FINAL != 0,
            segmented,
            information_field,
        })
    }
}

/// 11-bit length carried by the two frame format bytes
pub fn frame_length(format_high: u8, format_low: u8) -> usize {
    (((format_high & 0x07) as usize) << 8) | format_low as usize
}

impl fmt::Display for HdlcFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} -> {} ({} info bytes{})",
            self.frame_type,
            self.address_pair.source(),
            self.address_pair.destination(),
            self.information_field.len(),
            if self.segmented { ", segmented" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> HdlcAddressPair {
        HdlcAddressPair::new(
            HdlcAddress::client(0x10).unwrap(),
            HdlcAddress::server(1, 0, 1).unwrap(),
        )
    }

    #[test]
    fn test_control_bytes() {
        assert_eq!(FrameType::SetNormalResponseMode.to_control_byte(true), 0x93);
        assert_eq!(FrameType::Disconnect.to_control_byte(true), 0x53);
        assert_eq!(FrameType::UnnumberedAcknowledge.to_control_byte(true), 0x73);
        assert_eq!(FrameType::UnnumberedInformation.to_control_byte(true), 0x13);
        assert_eq!(
            FrameType::Information { send_seq: 0, recv_seq: 0 }.to_control_byte(true),
            0x10
        );
        assert_eq!(
            FrameType::Information { send_seq: 1, recv_seq: 2 }.to_control_byte(true),
            0x52
        );
        assert_eq!(FrameType::ReceiveReady { recv_seq: 1 }.to_control_byte(true), 0x31);
        assert_eq!(
            FrameType::from_control_byte(0x1F).unwrap(),
            FrameType::DisconnectMode
        );
        assert_eq!(
            FrameType::from_control_byte(0x74).unwrap(),
            FrameType::Information { send_seq: 2, recv_seq: 3 }
        );
        assert!(FrameType::from_control_byte(0xFF).is_err());
    }

    #[test]
    fn test_snrm_wire_bytes() {
        let pair = HdlcAddressPair::new(
            HdlcAddress::client(0x10).unwrap(),
            HdlcAddress::server(1, 0, 1).unwrap(),
        );
        let snrm = HdlcFrame::new(pair, FrameType::SetNormalResponseMode, Vec::new());
        assert_eq!(
            snrm.encode().unwrap(),
            vec![0x7E, 0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x01, 0x7E]
        );
    }

    #[test]
    fn test_information_round_trip() {
        let payload: Vec<u8> = LLC_REQUEST
            .iter()
            .copied()
            .chain([0xC0, 0x01, 0xC1, 0x00, 0x08, 0, 0, 1, 0, 0, 0xFF, 0x02, 0x00])
            .collect();
        for (ns, nr) in [(0, 0), (3, 5), (7, 7)] {
            let frame = HdlcFrame::new_information(pair(), payload.clone(), ns, nr, false);
            let bytes = frame.encode().unwrap();
            let decoded = HdlcFrame::decode(&bytes).unwrap();
            assert_eq!(decoded.information_field(), payload.as_slice());
            assert_eq!(
                decoded.frame_type(),
                FrameType::Information { send_seq: ns, recv_seq: nr }
            );
            assert_eq!(decoded.address_pair(), pair());
        }
    }

    #[test]
    fn test_any_corrupted_byte_is_rejected() {
        let frame = HdlcFrame::new_information(pair(), b"\xE6\xE6\x00payload".to_vec(), 2, 1, true);
        let bytes = frame.encode().unwrap();
        for index in 0..bytes.len() {
            for mask in [0x01u8, 0x80, 0xFF] {
                let mut corrupted = bytes.clone();
                corrupted[index] ^= mask;
                assert!(
                    matches!(HdlcFrame::decode(&corrupted), Err(DlmsError::FrameInvalid(_))),
                    "byte {} mask {:02X} accepted",
                    index,
                    mask
                );
            }
        }
    }

    #[test]
    fn test_segmentation_bit_and_length() {
        let info = vec![0x55; 300];
        let bytes = HdlcFrame::new_information(pair(), info, 0, 0, true)
            .encode()
            .unwrap();
        assert_eq!(bytes[1] & 0x08, 0x08);
        assert_eq!(frame_length(bytes[1], bytes[2]), bytes.len() - 2);
        assert!(HdlcFrame::decode(&bytes).unwrap().is_segmented());
    }

    #[test]
    fn test_oversized_frame() {
        let frame = HdlcFrame::new_information(pair(), vec![0; 2100], 0, 0, false);
        assert!(frame.encode().is_err());
    }
}
