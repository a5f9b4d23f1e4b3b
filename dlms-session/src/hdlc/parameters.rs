//! Link configuration and the SNRM/UA parameter negotiation field

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::address::HdlcAddress;
use std::time::Duration;

const FORMAT_IDENTIFIER: u8 = 0x81;
const GROUP_IDENTIFIER: u8 = 0x80;
const MAX_INFO_TX: u8 = 0x05;
const MAX_INFO_RX: u8 = 0x06;
const WINDOW_TX: u8 = 0x07;
const WINDOW_RX: u8 = 0x08;

/// Frame size and window limits, from the client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdlcParameters {
    pub max_information_field_length_tx: u16,
    pub max_information_field_length_rx: u16,
    pub window_size_tx: u8,
    pub window_size_rx: u8,
}

impl Default for HdlcParameters {
    fn default() -> Self {
        Self {
            max_information_field_length_tx: 128,
            max_information_field_length_rx: 128,
            window_size_tx: 1,
            window_size_rx: 1,
        }
    }
}

impl HdlcParameters {
    /// Information field of the SNRM proposing these limits
    pub fn encode_snrm(&self) -> Vec<u8> {
        encode_group(
            self.max_information_field_length_tx,
            self.max_information_field_length_rx,
            self.window_size_tx,
            self.window_size_rx,
        )
    }

    /// The same group as a server would send it in its UA
    pub fn encode_ua(&self) -> Vec<u8> {
        encode_group(
            self.max_information_field_length_rx,
            self.max_information_field_length_tx,
            self.window_size_rx,
            self.window_size_tx,
        )
    }

    /// Apply the UA information field
    ///
    /// The server states its own transmit and receive limits, so they
    /// cross over to the client side. Missing parameters keep their values.
    pub fn negotiate(&self, ua_info: &[u8]) -> DlmsResult<Self> {
        let mut negotiated = *self;
        if ua_info.is_empty() {
            return Ok(negotiated);
        }
        if ua_info.len() < 3 || ua_info[0] != FORMAT_IDENTIFIER || ua_info[1] != GROUP_IDENTIFIER {
            return Err(DlmsError::FrameInvalid(
                "UA information field is not a parameter negotiation group".to_string(),
            ));
        }
        let group_len = ua_info[2] as usize;
        let group = ua_info.get(3..3 + group_len).ok_or_else(|| {
            DlmsError::FrameInvalid("UA parameter group shorter than its length".to_string())
        })?;

        let mut pos = 0;
        while pos < group.len() {
            let id = group[pos];
            let len = *group.get(pos + 1).ok_or_else(truncated)? as usize;
            let value_bytes = group.get(pos + 2..pos + 2 + len).ok_or_else(truncated)?;
            if len == 0 || len > 4 {
                return Err(DlmsError::FrameInvalid(format!(
                    "UA parameter 0x{:02X} has invalid length {}",
                    id, len
                )));
            }
            let value = value_bytes.iter().fold(0u32, |acc, b| acc << 8 | *b as u32);
            match id {
                MAX_INFO_TX => negotiated.max_information_field_length_rx = clamp_length(value)?,
                MAX_INFO_RX => negotiated.max_information_field_length_tx = clamp_length(value)?,
                WINDOW_TX => negotiated.window_size_rx = clamp_window(value)?,
                WINDOW_RX => negotiated.window_size_tx = clamp_window(value)?,
                _ => {}
            }
            pos += 2 + len;
        }
        Ok(negotiated)
    }
}

fn truncated() -> DlmsError {
    DlmsError::FrameInvalid("Truncated UA parameter".to_string())
}

fn clamp_length(value: u32) -> DlmsResult<u16> {
    match u16::try_from(value) {
        Ok(v) if v >= 32 => Ok(v),
        _ => Err(DlmsError::FrameInvalid(format!(
            "Negotiated information field length {} out of range",
            value
        ))),
    }
}

fn clamp_window(value: u32) -> DlmsResult<u8> {
    match value {
        1..=7 => Ok(value as u8),
        _ => Err(DlmsError::FrameInvalid(format!(
            "Negotiated window size {} out of range",
            value
        ))),
    }
}

fn push_parameter(out: &mut Vec<u8>, id: u8, value: u32) {
    out.push(id);
    if value <= 0xFF {
        out.extend([1, value as u8]);
    } else if value <= 0xFFFF {
        out.push(2);
        out.extend((value as u16).to_be_bytes());
    } else {
        out.push(4);
        out.extend(value.to_be_bytes());
    }
}

fn encode_group(max_tx: u16, max_rx: u16, window_tx: u8, window_rx: u8) -> Vec<u8> {
    let mut group = Vec::with_capacity(16);
    push_parameter(&mut group, MAX_INFO_TX, max_tx as u32);
    push_parameter(&mut group, MAX_INFO_RX, max_rx as u32);
    push_parameter(&mut group, WINDOW_TX, window_tx as u32);
    push_parameter(&mut group, WINDOW_RX, window_rx as u32);
    let mut out = vec![FORMAT_IDENTIFIER, GROUP_IDENTIFIER, group.len() as u8];
    out.extend(group);
    out
}

/// Who talks to whom on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdlcAddressing {
    /// Client SAP, e.g. 0x10 public client, 1 management, 3 reading
    pub client_address: u16,
    /// Upper HDLC address of the server
    pub logical_device: u16,
    /// Lower HDLC address, when the meter is addressed physically
    pub physical_device: Option<u16>,
    /// Server address width in bytes: 1, 2 or 4
    pub server_address_length: usize,
}

impl Default for HdlcAddressing {
    fn default() -> Self {
        Self {
            client_address: 0x10,
            logical_device: 1,
            physical_device: None,
            server_address_length: 1,
        }
    }
}

impl HdlcAddressing {
    pub fn new(client_address: u16, logical_device: u16) -> Self {
        Self {
            client_address,
            logical_device,
            ..Self::default()
        }
    }

    pub fn with_physical_device(mut self, physical_device: u16, address_length: usize) -> Self {
        self.physical_device = Some(physical_device);
        self.server_address_length = address_length;
        self
    }

    pub fn client(&self) -> DlmsResult<HdlcAddress> {
        HdlcAddress::client(self.client_address)
    }

    pub fn server(&self) -> DlmsResult<HdlcAddress> {
        HdlcAddress::server(
            self.logical_device,
            self.physical_device.unwrap_or(0),
            self.server_address_length,
        )
    }
}

/// Bounds on every wait of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeouts {
    /// Wait for UA after SNRM
    pub snrm_timeout: Duration,
    /// Wait for UA or DM after DISC
    pub disc_timeout: Duration,
    /// Wait for the RR acknowledging a sent segment
    pub response_timeout: Duration,
    /// Wait for each answer of the association handshake
    pub cosem_wait_time: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            snrm_timeout: Duration::from_secs(45),
            disc_timeout: Duration::from_secs(45),
            response_timeout: Duration::from_secs(10),
            cosem_wait_time: Duration::from_secs(5),
        }
    }
}
