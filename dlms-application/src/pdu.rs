//! xDLMS PDUs exchanged inside the association: InitiateRequest/Response,
//! confirmed-service-error and exception-response
//!
//! All of them are A-XDR encoded. The InitiateRequest travels in the
//! user-information field of the AARQ, the InitiateResponse (or a
//! confirmed-service-error) in the one of the AARE.

use crate::error::{DlmsError, DlmsResult};
use dlms_asn1::{AxdrDecoder, AxdrEncoder};
use std::fmt;

/// DLMS protocol version number
///
/// Version 6 is the only one in use. It is proposed in the InitiateRequest
/// and must come back unchanged in the InitiateResponse.
pub const DLMS_VERSION_6: u8 = 6;

/// Largest APDU the client offers to receive by default
pub const DEFAULT_MAX_RECEIVE_PDU_SIZE: u16 = 0x04B0;

/// APDU tags of the services used by this client
pub mod tags {
    pub const INITIATE_REQUEST: u8 = 0x01;
    pub const INITIATE_RESPONSE: u8 = 0x08;
    pub const CONFIRMED_SERVICE_ERROR: u8 = 0x0E;
    pub const GET_REQUEST: u8 = 0xC0;
    pub const SET_REQUEST: u8 = 0xC1;
    pub const ACTION_REQUEST: u8 = 0xC3;
    pub const GET_RESPONSE: u8 = 0xC4;
    pub const SET_RESPONSE: u8 = 0xC5;
    pub const ACTION_RESPONSE: u8 = 0xC7;
    pub const EXCEPTION_RESPONSE: u8 = 0xD8;
}

/// Tag of the conformance block: [APPLICATION 31] IMPLICIT BIT STRING
const CONFORMANCE_TAG: [u8; 2] = [0x5F, 0x1F];

/// Conformance block negotiated in the Initiate exchange
///
/// Conformance is a 24-bit bitstring that indicates which xDLMS services and
/// options the client proposes or the server grants. Bit 0 is the first bit
/// on the wire (the most significant bit of the first byte).
///
/// # Bit Layout
/// - 0-7: reserved-zero, general-protection, general-block-transfer, read,
///   write, unconfirmed-write, reserved
/// - 8-15: attribute0-with-set, priority-mgmt, attribute0-with-get,
///   block-transfer with get/set/action, multiple-references,
///   information-report
/// - 16-23: data-notification, access, parameterized-access, get, set,
///   selective-access, event-notification, action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conformance(u32);

impl Conformance {
    pub const GENERAL_PROTECTION: u32 = 1 << 22;
    pub const GENERAL_BLOCK_TRANSFER: u32 = 1 << 21;
    pub const ATTRIBUTE0_SUPPORTED_WITH_SET: u32 = 1 << 15;
    pub const PRIORITY_MGMT_SUPPORTED: u32 = 1 << 14;
    pub const ATTRIBUTE0_SUPPORTED_WITH_GET: u32 = 1 << 13;
    pub const BLOCK_TRANSFER_WITH_GET: u32 = 1 << 12;
    pub const BLOCK_TRANSFER_WITH_SET: u32 = 1 << 11;
    pub const BLOCK_TRANSFER_WITH_ACTION: u32 = 1 << 10;
    pub const MULTIPLE_REFERENCES: u32 = 1 << 9;
    pub const GET: u32 = 1 << 4;
    pub const SET: u32 = 1 << 3;
    pub const SELECTIVE_ACCESS: u32 = 1 << 2;
    pub const EVENT_NOTIFICATION: u32 = 1 << 1;
    pub const ACTION: u32 = 1;

    /// Create a conformance block from its 24-bit value
    ///
    /// # Returns
    /// Returns `Err` when bits above the 24th are set.
    pub fn from_bits(bits: u32) -> DlmsResult<Self> {
        if bits > 0x00FF_FFFF {
            return Err(DlmsError::InvalidData(format!(
                "Conformance must fit 24 bits, got 0x{:X}",
                bits
            )));
        }
        Ok(Self(bits))
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every flag in `flags` is present
    pub fn supports(&self, flags: u32) -> bool {
        self.0 & flags == flags
    }

    /// Flags present in both blocks
    pub fn intersect(&self, other: Conformance) -> Conformance {
        Conformance(self.0 & other.0)
    }

    fn encode(&self, encoder: &mut AxdrEncoder) {
        encoder.encode_raw(&CONFORMANCE_TAG);
        // length 4, no unused bits, then the three bytes
        encoder.encode_raw(&[0x04, 0x00]);
        encoder.encode_raw(&self.0.to_be_bytes()[1..]);
    }

    fn decode(decoder: &mut AxdrDecoder<'_>) -> DlmsResult<Self> {
        let offset = decoder.position();
        let header = decoder.decode_fixed_bytes(4)?;
        if header[..2] != CONFORMANCE_TAG || header[2] != 0x04 {
            return Err(DlmsError::decode(
                offset,
                format!("malformed conformance block header {:02X?}", header),
            ));
        }
        let bytes = decoder.decode_fixed_bytes(3)?;
        Ok(Self(
            (bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32,
        ))
    }
}

impl Default for Conformance {
    /// Get, set, action, selective access, multiple references and block
    /// transfer: what a logical-name client uses
    fn default() -> Self {
        Self(
            Self::PRIORITY_MGMT_SUPPORTED
                | Self::ATTRIBUTE0_SUPPORTED_WITH_GET
                | Self::BLOCK_TRANSFER_WITH_GET
                | Self::BLOCK_TRANSFER_WITH_SET
                | Self::BLOCK_TRANSFER_WITH_ACTION
                | Self::MULTIPLE_REFERENCES
                | Self::GET
                | Self::SET
                | Self::SELECTIVE_ACCESS
                | Self::EVENT_NOTIFICATION
                | Self::ACTION,
        )
    }
}

impl fmt::Display for Conformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06X}", self.0)
    }
}

/// Initiate Request PDU
///
/// Sent by the client inside the AARQ to propose protocol parameters.
///
/// # Structure
/// - `dedicated_key`: optional key for ciphering this association only
/// - `response_allowed`: whether the server answers (default true, encoded as absent)
/// - `proposed_quality_of_service`: optional
/// - `proposed_dlms_version_number`: 6
/// - `proposed_conformance`: services the client wants
/// - `client_max_receive_pdu_size`: largest APDU the client accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateRequest {
    pub dedicated_key: Option<Vec<u8>>,
    pub response_allowed: bool,
    pub proposed_quality_of_service: Option<i8>,
    pub proposed_dlms_version_number: u8,
    pub proposed_conformance: Conformance,
    pub client_max_receive_pdu_size: u16,
}

impl InitiateRequest {
    pub fn new(conformance: Conformance, max_receive_pdu_size: u16) -> Self {
        Self {
            dedicated_key: None,
            response_allowed: true,
            proposed_quality_of_service: None,
            proposed_dlms_version_number: DLMS_VERSION_6,
            proposed_conformance: conformance,
            client_max_receive_pdu_size: max_receive_pdu_size,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_u8(tags::INITIATE_REQUEST);
        match &self.dedicated_key {
            Some(key) => {
                encoder.encode_u8(0x01);
                encoder.encode_octet_string(key);
            }
            None => encoder.encode_u8(0x00),
        }
        if self.response_allowed {
            // DEFAULT TRUE is encoded by omission
            encoder.encode_u8(0x00);
        } else {
            encoder.encode_raw(&[0x01, 0x00]);
        }
        match self.proposed_quality_of_service {
            Some(qos) => {
                encoder.encode_u8(0x01);
                encoder.encode_i8(qos);
            }
            None => encoder.encode_u8(0x00),
        }
        encoder.encode_u8(self.proposed_dlms_version_number);
        self.proposed_conformance.encode(&mut encoder);
        encoder.encode_u16(self.client_max_receive_pdu_size);
        encoder.into_bytes()
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::INITIATE_REQUEST, "InitiateRequest")?;
        let dedicated_key = if decoder.decode_bool()? {
            Some(decoder.decode_octet_string()?)
        } else {
            None
        };
        let response_allowed = if decoder.decode_bool()? {
            decoder.decode_bool()?
        } else {
            true
        };
        let proposed_quality_of_service = if decoder.decode_bool()? {
            Some(decoder.decode_i8()?)
        } else {
            None
        };
        Ok(Self {
            dedicated_key,
            response_allowed,
            proposed_quality_of_service,
            proposed_dlms_version_number: decoder.decode_u8()?,
            proposed_conformance: Conformance::decode(&mut decoder)?,
            client_max_receive_pdu_size: decoder.decode_u16()?,
        })
    }
}

impl Default for InitiateRequest {
    fn default() -> Self {
        Self::new(Conformance::default(), DEFAULT_MAX_RECEIVE_PDU_SIZE)
    }
}

/// Initiate Response PDU, the server's answer to [`InitiateRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateResponse {
    pub negotiated_quality_of_service: Option<i8>,
    pub negotiated_dlms_version_number: u8,
    pub negotiated_conformance: Conformance,
    pub server_max_receive_pdu_size: u16,
    /// 0x0007 for logical-name referencing
    pub vaa_name: u16,
}

impl InitiateResponse {
    pub fn new(conformance: Conformance, server_max_receive_pdu_size: u16) -> Self {
        Self {
            negotiated_quality_of_service: None,
            negotiated_dlms_version_number: DLMS_VERSION_6,
            negotiated_conformance: conformance,
            server_max_receive_pdu_size,
            vaa_name: 0x0007,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_u8(tags::INITIATE_RESPONSE);
        match self.negotiated_quality_of_service {
            Some(qos) => {
                encoder.encode_u8(0x01);
                encoder.encode_i8(qos);
            }
            None => encoder.encode_u8(0x00),
        }
        encoder.encode_u8(self.negotiated_dlms_version_number);
        self.negotiated_conformance.encode(&mut encoder);
        encoder.encode_u16(self.server_max_receive_pdu_size);
        encoder.encode_u16(self.vaa_name);
        encoder.into_bytes()
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::INITIATE_RESPONSE, "InitiateResponse")?;
        let negotiated_quality_of_service = if decoder.decode_bool()? {
            Some(decoder.decode_i8()?)
        } else {
            None
        };
        let response = Self {
            negotiated_quality_of_service,
            negotiated_dlms_version_number: decoder.decode_u8()?,
            negotiated_conformance: Conformance::decode(&mut decoder)?,
            server_max_receive_pdu_size: decoder.decode_u16()?,
            vaa_name: decoder.decode_u16()?,
        };
        if response.negotiated_dlms_version_number != DLMS_VERSION_6 {
            return Err(DlmsError::Protocol(format!(
                "Server negotiated DLMS version {}",
                response.negotiated_dlms_version_number
            )));
        }
        Ok(response)
    }
}

/// confirmed-service-error, sent instead of a response the server refuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedServiceError {
    /// Which service failed, e.g. 1 initiateError
    pub service: u8,
    /// Error class, e.g. 6 initiate
    pub error_type: u8,
    pub value: u8,
}

impl ConfirmedServiceError {
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::CONFIRMED_SERVICE_ERROR, "ConfirmedServiceError")?;
        Ok(Self {
            service: decoder.decode_u8()?,
            error_type: decoder.decode_u8()?,
            value: decoder.decode_u8()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![
            tags::CONFIRMED_SERVICE_ERROR,
            self.service,
            self.error_type,
            self.value,
        ]
    }
}

impl fmt::Display for ConfirmedServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "confirmed-service-error service {} type {} value {}",
            self.service, self.error_type, self.value
        )
    }
}

/// exception-response: state-error and service-error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub state_error: u8,
    pub service_error: u8,
}

impl ExceptionResponse {
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::EXCEPTION_RESPONSE, "ExceptionResponse")?;
        Ok(Self {
            state_error: decoder.decode_u8()?,
            service_error: decoder.decode_u8()?,
        })
    }
}

/// Turn a response the server uses to refuse a service into an error
///
/// Returns `None` when `apdu` is not one of those.
pub fn service_refusal(apdu: &[u8]) -> Option<DlmsError> {
    match apdu.first() {
        Some(&tags::CONFIRMED_SERVICE_ERROR) => Some(match ConfirmedServiceError::decode(apdu) {
            Ok(error) => DlmsError::Protocol(error.to_string()),
            Err(e) => e,
        }),
        Some(&tags::EXCEPTION_RESPONSE) => Some(match ExceptionResponse::decode(apdu) {
            Ok(error) => DlmsError::Protocol(format!(
                "exception-response state-error {} service-error {}",
                error.state_error, error.service_error
            )),
            Err(e) => e,
        }),
        _ => None,
    }
}

pub(crate) fn expect_tag(decoder: &mut AxdrDecoder<'_>, tag: u8, name: &str) -> DlmsResult<()> {
    let offset = decoder.position();
    let found = decoder.decode_u8()?;
    if found != tag {
        return Err(DlmsError::decode(
            offset,
            format!("expected {} tag 0x{:02X}, found 0x{:02X}", name, tag, found),
        ));
    }
    Ok(())
}
