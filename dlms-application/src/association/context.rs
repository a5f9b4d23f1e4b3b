//! What the client proposes in the AARQ and what the server granted

use crate::pdu::{Conformance, InitiateRequest, InitiateResponse, DEFAULT_MAX_RECEIVE_PDU_SIZE};
use dlms_asn1::{ApplicationContextName, MechanismName};
use dlms_security::{AuthenticationMechanism, SecuritySuite, SystemTitle};

/// Length of the client challenge sent for HLS mechanisms
pub const DEFAULT_CHALLENGE_LENGTH: usize = 16;

/// Client side association settings
#[derive(Debug, Clone)]
pub struct AssociationSettings {
    pub security: SecuritySuite,
    /// Overrides the context derived from the security suite
    pub application_context: Option<ApplicationContextName>,
    /// Calling AP title for contexts that do not need one
    pub calling_ap_title: Option<SystemTitle>,
    pub conformance: Conformance,
    pub max_receive_pdu_size: u16,
    pub challenge_length: usize,
}

impl AssociationSettings {
    pub fn new(security: SecuritySuite) -> Self {
        Self {
            security,
            application_context: None,
            calling_ap_title: None,
            conformance: Conformance::default(),
            max_receive_pdu_size: DEFAULT_MAX_RECEIVE_PDU_SIZE,
            challenge_length: DEFAULT_CHALLENGE_LENGTH,
        }
    }

    /// Logical name referencing, ciphered when the suite carries keys
    pub fn application_context(&self) -> ApplicationContextName {
        self.application_context.unwrap_or(if self.security.is_ciphered() {
            ApplicationContextName::LogicalNameWithCiphering
        } else {
            ApplicationContextName::LogicalNameNoCiphering
        })
    }

    pub fn initiate_request(&self) -> InitiateRequest {
        InitiateRequest::new(self.conformance, self.max_receive_pdu_size)
    }
}

impl Default for AssociationSettings {
    fn default() -> Self {
        Self::new(SecuritySuite::default())
    }
}

/// Mechanism name sent in the AARQ, `None` for lowest level security
pub fn mechanism_name(mechanism: AuthenticationMechanism) -> Option<MechanismName> {
    match mechanism {
        AuthenticationMechanism::None => None,
        AuthenticationMechanism::Low => Some(MechanismName::Low),
        AuthenticationMechanism::HlsMd5 => Some(MechanismName::HighMd5),
        AuthenticationMechanism::HlsSha1 => Some(MechanismName::HighSha1),
        AuthenticationMechanism::Hls5Gmac => Some(MechanismName::HighGmac),
        AuthenticationMechanism::HlsSha256 => Some(MechanismName::HighSha256),
    }
}

/// Parameters agreed in the Initiate exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedParameters {
    pub dlms_version: u8,
    pub conformance: Conformance,
    pub client_max_receive_pdu_size: u16,
    pub server_max_receive_pdu_size: u16,
    pub quality_of_service: Option<i8>,
}

impl NegotiatedParameters {
    pub fn from_initiate(request: &InitiateRequest, response: &InitiateResponse) -> Self {
        Self {
            dlms_version: response.negotiated_dlms_version_number,
            conformance: response.negotiated_conformance,
            client_max_receive_pdu_size: request.client_max_receive_pdu_size,
            server_max_receive_pdu_size: response.server_max_receive_pdu_size,
            quality_of_service: response.negotiated_quality_of_service,
        }
    }

    /// Largest APDU the server accepts from the client
    pub fn max_request_size(&self) -> usize {
        self.server_max_receive_pdu_size as usize
    }
}
