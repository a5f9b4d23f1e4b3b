//! Application association (COSEM-OPEN) as a sans-IO driver
//!
//! The driver produces the bytes to send and consumes the bytes received;
//! moving them over the link is up to the caller. One driver covers one
//! association attempt:
//!
//! 1. [`Association::build_aarq`] yields the AARQ.
//! 2. [`Association::process_aare`] checks the AARE. Without HLS the
//!    association is then established. With HLS it yields the reply to the
//!    server challenge, an ACTION on the current association object.
//! 3. [`Association::process_hls_reply`] verifies the server's answer to the
//!    client challenge.
//!
//! Any error leaves the driver in [`AssociationState::Failed`] for good.

pub mod context;
pub mod state;

pub use context::{
    mechanism_name, AssociationSettings, NegotiatedParameters, DEFAULT_CHALLENGE_LENGTH,
};
pub use state::AssociationState;

use crate::error::{DlmsError, DlmsResult};
use crate::pdu::{service_refusal, tags, InitiateRequest, InitiateResponse};
use crate::service::{ActionRequest, ActionResponse, CosemMethodDescriptor};
use dlms_asn1::iso_acse::ReleaseRequestReason;
use dlms_asn1::{AAREApdu, AARQApdu, ApplicationContextName, AssociateResult, RLRQApdu};
use dlms_core::{DataObject, ObisCode};
use dlms_security::xdlms::is_glo_tag;
use dlms_security::{AuthenticationFlow, SystemTitle, XdlmsContext};
use log::{debug, warn};

/// Association LN interface class
pub const ASSOCIATION_LN_CLASS_ID: u16 = 15;
/// reply_to_HLS_authentication method of the association LN object
pub const REPLY_TO_HLS_AUTHENTICATION: i8 = 1;

/// Outcome of a processed AARE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationStep {
    /// Services may be used
    Established,
    /// Send this APDU and pass the answer to
    /// [`Association::process_hls_reply`]
    HlsReply(Vec<u8>),
}

/// Client side of one association attempt
#[derive(Debug)]
pub struct Association {
    settings: AssociationSettings,
    context_name: ApplicationContextName,
    state: AssociationState,
    initiate: InitiateRequest,
    xdlms: Option<XdlmsContext>,
    flow: Option<AuthenticationFlow>,
    negotiated: Option<NegotiatedParameters>,
}

impl Association {
    pub fn new(settings: AssociationSettings) -> Self {
        let context_name = settings.application_context();
        let initiate = settings.initiate_request();
        Self {
            settings,
            context_name,
            state: AssociationState::Idle,
            initiate,
            xdlms: None,
            flow: None,
            negotiated: None,
        }
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn is_associated(&self) -> bool {
        self.state == AssociationState::Associated
    }

    pub fn application_context(&self) -> ApplicationContextName {
        self.context_name
    }

    /// Whether service APDUs travel glo-ciphered
    pub fn is_ciphered(&self) -> bool {
        self.context_name.is_ciphered()
    }

    /// Known once the AARE has been accepted
    pub fn negotiated(&self) -> Option<&NegotiatedParameters> {
        self.negotiated.as_ref()
    }

    /// Server system title from the AARE, if it sent one
    pub fn server_system_title(&self) -> Option<&SystemTitle> {
        self.xdlms.as_ref().and_then(XdlmsContext::server_system_title)
    }

    /// Encode the AARQ and start waiting for the AARE
    pub fn build_aarq(&mut self) -> DlmsResult<Vec<u8>> {
        self.expect_state(AssociationState::Idle)?;
        let result = self.prepare_aarq();
        let aarq = self.fail_on_error(result)?;
        self.transition(AssociationState::AwaitingAare);
        Ok(aarq)
    }

    /// Check the AARE
    ///
    /// A rejection surfaces as [`DlmsError::AssociationRejected`] with the
    /// result and diagnostic the server gave.
    pub fn process_aare(&mut self, data: &[u8]) -> DlmsResult<AssociationStep> {
        self.expect_state(AssociationState::AwaitingAare)?;
        let result = self.handle_aare(data);
        let step = self.fail_on_error(result)?;
        match step {
            AssociationStep::Established => self.transition(AssociationState::Associated),
            AssociationStep::HlsReply(_) => self.transition(AssociationState::AwaitingHlsReply),
        }
        Ok(step)
    }

    /// Verify the server's answer to the client challenge
    pub fn process_hls_reply(&mut self, data: &[u8]) -> DlmsResult<()> {
        self.expect_state(AssociationState::AwaitingHlsReply)?;
        let result = self.handle_hls_reply(data);
        self.fail_on_error(result)?;
        self.transition(AssociationState::Associated);
        Ok(())
    }

    /// Wrap a service request for the wire
    pub fn protect_request(&self, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
        if !self.is_ciphered() {
            return Ok(apdu.to_vec());
        }
        self.xdlms
            .as_ref()
            .ok_or_else(|| DlmsError::Security("No ciphering context".to_string()))?
            .cipher_apdu(apdu)
    }

    /// Unwrap a service response received from the server
    ///
    /// On a ciphered context only refusals (confirmed-service-error,
    /// exception-response) may arrive in the clear.
    pub fn unprotect_response(&mut self, data: &[u8]) -> DlmsResult<Vec<u8>> {
        let tag = *data
            .first()
            .ok_or_else(|| DlmsError::decode(0, "empty APDU"))?;
        if is_glo_tag(tag) {
            return self
                .xdlms
                .as_mut()
                .ok_or_else(|| DlmsError::Security("Ciphered APDU without a ciphering context".to_string()))?
                .decipher_apdu(data);
        }
        if self.is_ciphered()
            && tag != tags::CONFIRMED_SERVICE_ERROR
            && tag != tags::EXCEPTION_RESPONSE
        {
            return Err(DlmsError::Security(format!(
                "Unciphered APDU 0x{:02X} on a ciphered association",
                tag
            )));
        }
        Ok(data.to_vec())
    }

    /// RLRQ for a graceful release; the link may also just be dropped
    pub fn build_rlrq(&self) -> Vec<u8> {
        RLRQApdu {
            reason: ReleaseRequestReason::Normal,
        }
        .encode()
    }

    /// Forget the association and its key material
    pub fn release(&mut self) {
        self.xdlms = None;
        self.flow = None;
        if self.state != AssociationState::Failed {
            self.transition(AssociationState::Released);
        }
    }

    fn prepare_aarq(&mut self) -> DlmsResult<Vec<u8>> {
        if matches!(
            self.context_name,
            ApplicationContextName::ShortNameNoCiphering
                | ApplicationContextName::ShortNameWithCiphering
        ) {
            return Err(DlmsError::InvalidData(
                "Short name referencing is not supported".to_string(),
            ));
        }
        let suite = &self.settings.security;
        let mechanism = suite.authentication_mechanism();
        let needs_keys = self.context_name.is_ciphered() || mechanism.is_hls_mechanism();
        self.xdlms = suite.begin_association()?;
        if needs_keys && self.xdlms.is_none() {
            return Err(DlmsError::Security(format!(
                "{:?} with {:?} needs keys and a client system title",
                self.context_name, mechanism
            )));
        }

        let mut aarq = AARQApdu::new(self.context_name);
        aarq.calling_ap_title = match &self.xdlms {
            Some(xdlms) if needs_keys => Some(xdlms.client_system_title().as_bytes().to_vec()),
            _ => self
                .settings
                .calling_ap_title
                .map(|title| title.as_bytes().to_vec()),
        };
        aarq.mechanism_name = mechanism_name(mechanism);
        aarq.calling_authentication_value = if mechanism.is_hls_mechanism() {
            let mut flow =
                AuthenticationFlow::new(suite.authenticator()?, self.settings.challenge_length)?;
            let challenge = flow.client_challenge().to_vec();
            self.flow = Some(flow);
            Some(challenge)
        } else if mechanism.id().is_some() {
            let low = suite.low_auth().ok_or_else(|| {
                DlmsError::Security("Password is not set for the security level low".to_string())
            })?;
            Some(low.authentication_value().to_vec())
        } else {
            None
        };

        let initiate = self.initiate.encode();
        aarq.user_information = Some(if self.context_name.is_ciphered() {
            self.protect_request(&initiate)?
        } else {
            initiate
        });
        debug!(
            "AARQ: context {:?}, mechanism {:?}",
            self.context_name, aarq.mechanism_name
        );
        aarq.encode()
    }

    fn handle_aare(&mut self, data: &[u8]) -> DlmsResult<AssociationStep> {
        let aare = AAREApdu::decode(data)?;
        if aare.result != AssociateResult::Accepted {
            let diagnostic = aare.result_source_diagnostic.reason();
            warn!(
                "Association rejected: {:?}, diagnostic {:?}",
                aare.result, aare.result_source_diagnostic
            );
            return Err(DlmsError::AssociationRejected {
                result: aare.result as u8,
                diagnostic,
            });
        }

        if let (Some(xdlms), Some(title)) = (self.xdlms.as_mut(), aare.responding_ap_title.as_deref()) {
            xdlms.set_server_system_title(SystemTitle::from_slice(title)?);
        }

        let user_information = aare.user_information.as_deref().ok_or_else(|| {
            DlmsError::Protocol("AARE accepted without an InitiateResponse".to_string())
        })?;
        let initiate = self.unprotect_response(user_information)?;
        if let Some(refusal) = service_refusal(&initiate) {
            return Err(refusal);
        }
        let response = InitiateResponse::decode(&initiate)?;
        let negotiated = NegotiatedParameters::from_initiate(&self.initiate, &response);
        debug!(
            "AARE accepted: conformance {}, server max PDU {}",
            negotiated.conformance, negotiated.server_max_receive_pdu_size
        );
        self.negotiated = Some(negotiated);

        let Some(flow) = self.flow.as_mut() else {
            return Ok(AssociationStep::Established);
        };
        let challenge = aare.responding_authentication_value.clone().ok_or_else(|| {
            DlmsError::AuthenticationFailure("AARE carries no server challenge".to_string())
        })?;
        let xdlms = self
            .xdlms
            .as_mut()
            .ok_or_else(|| DlmsError::Security("No ciphering context".to_string()))?;
        xdlms.set_server_challenge(challenge.clone());
        flow.server_challenge_received(challenge)?;
        let reply = flow.response(xdlms)?;

        let request = ActionRequest::normal(
            CosemMethodDescriptor::new(
                ASSOCIATION_LN_CLASS_ID,
                ObisCode::CURRENT_ASSOCIATION,
                REPLY_TO_HLS_AUTHENTICATION,
            ),
            Some(DataObject::OctetString(reply)),
        );
        Ok(AssociationStep::HlsReply(
            self.protect_request(&request.encode())?,
        ))
    }

    fn handle_hls_reply(&mut self, data: &[u8]) -> DlmsResult<()> {
        let plain = self.unprotect_response(data)?;
        if let Some(refusal) = service_refusal(&plain) {
            return Err(DlmsError::AuthenticationFailure(refusal.to_string()));
        }
        let response = ActionResponse::decode(&plain)?;
        let server_response = match response.into_result() {
            Ok(Some(DataObject::OctetString(bytes))) => bytes,
            Ok(other) => {
                return Err(DlmsError::AuthenticationFailure(format!(
                    "Expected f(CtoS) as octet-string, got {:?}",
                    other
                )))
            }
            Err(DlmsError::DataAccess(result)) => {
                return Err(DlmsError::AuthenticationFailure(format!(
                    "Server refused the challenge reply: {}",
                    result
                )))
            }
            Err(e) => return Err(e),
        };
        let (Some(flow), Some(xdlms)) = (self.flow.as_mut(), self.xdlms.as_ref()) else {
            return Err(DlmsError::Security("HLS reply without a pending challenge".to_string()));
        };
        flow.verify_server_response(xdlms, &server_response)
    }

    fn expect_state(&self, wanted: AssociationState) -> DlmsResult<()> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(DlmsError::Protocol(format!(
                "Association is {}, expected {}",
                self.state, wanted
            )))
        }
    }

    fn fail_on_error<T>(&mut self, result: DlmsResult<T>) -> DlmsResult<T> {
        if result.is_err() {
            if let Some(flow) = self.flow.as_mut() {
                flow.fail();
            }
            self.xdlms = None;
            self.transition(AssociationState::Failed);
        }
        result
    }

    fn transition(&mut self, next: AssociationState) {
        debug!("Association {} -> {}", self.state, next);
        self.state = next;
    }
}
