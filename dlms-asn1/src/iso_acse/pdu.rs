//! AARQ, AARE, RLRQ and RLRE encoding and decoding
//!
//! Only the fields DLMS/COSEM uses are modelled. Unknown optional fields
//! are skipped on decode.

use super::types::*;
use crate::ber::decoder::{decode_object_identifier, decode_unsigned};
use crate::ber::{BerDecoder, BerEncoder, BerTag, BerTagClass};
use crate::error::{DlmsError, DlmsResult};

const AARQ_TAG: BerTag = BerTag::application(true, 0);
const AARE_TAG: BerTag = BerTag::application(true, 1);
const RLRQ_TAG: BerTag = BerTag::application(true, 2);
const RLRE_TAG: BerTag = BerTag::application(true, 3);

const APPLICATION_CONTEXT_NAME: u32 = 1;
const RESULT: u32 = 2;
const RESULT_SOURCE_DIAGNOSTIC: u32 = 3;
const RESPONDING_AP_TITLE: u32 = 4;
const CALLING_AP_TITLE: u32 = 6;
const RESPONDER_ACSE_REQUIREMENTS: u32 = 8;
const RESPONDER_MECHANISM_NAME: u32 = 9;
const SENDER_ACSE_REQUIREMENTS: u32 = 10;
const CALLING_MECHANISM_NAME: u32 = 11;
const RESPONDING_AUTHENTICATION_VALUE: u32 = 10;
const CALLING_AUTHENTICATION_VALUE: u32 = 12;
const USER_INFORMATION: u32 = 30;

/// ACSE requirements with only the authentication functional unit set
const AUTHENTICATION_FUNCTIONAL_UNIT: [u8; 1] = [0x80];

fn ctx(constructed: bool, number: u32) -> BerTag {
    BerTag::context_specific(constructed, number)
}

fn encode_context_name(enc: &mut BerEncoder, context: ApplicationContextName) -> DlmsResult<()> {
    enc.encode_constructed(ctx(true, APPLICATION_CONTEXT_NAME), |inner| {
        inner.encode_object_identifier(BerTag::OBJECT_IDENTIFIER, &context.oid())
    })
}

fn decode_context_name(content: &[u8]) -> DlmsResult<ApplicationContextName> {
    let oid = BerDecoder::new(content).expect(BerTag::OBJECT_IDENTIFIER)?;
    ApplicationContextName::from_oid(&decode_object_identifier(oid)?)
}

/// AP title as `[n] { OCTET STRING }`
fn encode_ap_title(enc: &mut BerEncoder, number: u32, title: &[u8]) -> DlmsResult<()> {
    enc.encode_constructed(ctx(true, number), |inner| {
        inner.encode_tlv(BerTag::OCTET_STRING, title);
        Ok(())
    })
}

fn decode_ap_title(content: &[u8]) -> DlmsResult<Vec<u8>> {
    Ok(BerDecoder::new(content).expect(BerTag::OCTET_STRING)?.to_vec())
}

/// Authentication value as `[n] { [0] IMPLICIT GraphicString }`
fn encode_authentication_value(enc: &mut BerEncoder, number: u32, value: &[u8]) -> DlmsResult<()> {
    enc.encode_constructed(ctx(true, number), |inner| {
        inner.encode_tlv(ctx(false, 0), value);
        Ok(())
    })
}

fn decode_authentication_value(content: &[u8]) -> DlmsResult<Vec<u8>> {
    let (tag, value) = BerDecoder::new(content).decode_tlv()?;
    if tag.class() != BerTagClass::ContextSpecific {
        return Err(DlmsError::Asn1Decoding(format!(
            "Unexpected authentication value choice {:?}",
            tag
        )));
    }
    Ok(value.to_vec())
}

/// User information as `[30] { OCTET STRING }` wrapping an xDLMS APDU
fn encode_user_information(enc: &mut BerEncoder, apdu: &[u8]) -> DlmsResult<()> {
    enc.encode_constructed(ctx(true, USER_INFORMATION), |inner| {
        inner.encode_tlv(BerTag::OCTET_STRING, apdu);
        Ok(())
    })
}

fn decode_user_information(content: &[u8]) -> DlmsResult<Vec<u8>> {
    Ok(BerDecoder::new(content).expect(BerTag::OCTET_STRING)?.to_vec())
}

fn decode_mechanism(content: &[u8]) -> DlmsResult<MechanismName> {
    MechanismName::from_oid(&decode_object_identifier(content)?)
}

fn outer_content(data: &[u8], expected: BerTag, name: &str) -> DlmsResult<Vec<u8>> {
    let mut dec = BerDecoder::new(data);
    let (tag, content) = dec.decode_tlv()?;
    if tag != expected {
        return Err(DlmsError::Asn1Decoding(format!(
            "Not an {} (tag {:?})",
            name, tag
        )));
    }
    Ok(content.to_vec())
}

/// Association request
#[derive(Debug, Clone, PartialEq)]
pub struct AARQApdu {
    pub application_context_name: ApplicationContextName,
    /// Client system title, present for ciphered contexts
    pub calling_ap_title: Option<Vec<u8>>,
    pub mechanism_name: Option<MechanismName>,
    /// Password (LLS) or client challenge (HLS)
    pub calling_authentication_value: Option<Vec<u8>>,
    /// Encoded xDLMS InitiateRequest, possibly ciphered
    pub user_information: Option<Vec<u8>>,
}

impl AARQApdu {
    pub fn new(application_context_name: ApplicationContextName) -> Self {
        Self {
            application_context_name,
            calling_ap_title: None,
            mechanism_name: None,
            calling_authentication_value: None,
            user_information: None,
        }
    }

    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let mut enc = BerEncoder::new();
        enc.encode_constructed(AARQ_TAG, |body| {
            encode_context_name(body, self.application_context_name)?;
            if let Some(title) = &self.calling_ap_title {
                encode_ap_title(body, CALLING_AP_TITLE, title)?;
            }
            if let Some(mechanism) = self.mechanism_name {
                if mechanism != MechanismName::Lowest {
                    body.encode_bit_string(
                        ctx(false, SENDER_ACSE_REQUIREMENTS),
                        &AUTHENTICATION_FUNCTIONAL_UNIT,
                        7,
                    );
                }
                body.encode_object_identifier(ctx(false, CALLING_MECHANISM_NAME), &mechanism.oid())?;
            }
            if let Some(value) = &self.calling_authentication_value {
                encode_authentication_value(body, CALLING_AUTHENTICATION_VALUE, value)?;
            }
            if let Some(info) = &self.user_information {
                encode_user_information(body, info)?;
            }
            Ok(())
        })?;
        Ok(enc.into_bytes())
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let content = outer_content(data, AARQ_TAG, "AARQ")?;
        let mut dec = BerDecoder::new(&content);
        let mut context = None;
        let mut aarq = Self::new(ApplicationContextName::LogicalNameNoCiphering);
        while dec.has_remaining() {
            let (tag, value) = dec.decode_tlv()?;
            if tag.class() != BerTagClass::ContextSpecific {
                continue;
            }
            match tag.number() {
                APPLICATION_CONTEXT_NAME => context = Some(decode_context_name(value)?),
                CALLING_AP_TITLE => aarq.calling_ap_title = Some(decode_ap_title(value)?),
                CALLING_MECHANISM_NAME => aarq.mechanism_name = Some(decode_mechanism(value)?),
                CALLING_AUTHENTICATION_VALUE => {
                    aarq.calling_authentication_value = Some(decode_authentication_value(value)?)
                }
                USER_INFORMATION => aarq.user_information = Some(decode_user_information(value)?),
                _ => {}
            }
        }
        aarq.application_context_name = context.ok_or_else(|| {
            DlmsError::Asn1Decoding("AARQ without application context name".to_string())
        })?;
        Ok(aarq)
    }
}

/// Association response
#[derive(Debug, Clone, PartialEq)]
pub struct AAREApdu {
    pub application_context_name: ApplicationContextName,
    pub result: AssociateResult,
    pub result_source_diagnostic: AssociateSourceDiagnostic,
    /// Server system title
    pub responding_ap_title: Option<Vec<u8>>,
    pub mechanism_name: Option<MechanismName>,
    /// Server challenge (HLS)
    pub responding_authentication_value: Option<Vec<u8>>,
    /// Encoded xDLMS InitiateResponse, possibly ciphered, or a service error
    pub user_information: Option<Vec<u8>>,
}

impl AAREApdu {
    pub fn new(
        application_context_name: ApplicationContextName,
        result: AssociateResult,
        result_source_diagnostic: AssociateSourceDiagnostic,
    ) -> Self {
        Self {
            application_context_name,
            result,
            result_source_diagnostic,
            responding_ap_title: None,
            mechanism_name: None,
            responding_authentication_value: None,
            user_information: None,
        }
    }

    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let mut enc = BerEncoder::new();
        enc.encode_constructed(AARE_TAG, |body| {
            encode_context_name(body, self.application_context_name)?;
            body.encode_constructed(ctx(true, RESULT), |inner| {
                inner.encode_integer(BerTag::INTEGER, self.result as u32);
                Ok(())
            })?;
            body.encode_constructed(ctx(true, RESULT_SOURCE_DIAGNOSTIC), |inner| {
                let (choice, reason) = match self.result_source_diagnostic {
                    AssociateSourceDiagnostic::ServiceUser(r) => (1, r),
                    AssociateSourceDiagnostic::ServiceProvider(r) => (2, r),
                };
                inner.encode_constructed(ctx(true, choice), |diag| {
                    diag.encode_integer(BerTag::INTEGER, reason as u32);
                    Ok(())
                })
            })?;
            if let Some(title) = &self.responding_ap_title {
                encode_ap_title(body, RESPONDING_AP_TITLE, title)?;
            }
            if let Some(mechanism) = self.mechanism_name {
                body.encode_bit_string(
                    ctx(false, RESPONDER_ACSE_REQUIREMENTS),
                    &AUTHENTICATION_FUNCTIONAL_UNIT,
                    7,
                );
                body.encode_object_identifier(ctx(false, RESPONDER_MECHANISM_NAME), &mechanism.oid())?;
            }
            if let Some(value) = &self.responding_authentication_value {
                encode_authentication_value(body, RESPONDING_AUTHENTICATION_VALUE, value)?;
            }
            if let Some(info) = &self.user_information {
                encode_user_information(body, info)?;
            }
            Ok(())
        })?;
        Ok(enc.into_bytes())
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let content = outer_content(data, AARE_TAG, "AARE")?;
        let mut dec = BerDecoder::new(&content);
        let mut context = None;
        let mut result = None;
        let mut diagnostic = None;
        let mut aare = Self::new(
            ApplicationContextName::LogicalNameNoCiphering,
            AssociateResult::Accepted,
            AssociateSourceDiagnostic::ServiceUser(service_user::NULL),
        );
        while dec.has_remaining() {
            let (tag, value) = dec.decode_tlv()?;
            if tag.class() != BerTagClass::ContextSpecific {
                continue;
            }
            match (tag.number(), tag.is_constructed()) {
                (APPLICATION_CONTEXT_NAME, true) => context = Some(decode_context_name(value)?),
                (RESULT, true) => {
                    let int = BerDecoder::new(value).expect(BerTag::INTEGER)?;
                    result = Some(AssociateResult::from_value(decode_unsigned(int)?)?);
                }
                (RESULT_SOURCE_DIAGNOSTIC, true) => {
                    let (choice, inner) = BerDecoder::new(value).decode_tlv()?;
                    let int = BerDecoder::new(inner).expect(BerTag::INTEGER)?;
                    let reason = decode_unsigned(int)? as u8;
                    diagnostic = Some(match choice.number() {
                        1 => AssociateSourceDiagnostic::ServiceUser(reason),
                        2 => AssociateSourceDiagnostic::ServiceProvider(reason),
                        other => {
                            return Err(DlmsError::Asn1Decoding(format!(
                                "Invalid diagnostic choice {}",
                                other
                            )))
                        }
                    });
                }
                (RESPONDING_AP_TITLE, true) => aare.responding_ap_title = Some(decode_ap_title(value)?),
                (RESPONDER_MECHANISM_NAME, false) => aare.mechanism_name = Some(decode_mechanism(value)?),
                (RESPONDING_AUTHENTICATION_VALUE, true) => {
                    aare.responding_authentication_value = Some(decode_authentication_value(value)?)
                }
                (USER_INFORMATION, true) => aare.user_information = Some(decode_user_information(value)?),
                _ => {}
            }
        }
        aare.application_context_name = context.ok_or_else(|| {
            DlmsError::Asn1Decoding("AARE without application context name".to_string())
        })?;
        aare.result =
            result.ok_or_else(|| DlmsError::Asn1Decoding("AARE without result".to_string()))?;
        aare.result_source_diagnostic = diagnostic.ok_or_else(|| {
            DlmsError::Asn1Decoding("AARE without result source diagnostic".to_string())
        })?;
        Ok(aare)
    }
}

/// Release request
#[derive(Debug, Clone, PartialEq)]
pub struct RLRQApdu {
    pub reason: ReleaseRequestReason,
}

impl RLRQApdu {
    pub fn encode(&self) -> Vec<u8> {
        let mut body = BerEncoder::new();
        body.encode_integer(ctx(false, 0), self.reason as u32);
        let mut enc = BerEncoder::new();
        enc.encode_tlv(RLRQ_TAG, &body.into_bytes());
        enc.into_bytes()
    }
}

/// Release response, only the reason is kept
#[derive(Debug, Clone, PartialEq)]
pub struct RLREApdu {
    pub reason: Option<u32>,
}

impl RLREApdu {
    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let content = outer_content(data, RLRE_TAG, "RLRE")?;
        let mut dec = BerDecoder::new(&content);
        let mut reason = None;
        while dec.has_remaining() {
            let (tag, value) = dec.decode_tlv()?;
            if tag == ctx(false, 0) {
                reason = Some(decode_unsigned(value)?);
            }
        }
        Ok(Self { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aarq_lowest_level_layout() {
        let mut aarq = AARQApdu::new(ApplicationContextName::LogicalNameNoCiphering);
        aarq.user_information = Some(vec![0x01, 0x00, 0x00, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00, 0x00, 0x7E, 0x1F, 0x04, 0xB0]);
        let bytes = aarq.encode().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x60, 0x1D, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01,
                0xBE, 0x10, 0x04, 0x0E, 0x01, 0x00, 0x00, 0x00, 0x06, 0x5F, 0x1F, 0x04, 0x00,
                0x00, 0x7E, 0x1F, 0x04, 0xB0
            ]
        );
        assert_eq!(AARQApdu::decode(&bytes).unwrap(), aarq);
    }

    #[test]
    fn test_aarq_low_level_security() {
        let mut aarq = AARQApdu::new(ApplicationContextName::LogicalNameNoCiphering);
        aarq.mechanism_name = Some(MechanismName::Low);
        aarq.calling_authentication_value = Some(b"12345678".to_vec());
        let bytes = aarq.encode().unwrap();
        let tail = [
            0x8A, 0x02, 0x07, 0x80, 0x8B, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x02, 0x01, 0xAC,
            0x0A, 0x80, 0x08, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8',
        ];
        assert!(bytes.ends_with(&tail));
        assert_eq!(AARQApdu::decode(&bytes).unwrap(), aarq);
    }

    #[test]
    fn test_aare_accepted_with_challenge() {
        let mut aare = AAREApdu::new(
            ApplicationContextName::LogicalNameWithCiphering,
            AssociateResult::Accepted,
            AssociateSourceDiagnostic::ServiceUser(service_user::AUTHENTICATION_REQUIRED),
        );
        aare.responding_ap_title = Some(b"SRV00001".to_vec());
        aare.mechanism_name = Some(MechanismName::HighGmac);
        aare.responding_authentication_value = Some(b"P6wRJ21F".to_vec());
        aare.user_information = Some(vec![0x28, 0x01, 0x02]);
        let bytes = aare.encode().unwrap();
        assert_eq!(&bytes[..2], &[0x61, (bytes.len() - 2) as u8]);
        assert_eq!(AAREApdu::decode(&bytes).unwrap(), aare);
    }

    #[test]
    fn test_aare_rejected_from_meter() {
        // context LN, rejected-permanent, service-user application-context-name-not-supported
        let bytes = [
            0x61, 0x1F, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01, 0xA2,
            0x03, 0x02, 0x01, 0x01, 0xA3, 0x05, 0xA1, 0x03, 0x02, 0x01, 0x02, 0xBE, 0x06, 0x04,
            0x04, 0x0E, 0x01, 0x06, 0x01,
        ];
        let aare = AAREApdu::decode(&bytes).unwrap();
        assert_eq!(aare.result, AssociateResult::RejectedPermanent);
        assert_eq!(
            aare.result_source_diagnostic,
            AssociateSourceDiagnostic::ServiceUser(service_user::APPLICATION_CONTEXT_NAME_NOT_SUPPORTED)
        );
        assert_eq!(aare.user_information, Some(vec![0x0E, 0x01, 0x06, 0x01]));
    }

    #[test]
    fn test_aare_requires_result() {
        let bytes = [0x61, 0x0B, 0xA1, 0x09, 0x06, 0x07, 0x60, 0x85, 0x74, 0x05, 0x08, 0x01, 0x01];
        assert!(AAREApdu::decode(&bytes).is_err());
    }

    #[test]
    fn test_release_request() {
        let rlrq = RLRQApdu {
            reason: ReleaseRequestReason::Normal,
        };
        assert_eq!(rlrq.encode(), vec![0x62, 0x03, 0x80, 0x01, 0x00]);
        let rlre = RLREApdu::decode(&[0x63, 0x03, 0x80, 0x01, 0x00]).unwrap();
        assert_eq!(rlre.reason, Some(0));
    }
}
