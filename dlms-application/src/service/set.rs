//! SET service PDUs

use super::{decode_count, expect_end, AttributeReference, InvokeIdAndPriority};
use crate::error::{DlmsError, DlmsResult};
use crate::pdu::{expect_tag, tags};
use dlms_asn1::{AxdrDecoder, AxdrEncoder};
use dlms_core::{DataAccessResult, DataObject};

const REQUEST_NORMAL: u8 = 0x01;
const REQUEST_WITH_LIST: u8 = 0x04;
const RESPONSE_NORMAL: u8 = 0x01;
const RESPONSE_WITH_LIST: u8 = 0x05;

/// SetRequest APDU (tag 0xC1)
///
/// Writes that do not fit one APDU (the datablock variants) are not
/// produced by this client.
#[derive(Debug, Clone, PartialEq)]
pub enum SetRequest {
    Normal {
        invoke_id_and_priority: InvokeIdAndPriority,
        reference: AttributeReference,
        value: DataObject,
    },
    /// `references` and `values` are matched by position
    WithList {
        invoke_id_and_priority: InvokeIdAndPriority,
        references: Vec<AttributeReference>,
        values: Vec<DataObject>,
    },
}

impl SetRequest {
    pub fn encode(&self) -> DlmsResult<Vec<u8>> {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_u8(tags::SET_REQUEST);
        match self {
            SetRequest::Normal {
                invoke_id_and_priority,
                reference,
                value,
            } => {
                encoder.encode_u8(REQUEST_NORMAL);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                reference.encode(&mut encoder);
                encoder.encode_data_object(value);
            }
            SetRequest::WithList {
                invoke_id_and_priority,
                references,
                values,
            } => {
                if references.len() != values.len() {
                    return Err(DlmsError::InvalidData(format!(
                        "{} attributes but {} values to set",
                        references.len(),
                        values.len()
                    )));
                }
                encoder.encode_u8(REQUEST_WITH_LIST);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                encoder.encode_length(references.len());
                for reference in references {
                    reference.encode(&mut encoder);
                }
                encoder.encode_length(values.len());
                for value in values {
                    encoder.encode_data_object(value);
                }
            }
        }
        Ok(encoder.into_bytes())
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::SET_REQUEST, "SetRequest")?;
        let choice = decoder.decode_u8()?;
        let invoke_id_and_priority = InvokeIdAndPriority::from_byte(decoder.decode_u8()?);
        let request = match choice {
            REQUEST_NORMAL => SetRequest::Normal {
                invoke_id_and_priority,
                reference: AttributeReference::decode(&mut decoder)?,
                value: decoder.decode_data_object()?,
            },
            REQUEST_WITH_LIST => {
                let count = decode_count(&mut decoder)?;
                let references = (0..count)
                    .map(|_| AttributeReference::decode(&mut decoder))
                    .collect::<DlmsResult<Vec<_>>>()?;
                let count = decode_count(&mut decoder)?;
                let values = (0..count)
                    .map(|i| decoder.decode_data_object().map_err(|e| e.within_element(i)))
                    .collect::<DlmsResult<Vec<_>>>()?;
                SetRequest::WithList {
                    invoke_id_and_priority,
                    references,
                    values,
                }
            }
            other => {
                return Err(DlmsError::Protocol(format!(
                    "Unsupported SetRequest choice {}",
                    other
                )))
            }
        };
        expect_end(&decoder, "SetRequest")?;
        Ok(request)
    }
}

/// SetResponse APDU (tag 0xC5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetResponse {
    Normal {
        invoke_id_and_priority: InvokeIdAndPriority,
        result: DataAccessResult,
    },
    WithList {
        invoke_id_and_priority: InvokeIdAndPriority,
        results: Vec<DataAccessResult>,
    },
}

impl SetResponse {
    pub fn invoke_id_and_priority(&self) -> InvokeIdAndPriority {
        match self {
            SetResponse::Normal {
                invoke_id_and_priority,
                ..
            }
            | SetResponse::WithList {
                invoke_id_and_priority,
                ..
            } => *invoke_id_and_priority,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_u8(tags::SET_RESPONSE);
        match self {
            SetResponse::Normal {
                invoke_id_and_priority,
                result,
            } => {
                encoder.encode_u8(RESPONSE_NORMAL);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                encoder.encode_u8(result.to_u8());
            }
            SetResponse::WithList {
                invoke_id_and_priority,
                results,
            } => {
                encoder.encode_u8(RESPONSE_WITH_LIST);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                encoder.encode_length(results.len());
                for result in results {
                    encoder.encode_u8(result.to_u8());
                }
            }
        }
        encoder.into_bytes()
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::SET_RESPONSE, "SetResponse")?;
        let choice = decoder.decode_u8()?;
        let invoke_id_and_priority = InvokeIdAndPriority::from_byte(decoder.decode_u8()?);
        let response = match choice {
            RESPONSE_NORMAL => SetResponse::Normal {
                invoke_id_and_priority,
                result: DataAccessResult::from_u8(decoder.decode_u8()?),
            },
            RESPONSE_WITH_LIST => {
                let count = decode_count(&mut decoder)?;
                let results = (0..count)
                    .map(|_| decoder.decode_u8().map(DataAccessResult::from_u8))
                    .collect::<DlmsResult<Vec<_>>>()?;
                SetResponse::WithList {
                    invoke_id_and_priority,
                    results,
                }
            }
            other => {
                return Err(DlmsError::Protocol(format!(
                    "Unsupported SetResponse choice {}",
                    other
                )))
            }
        };
        expect_end(&decoder, "SetResponse")?;
        Ok(response)
    }

    /// Per-attribute results in request order
    pub fn into_results(self) -> Vec<DataAccessResult> {
        match self {
            SetResponse::Normal { result, .. } => vec![result],
            SetResponse::WithList { results, .. } => results,
        }
    }
}
