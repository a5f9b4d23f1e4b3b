//! ACTION service PDUs
//!
//! Only the normal variants are carried. The client needs a method call
//! for the HLS reply to the server challenge and for single invocations.

use super::{expect_end, CosemMethodDescriptor, GetDataResult, InvokeIdAndPriority};
use crate::error::{DlmsError, DlmsResult};
use crate::pdu::{expect_tag, tags};
use dlms_asn1::{AxdrDecoder, AxdrEncoder};
use dlms_core::{DataAccessResult, DataObject};

const REQUEST_NORMAL: u8 = 0x01;
const RESPONSE_NORMAL: u8 = 0x01;

/// ActionRequest APDU (tag 0xC3)
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Normal {
        invoke_id_and_priority: InvokeIdAndPriority,
        method: CosemMethodDescriptor,
        parameters: Option<DataObject>,
    },
}

impl ActionRequest {
    pub fn normal(method: CosemMethodDescriptor, parameters: Option<DataObject>) -> Self {
        ActionRequest::Normal {
            invoke_id_and_priority: InvokeIdAndPriority::default(),
            method,
            parameters,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_u8(tags::ACTION_REQUEST);
        match self {
            ActionRequest::Normal {
                invoke_id_and_priority,
                method,
                parameters,
            } => {
                encoder.encode_u8(REQUEST_NORMAL);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                method.encode(&mut encoder);
                match parameters {
                    Some(value) => {
                        encoder.encode_u8(0x01);
                        encoder.encode_data_object(value);
                    }
                    None => encoder.encode_u8(0x00),
                }
            }
        }
        encoder.into_bytes()
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::ACTION_REQUEST, "ActionRequest")?;
        let choice = decoder.decode_u8()?;
        if choice != REQUEST_NORMAL {
            return Err(DlmsError::Protocol(format!(
                "Unsupported ActionRequest choice {}",
                choice
            )));
        }
        let invoke_id_and_priority = InvokeIdAndPriority::from_byte(decoder.decode_u8()?);
        let method = CosemMethodDescriptor::decode(&mut decoder)?;
        let parameters = if decoder.decode_bool()? {
            Some(decoder.decode_data_object()?)
        } else {
            None
        };
        expect_end(&decoder, "ActionRequest")?;
        Ok(ActionRequest::Normal {
            invoke_id_and_priority,
            method,
            parameters,
        })
    }
}

/// ActionResponse APDU (tag 0xC7)
///
/// The action-result enumeration shares its codes with data-access-result.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResponse {
    Normal {
        invoke_id_and_priority: InvokeIdAndPriority,
        result: DataAccessResult,
        return_data: Option<GetDataResult>,
    },
}

impl ActionResponse {
    pub fn invoke_id_and_priority(&self) -> InvokeIdAndPriority {
        match self {
            ActionResponse::Normal {
                invoke_id_and_priority,
                ..
            } => *invoke_id_and_priority,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_u8(tags::ACTION_RESPONSE);
        match self {
            ActionResponse::Normal {
                invoke_id_and_priority,
                result,
                return_data,
            } => {
                encoder.encode_u8(RESPONSE_NORMAL);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                encoder.encode_u8(result.to_u8());
                match return_data {
                    Some(data) => {
                        encoder.encode_u8(0x01);
                        data.encode(&mut encoder);
                    }
                    None => encoder.encode_u8(0x00),
                }
            }
        }
        encoder.into_bytes()
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::ACTION_RESPONSE, "ActionResponse")?;
        let choice = decoder.decode_u8()?;
        if choice != RESPONSE_NORMAL {
            return Err(DlmsError::Protocol(format!(
                "Unsupported ActionResponse choice {}",
                choice
            )));
        }
        let invoke_id_and_priority = InvokeIdAndPriority::from_byte(decoder.decode_u8()?);
        let result = DataAccessResult::from_u8(decoder.decode_u8()?);
        // Some meters stop after the result when there is nothing to return
        let return_data = if decoder.is_empty() || !decoder.decode_bool()? {
            None
        } else {
            Some(GetDataResult::decode(&mut decoder)?)
        };
        expect_end(&decoder, "ActionResponse")?;
        Ok(ActionResponse::Normal {
            invoke_id_and_priority,
            result,
            return_data,
        })
    }

    /// The returned value, if any, or the failure as an error
    pub fn into_result(self) -> DlmsResult<Option<DataObject>> {
        match self {
            ActionResponse::Normal {
                result,
                return_data,
                ..
            } => {
                if !result.is_success() {
                    return Err(DlmsError::DataAccess(result));
                }
                return_data.map(GetDataResult::into_result).transpose()
            }
        }
    }
}
