//! GET service PDUs and long-get block reassembly

use super::{decode_count, expect_end, AttributeReference, GetDataResult, InvokeIdAndPriority};
use crate::error::{DlmsError, DlmsResult};
use crate::pdu::{expect_tag, tags};
use dlms_asn1::{AxdrDecoder, AxdrEncoder};
use dlms_core::DataAccessResult;

const NORMAL: u8 = 0x01;
const NEXT: u8 = 0x02;
const WITH_LIST: u8 = 0x03;
const WITH_DATA_BLOCK: u8 = 0x02;

/// GetRequest APDU (tag 0xC0)
#[derive(Debug, Clone, PartialEq)]
pub enum GetRequest {
    Normal {
        invoke_id_and_priority: InvokeIdAndPriority,
        reference: AttributeReference,
    },
    /// Ask for the block after `block_number`
    Next {
        invoke_id_and_priority: InvokeIdAndPriority,
        block_number: u32,
    },
    WithList {
        invoke_id_and_priority: InvokeIdAndPriority,
        references: Vec<AttributeReference>,
    },
}

impl GetRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_u8(tags::GET_REQUEST);
        match self {
            GetRequest::Normal {
                invoke_id_and_priority,
                reference,
            } => {
                encoder.encode_u8(NORMAL);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                reference.encode(&mut encoder);
            }
            GetRequest::Next {
                invoke_id_and_priority,
                block_number,
            } => {
                encoder.encode_u8(NEXT);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                encoder.encode_u32(*block_number);
            }
            GetRequest::WithList {
                invoke_id_and_priority,
                references,
            } => {
                encoder.encode_u8(WITH_LIST);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                encoder.encode_length(references.len());
                for reference in references {
                    reference.encode(&mut encoder);
                }
            }
        }
        encoder.into_bytes()
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::GET_REQUEST, "GetRequest")?;
        let choice = decoder.decode_u8()?;
        let invoke_id_and_priority = InvokeIdAndPriority::from_byte(decoder.decode_u8()?);
        let request = match choice {
            NORMAL => GetRequest::Normal {
                invoke_id_and_priority,
                reference: AttributeReference::decode(&mut decoder)?,
            },
            NEXT => GetRequest::Next {
                invoke_id_and_priority,
                block_number: decoder.decode_u32()?,
            },
            WITH_LIST => {
                let count = decode_count(&mut decoder)?;
                let references = (0..count)
                    .map(|_| AttributeReference::decode(&mut decoder))
                    .collect::<DlmsResult<Vec<_>>>()?;
                GetRequest::WithList {
                    invoke_id_and_priority,
                    references,
                }
            }
            other => {
                return Err(DlmsError::Protocol(format!(
                    "Unknown GetRequest choice {}",
                    other
                )))
            }
        };
        expect_end(&decoder, "GetRequest")?;
        Ok(request)
    }
}

/// One block of a long get
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    pub last_block: bool,
    pub block_number: u32,
    pub result: DataBlockResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataBlockResult {
    RawData(Vec<u8>),
    DataAccessResult(DataAccessResult),
}

/// GetResponse APDU (tag 0xC4)
#[derive(Debug, Clone, PartialEq)]
pub enum GetResponse {
    Normal {
        invoke_id_and_priority: InvokeIdAndPriority,
        result: GetDataResult,
    },
    WithDataBlock {
        invoke_id_and_priority: InvokeIdAndPriority,
        block: DataBlock,
    },
    WithList {
        invoke_id_and_priority: InvokeIdAndPriority,
        results: Vec<GetDataResult>,
    },
}

impl GetResponse {
    pub fn invoke_id_and_priority(&self) -> InvokeIdAndPriority {
        match self {
            GetResponse::Normal {
                invoke_id_and_priority,
                ..
            }
            | GetResponse::WithDataBlock {
                invoke_id_and_priority,
                ..
            }
            | GetResponse::WithList {
                invoke_id_and_priority,
                ..
            } => *invoke_id_and_priority,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = AxdrEncoder::new();
        encoder.encode_u8(tags::GET_RESPONSE);
        match self {
            GetResponse::Normal {
                invoke_id_and_priority,
                result,
            } => {
                encoder.encode_u8(NORMAL);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                result.encode(&mut encoder);
            }
            GetResponse::WithDataBlock {
                invoke_id_and_priority,
                block,
            } => {
                encoder.encode_u8(WITH_DATA_BLOCK);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                encoder.encode_bool(block.last_block);
                encoder.encode_u32(block.block_number);
                match &block.result {
                    DataBlockResult::RawData(raw) => {
                        encoder.encode_u8(0x00);
                        encoder.encode_octet_string(raw);
                    }
                    DataBlockResult::DataAccessResult(result) => {
                        encoder.encode_u8(0x01);
                        encoder.encode_u8(result.to_u8());
                    }
                }
            }
            GetResponse::WithList {
                invoke_id_and_priority,
                results,
            } => {
                encoder.encode_u8(WITH_LIST);
                encoder.encode_u8(invoke_id_and_priority.to_byte());
                encode_result_list(&mut encoder, results);
            }
        }
        encoder.into_bytes()
    }

    pub fn decode(data: &[u8]) -> DlmsResult<Self> {
        let mut decoder = AxdrDecoder::new(data);
        expect_tag(&mut decoder, tags::GET_RESPONSE, "GetResponse")?;
        let choice = decoder.decode_u8()?;
        let invoke_id_and_priority = InvokeIdAndPriority::from_byte(decoder.decode_u8()?);
        let response = match choice {
            NORMAL => GetResponse::Normal {
                invoke_id_and_priority,
                result: GetDataResult::decode(&mut decoder)?,
            },
            WITH_DATA_BLOCK => {
                let last_block = decoder.decode_bool()?;
                let block_number = decoder.decode_u32()?;
                let offset = decoder.position();
                let result = match decoder.decode_u8()? {
                    0x00 => DataBlockResult::RawData(decoder.decode_octet_string()?),
                    0x01 => DataBlockResult::DataAccessResult(DataAccessResult::from_u8(
                        decoder.decode_u8()?,
                    )),
                    other => {
                        return Err(DlmsError::decode(
                            offset,
                            format!("invalid DataBlock-G result choice {}", other),
                        ))
                    }
                };
                GetResponse::WithDataBlock {
                    invoke_id_and_priority,
                    block: DataBlock {
                        last_block,
                        block_number,
                        result,
                    },
                }
            }
            WITH_LIST => GetResponse::WithList {
                invoke_id_and_priority,
                results: decode_result_list(&mut decoder)?,
            },
            other => {
                return Err(DlmsError::Protocol(format!(
                    "Unknown GetResponse choice {}",
                    other
                )))
            }
        };
        expect_end(&decoder, "GetResponse")?;
        Ok(response)
    }
}

/// SEQUENCE OF Get-Data-Result, as in WithList and in reassembled list blocks
pub fn encode_result_list(encoder: &mut AxdrEncoder, results: &[GetDataResult]) {
    encoder.encode_length(results.len());
    for result in results {
        result.encode(encoder);
    }
}

pub fn decode_result_list(decoder: &mut AxdrDecoder<'_>) -> DlmsResult<Vec<GetDataResult>> {
    let count = decode_count(decoder)?;
    (0..count)
        .map(|i| GetDataResult::decode(decoder).map_err(|e| e.within_element(i)))
        .collect()
}

/// Collects the blocks of a long get
///
/// Blocks must arrive numbered 1, 2, 3... A gap or repeat is a protocol
/// violation; the transfer cannot be resumed.
#[derive(Debug)]
pub struct BlockAssembler {
    next_block: u32,
    raw: Vec<u8>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self {
            next_block: 1,
            raw: Vec::new(),
        }
    }

    /// Number of the block most recently accepted, for GetRequest-Next
    pub fn last_block_number(&self) -> u32 {
        self.next_block.saturating_sub(1)
    }

    /// Add a block; returns the complete payload after the last one
    pub fn push(&mut self, block: DataBlock) -> DlmsResult<Option<Vec<u8>>> {
        if block.block_number != self.next_block {
            return Err(DlmsError::Protocol(format!(
                "Data block {} received while {} was expected",
                block.block_number, self.next_block
            )));
        }
        match block.result {
            DataBlockResult::RawData(raw) => self.raw.extend(raw),
            DataBlockResult::DataAccessResult(result) => return Err(DlmsError::DataAccess(result)),
        }
        self.next_block += 1;
        if block.last_block {
            Ok(Some(std::mem::take(&mut self.raw)))
        } else {
            Ok(None)
        }
    }
}

impl Default for BlockAssembler {
    fn default() -> Self {
        Self::new()
    }
}
