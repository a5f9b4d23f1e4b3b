//! Request/response engine
//!
//! One task owns the link and the association. Submissions arrive over a
//! bounded channel and are executed strictly in order, one exchange on the
//! wire at a time; the channel is the queue. Responses carry no request id
//! the client could match on, so correlation is by order alone.

use crate::error::{DlmsError, DlmsResult};
use crate::request::{BatchResult, ItemValue, ObjectReference};
use dlms_application::association::Association;
use dlms_application::pdu::service_refusal;
use dlms_application::service::get::decode_result_list;
use dlms_application::service::{
    ActionRequest, ActionResponse, AttributeReference, BlockAssembler, CosemMethodDescriptor,
    GetDataResult, GetRequest, GetResponse, InvokeIdAndPriority, SetRequest, SetResponse,
};
use dlms_asn1::{decode_data_object, AxdrDecoder};
use dlms_core::DataObject;
use dlms_session::HdlcConnection;
use dlms_transport::StreamAccessor;
use log::{debug, warn};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Glo tag, length, security control, invocation counter and GCM tag
const CIPHERING_OVERHEAD: usize = 21;

/// Work submitted to the engine
pub(crate) enum Job {
    Batch {
        items: Vec<ObjectReference>,
        submitted: Instant,
        reply: oneshot::Sender<DlmsResult<BatchResult>>,
    },
    Invoke {
        method: CosemMethodDescriptor,
        parameters: Option<DataObject>,
        submitted: Instant,
        reply: oneshot::Sender<DlmsResult<Option<DataObject>>>,
    },
}

impl Job {
    fn fail(self, error: DlmsError) {
        // The caller may have stopped waiting; nothing to deliver then.
        match self {
            Job::Batch { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Job::Invoke { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Items of a batch going out in one request
#[derive(Debug, Clone)]
struct Chunk {
    indices: Vec<usize>,
    write: bool,
}

pub(crate) struct Engine<T: StreamAccessor> {
    link: HdlcConnection<T>,
    association: Association,
    request_deadline: Duration,
    max_items: usize,
    invoke_id: u8,
}

impl<T: StreamAccessor> Engine<T> {
    pub(crate) fn new(
        link: HdlcConnection<T>,
        association: Association,
        request_deadline: Duration,
        max_items: usize,
    ) -> Self {
        Self {
            link,
            association,
            request_deadline,
            max_items: max_items.max(1),
            invoke_id: 0,
        }
    }

    /// Serve jobs until a close request arrives or every client handle is gone
    ///
    /// A close request cancels the job in flight. Its handle, and the handle
    /// of every job still queued, resolve to [`DlmsError::ConnectionClosed`].
    pub(crate) async fn run(
        mut self,
        mut jobs: mpsc::Receiver<Job>,
        mut closes: mpsc::Receiver<oneshot::Sender<()>>,
    ) {
        let mut close_open = true;
        let ack = loop {
            let job = tokio::select! {
                biased;
                close = closes.recv(), if close_open => match close {
                    Some(ack) => break Some(ack),
                    None => {
                        close_open = false;
                        continue;
                    }
                },
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break None,
                },
            };

            let work = self.execute(job);
            tokio::pin!(work);
            let cancelled = loop {
                tokio::select! {
                    biased;
                    close = closes.recv(), if close_open => match close {
                        Some(ack) => break Some(ack),
                        None => close_open = false,
                    },
                    () = &mut work => break None,
                }
            };
            if let Some(ack) = cancelled {
                debug!("Close requested, abandoning the exchange in flight");
                break Some(ack);
            }
        };

        jobs.close();
        while let Ok(job) = jobs.try_recv() {
            job.fail(DlmsError::ConnectionClosed);
        }
        self.association.release();
        if let Err(e) = self.link.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }
        debug!("Engine stopped");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        closes.close();
        while let Ok(ack) = closes.try_recv() {
            let _ = ack.send(());
        }
    }

    async fn execute(&mut self, job: Job) {
        match job {
            Job::Batch {
                items,
                submitted,
                reply,
            } => {
                if reply.is_closed() {
                    debug!("Skipping a batch nobody waits for");
                    return;
                }
                let result = self.run_batch(&items, submitted).await;
                if reply.send(result).is_err() {
                    debug!("Batch handle dropped before delivery");
                }
            }
            Job::Invoke {
                method,
                parameters,
                submitted,
                reply,
            } => {
                if reply.is_closed() {
                    return;
                }
                let result = self.run_invoke(method, parameters, submitted).await;
                let _ = reply.send(result);
            }
        }
    }

    /// Execute one submission: reads first, then writes, in chunks
    ///
    /// Data-access rejections and the deadline affect single items. Any other
    /// failure (link loss, malformed response) fails the whole batch.
    async fn run_batch(
        &mut self,
        items: &[ObjectReference],
        submitted: Instant,
    ) -> DlmsResult<BatchResult> {
        let deadline = submitted + self.request_deadline;
        let mut results: Vec<Option<DlmsResult<ItemValue>>> = Vec::with_capacity(items.len());
        results.resize_with(items.len(), || None);

        let mut pending = self.plan(items);
        debug!(
            "Batch of {} items in {} requests",
            items.len(),
            pending.len()
        );
        while let Some(chunk) = pending.pop_front() {
            let apdu = self.encode_chunk(items, &chunk)?;
            if apdu.len() > self.max_request_size() {
                if chunk.indices.len() > 1 {
                    let (first, second) = chunk.indices.split_at(chunk.indices.len() / 2);
                    pending.push_front(Chunk {
                        indices: second.to_vec(),
                        write: chunk.write,
                    });
                    pending.push_front(Chunk {
                        indices: first.to_vec(),
                        write: chunk.write,
                    });
                } else {
                    results[chunk.indices[0]] = Some(Err(DlmsError::InvalidData(format!(
                        "Request of {} bytes exceeds the {} bytes the server accepts",
                        apdu.len(),
                        self.max_request_size()
                    ))));
                }
                continue;
            }

            let outcome = if chunk.write {
                self.write_chunk(apdu, chunk.indices.len(), deadline).await
            } else {
                self.read_chunk(apdu, chunk.indices.len(), deadline).await
            };
            match outcome {
                Ok(values) => {
                    let delivered_in = submitted.elapsed();
                    for (index, value) in chunk.indices.iter().zip(values) {
                        results[*index] = Some(value.map(|value| ItemValue {
                            value,
                            delivered_in,
                        }));
                    }
                }
                Err(DlmsError::RequestTimeout) => {
                    warn!("Request deadline passed with items outstanding");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let results = results
            .into_iter()
            .map(|result| result.unwrap_or(Err(DlmsError::RequestTimeout)))
            .collect();
        Ok(BatchResult::new(results, submitted.elapsed()))
    }

    fn plan(&self, items: &[ObjectReference]) -> VecDeque<Chunk> {
        let (writes, reads): (Vec<usize>, Vec<usize>) =
            (0..items.len()).partition(|&i| items[i].is_write());
        let reads = reads.chunks(self.max_items).map(|indices| Chunk {
            indices: indices.to_vec(),
            write: false,
        });
        let writes = writes.chunks(self.max_items).map(|indices| Chunk {
            indices: indices.to_vec(),
            write: true,
        });
        reads.chain(writes).collect()
    }

    fn encode_chunk(&mut self, items: &[ObjectReference], chunk: &Chunk) -> DlmsResult<Vec<u8>> {
        let invoke_id_and_priority = self.next_invoke_id()?;
        let references: Vec<AttributeReference> = chunk
            .indices
            .iter()
            .map(|&i| items[i].attribute_reference())
            .collect();
        if !chunk.write {
            let request = match <[AttributeReference; 1]>::try_from(references) {
                Ok([reference]) => GetRequest::Normal {
                    invoke_id_and_priority,
                    reference,
                },
                Err(references) => GetRequest::WithList {
                    invoke_id_and_priority,
                    references,
                },
            };
            return Ok(request.encode());
        }

        let mut values: Vec<DataObject> = chunk
            .indices
            .iter()
            .map(|&i| items[i].write_value.clone().unwrap_or(DataObject::Null))
            .collect();
        let request = if values.len() == 1 {
            SetRequest::Normal {
                invoke_id_and_priority,
                reference: references
                    .into_iter()
                    .next()
                    .ok_or_else(|| DlmsError::InvalidData("Empty write request".to_string()))?,
                value: values.remove(0),
            }
        } else {
            SetRequest::WithList {
                invoke_id_and_priority,
                references,
                values,
            }
        };
        request.encode()
    }

    /// Send a GetRequest and collect one result per attribute
    ///
    /// Follows block transfer until the last block.
    async fn read_chunk(
        &mut self,
        apdu: Vec<u8>,
        count: usize,
        deadline: Instant,
    ) -> DlmsResult<Vec<DlmsResult<DataObject>>> {
        let invoke = invoke_id_of(&apdu);
        let mut response = GetResponse::decode(&self.exchange(&apdu, deadline).await?)?;
        let mut assembler: Option<BlockAssembler> = None;
        loop {
            check_invoke_id(invoke, response.invoke_id_and_priority())?;
            let block = match response {
                GetResponse::Normal { result, .. } if count == 1 => {
                    return Ok(vec![result.into_result()])
                }
                GetResponse::WithList { results, .. } if results.len() == count => {
                    return Ok(results.into_iter().map(GetDataResult::into_result).collect())
                }
                GetResponse::WithDataBlock { block, .. } => block,
                other => {
                    return Err(DlmsError::Protocol(format!(
                        "GetResponse does not answer a request for {} attributes: {:?}",
                        count, other
                    )))
                }
            };

            let assembler = assembler.get_or_insert_with(BlockAssembler::new);
            match assembler.push(block) {
                Ok(Some(raw)) => return decode_raw_data(&raw, count),
                Ok(None) => {}
                Err(DlmsError::DataAccess(result)) => {
                    return Ok((0..count).map(|_| Err(DlmsError::DataAccess(result))).collect())
                }
                Err(e) => return Err(e),
            }
            let next = GetRequest::Next {
                invoke_id_and_priority: InvokeIdAndPriority::from_byte(invoke),
                block_number: assembler.last_block_number(),
            };
            debug!("Asking for block {}", assembler.last_block_number() + 1);
            response = GetResponse::decode(&self.exchange(&next.encode(), deadline).await?)?;
        }
    }

    async fn write_chunk(
        &mut self,
        apdu: Vec<u8>,
        count: usize,
        deadline: Instant,
    ) -> DlmsResult<Vec<DlmsResult<DataObject>>> {
        let invoke = invoke_id_of(&apdu);
        let response = SetResponse::decode(&self.exchange(&apdu, deadline).await?)?;
        check_invoke_id(invoke, response.invoke_id_and_priority())?;
        let results = response.into_results();
        if results.len() != count {
            return Err(DlmsError::Protocol(format!(
                "SetResponse carries {} results for {} attributes",
                results.len(),
                count
            )));
        }
        Ok(results
            .into_iter()
            .map(|result| {
                if result.is_success() {
                    Ok(DataObject::Null)
                } else {
                    Err(DlmsError::DataAccess(result))
                }
            })
            .collect())
    }

    async fn run_invoke(
        &mut self,
        method: CosemMethodDescriptor,
        parameters: Option<DataObject>,
        submitted: Instant,
    ) -> DlmsResult<Option<DataObject>> {
        let deadline = submitted + self.request_deadline;
        let invoke_id_and_priority = self.next_invoke_id()?;
        let request = ActionRequest::Normal {
            invoke_id_and_priority,
            method,
            parameters,
        };
        let response = ActionResponse::decode(&self.exchange(&request.encode(), deadline).await?)?;
        check_invoke_id(
            invoke_id_and_priority.to_byte(),
            response.invoke_id_and_priority(),
        )?;
        response.into_result()
    }

    /// One request on the wire and its response, protected per the association
    async fn exchange(&mut self, apdu: &[u8], deadline: Instant) -> DlmsResult<Vec<u8>> {
        if !self.link.is_connected() {
            return Err(DlmsError::ConnectionClosed);
        }
        if Instant::now() >= deadline {
            return Err(DlmsError::RequestTimeout);
        }
        let wire = self.association.protect_request(apdu)?;
        let reply = match self.link.request(&wire, deadline).await {
            Ok(reply) => reply,
            Err(DlmsError::Timeout) => return Err(DlmsError::RequestTimeout),
            Err(e) => return Err(e),
        };
        let plain = self.association.unprotect_response(&reply)?;
        match service_refusal(&plain) {
            Some(refusal) => Err(refusal),
            None => Ok(plain),
        }
    }

    /// Largest plain APDU that still fits the server's receive size
    fn max_request_size(&self) -> usize {
        let limit = self
            .association
            .negotiated()
            .map_or(usize::MAX, |negotiated| negotiated.max_request_size());
        if self.association.is_ciphered() {
            limit.saturating_sub(CIPHERING_OVERHEAD)
        } else {
            limit
        }
    }

    fn next_invoke_id(&mut self) -> DlmsResult<InvokeIdAndPriority> {
        let invoke = InvokeIdAndPriority::new(self.invoke_id, true)?;
        self.invoke_id = (self.invoke_id + 1) & 0x0F;
        Ok(invoke)
    }
}

/// The invoke-id-and-priority byte of an encoded Get/Set request
fn invoke_id_of(apdu: &[u8]) -> u8 {
    apdu.get(2).copied().unwrap_or_default()
}

fn check_invoke_id(sent: u8, received: InvokeIdAndPriority) -> DlmsResult<()> {
    let sent = InvokeIdAndPriority::from_byte(sent);
    if sent.invoke_id() == received.invoke_id() {
        Ok(())
    } else {
        Err(DlmsError::Protocol(format!(
            "Response for invoke id {} while {} is outstanding",
            received.invoke_id(),
            sent.invoke_id()
        )))
    }
}

/// Decode the reassembled raw data of a long get
///
/// A single attribute yields its value; a list yields the Get-Data-Result
/// sequence.
fn decode_raw_data(raw: &[u8], count: usize) -> DlmsResult<Vec<DlmsResult<DataObject>>> {
    if count == 1 {
        return Ok(vec![Ok(decode_data_object(raw)?)]);
    }
    let mut decoder = AxdrDecoder::new(raw);
    let results = decode_result_list(&mut decoder)?;
    if results.len() != count {
        return Err(DlmsError::Protocol(format!(
            "Data blocks carry {} results for {} attributes",
            results.len(),
            count
        )));
    }
    Ok(results.into_iter().map(GetDataResult::into_result).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dlms_application::service::CosemAttributeDescriptor;
    use dlms_asn1::{encode_data_object, AxdrEncoder};
    use dlms_application::service::get::encode_result_list;
    use dlms_core::{DataAccessResult, ObisCode};

    #[test]
    fn test_check_invoke_id() {
        assert!(check_invoke_id(0xC3, InvokeIdAndPriority::from_byte(0xC3)).is_ok());
        assert!(check_invoke_id(0xC3, InvokeIdAndPriority::from_byte(0x43)).is_ok());
        assert!(matches!(
            check_invoke_id(0xC3, InvokeIdAndPriority::from_byte(0xC4)),
            Err(DlmsError::Protocol(_))
        ));
    }

    #[test]
    fn test_invoke_id_position() {
        let request = GetRequest::Normal {
            invoke_id_and_priority: InvokeIdAndPriority::new(7, true).unwrap(),
            reference: AttributeReference::new(CosemAttributeDescriptor::new(
                1,
                ObisCode::new(0, 0, 96, 1, 0, 255),
                2,
            )),
        };
        assert_eq!(invoke_id_of(&request.encode()), 0xC7);
    }

    #[test]
    fn test_decode_raw_data() {
        let single = encode_data_object(&DataObject::Unsigned32(7));
        assert_eq!(
            decode_raw_data(&single, 1).unwrap()[0].as_ref().unwrap(),
            &DataObject::Unsigned32(7)
        );

        let mut encoder = AxdrEncoder::new();
        encode_result_list(
            &mut encoder,
            &[
                GetDataResult::Data(DataObject::Boolean(true)),
                GetDataResult::DataAccessResult(DataAccessResult::ReadWriteDenied),
            ],
        );
        let list = decode_raw_data(&encoder.into_bytes(), 2).unwrap();
        assert_eq!(list[0].as_ref().unwrap(), &DataObject::Boolean(true));
        assert!(matches!(
            list[1],
            Err(DlmsError::DataAccess(DataAccessResult::ReadWriteDenied))
        ));
        assert!(decode_raw_data(&encode_data_object(&DataObject::Null), 3).is_err());
    }
}
