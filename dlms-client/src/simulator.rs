//! In-process meter answering over a `tokio::io::duplex` pipe
//!
//! Speaks HDLC with the same frame codec as the client and serves a small
//! object model: a few registers, a writable data object and a load
//! profile of 20 quarter-hour entries starting 2024-01-01 00:00.

use dlms_application::pdu::{Conformance, InitiateRequest, InitiateResponse};
use dlms_application::selector::{AccessSelector, CaptureObjectDefinition};
use dlms_application::service::get::encode_result_list;
use dlms_application::service::{
    ActionRequest, ActionResponse, AttributeReference, CosemAttributeDescriptor, DataBlock,
    DataBlockResult, GetDataResult, GetRequest, GetResponse, InvokeIdAndPriority, SetRequest,
    SetResponse,
};
use dlms_asn1::iso_acse::service_user;
use dlms_asn1::{
    encode_data_object, AAREApdu, AARQApdu, AssociateResult, AssociateSourceDiagnostic,
    AxdrEncoder, MechanismName,
};
use dlms_core::{CosemDateFormat, CosemDateTime, DataAccessResult, DataObject, ObisCode};
use dlms_security::xdlms::{is_glo_tag, InvocationCounter};
use dlms_security::{
    Hls5GmacAuth, HlsAuthenticator, SecurityControl, SessionKeys, SystemTitle, XdlmsContext,
};
use dlms_session::{
    FrameType, HdlcAddress, HdlcAddressPair, HdlcFrame, HdlcMessageDecoder, HdlcParameters,
    LLC_RESPONSE,
};
use dlms_transport::IoStream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub(crate) const CLIENT_TITLE: [u8; 8] = *b"CLI00001";
pub(crate) const SERVER_TITLE: [u8; 8] = *b"MTR00042";
pub(crate) const EK: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
];
pub(crate) const AK: [u8; 16] = [
    0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xDB, 0xDC, 0xDD, 0xDE, 0xDF,
];
const STOC: [u8; 16] = *b"server-challenge";

pub(crate) const SERIAL_NUMBER: ObisCode = ObisCode::new(0, 0, 96, 1, 0, 255);
pub(crate) const DEVICE_LABEL: ObisCode = ObisCode::new(0, 0, 96, 1, 1, 255);
pub(crate) const ACTIVE_ENERGY: ObisCode = ObisCode::new(1, 0, 1, 8, 0, 255);
pub(crate) const VOLTAGE_L1: ObisCode = ObisCode::new(1, 0, 32, 7, 0, 255);
pub(crate) const MISSING: ObisCode = ObisCode::new(1, 0, 99, 98, 0, 255);
pub(crate) const LOAD_PROFILE: ObisCode = ObisCode::new(1, 0, 99, 1, 0, 255);
pub(crate) const DISCONNECT_CONTROL: ObisCode = ObisCode::new(0, 0, 96, 3, 10, 255);
pub(crate) const PROFILE_ENTRIES: usize = 20;

#[derive(Debug, Clone)]
pub(crate) struct MeterSettings {
    pub hdlc: HdlcParameters,
    pub max_receive_pdu_size: u16,
    /// Association keys; without them ciphered contexts are refused
    pub keys: Option<SessionKeys>,
    /// Long get above this many bytes of raw data
    pub block_size: Option<usize>,
    /// Wait before answering a get touching one of these objects
    pub delays: Vec<(ObisCode, Duration)>,
}

impl Default for MeterSettings {
    fn default() -> Self {
        Self {
            hdlc: HdlcParameters::default(),
            max_receive_pdu_size: 0x0200,
            keys: None,
            block_size: None,
            delays: Vec::new(),
        }
    }
}

impl MeterSettings {
    pub(crate) fn with_keys(mut self) -> Self {
        self.keys = Some(SessionKeys {
            encryption_key: EK,
            authentication_key: AK,
        });
        self
    }
}

/// Plain APDUs the meter received, in order
#[derive(Debug, Clone, Default)]
pub(crate) struct RequestLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl RequestLog {
    fn push(&self, apdu: &[u8]) {
        self.0.lock().unwrap().push(apdu.to_vec());
    }

    pub(crate) fn with_tag(&self, tag: u8) -> Vec<Vec<u8>> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|apdu| apdu.first() == Some(&tag))
            .cloned()
            .collect()
    }
}

pub(crate) struct Meter {
    io: DuplexStream,
    decoder: HdlcMessageDecoder,
    pair: HdlcAddressPair,
    send_seq: u8,
    recv_seq: u8,
    settings: MeterSettings,
    objects: Vec<(CosemAttributeDescriptor, DataObject)>,
    profile: Vec<DataObject>,
    cipher: Option<XdlmsContext>,
    client_challenge: Vec<u8>,
    blocks: VecDeque<Vec<u8>>,
    log: RequestLog,
}

/// Start a meter; returns the client end of the pipe and the request log
pub(crate) fn spawn_meter(settings: MeterSettings) -> (IoStream<DuplexStream>, RequestLog) {
    let (client_io, meter_io) = tokio::io::duplex(16 * 1024);
    let meter = Meter::new(meter_io, settings);
    let log = meter.log.clone();
    tokio::spawn(meter.run());
    (IoStream::new(client_io), log)
}

pub(crate) fn profile_time(entry: usize) -> CosemDateTime {
    let minutes = entry * 15;
    CosemDateTime::new(2024, 1, 1, (minutes / 60) as u8, (minutes % 60) as u8, 0, 60, &[])
        .unwrap()
}

fn attribute(class_id: u16, instance_id: ObisCode) -> CosemAttributeDescriptor {
    CosemAttributeDescriptor::new(class_id, instance_id, 2)
}

impl Meter {
    fn new(io: DuplexStream, settings: MeterSettings) -> Self {
        let objects = vec![
            (
                attribute(1, SERIAL_NUMBER),
                DataObject::OctetString(b"MTR00042".to_vec()),
            ),
            (
                attribute(1, DEVICE_LABEL),
                DataObject::VisibleString(b"kitchen".to_vec()),
            ),
            (attribute(3, ACTIVE_ENERGY), DataObject::Unsigned32(123_456)),
            (attribute(3, VOLTAGE_L1), DataObject::Unsigned16(2301)),
        ];
        let profile = (0..PROFILE_ENTRIES)
            .map(|i| {
                DataObject::Structure(vec![
                    DataObject::OctetString(profile_time(i).encode()),
                    DataObject::Unsigned32(1000 + i as u32),
                ])
            })
            .collect();
        Self {
            io,
            decoder: HdlcMessageDecoder::new(),
            pair: HdlcAddressPair::new(
                HdlcAddress::server(1, 0, 1).unwrap(),
                HdlcAddress::client(0x10).unwrap(),
            ),
            send_seq: 0,
            recv_seq: 0,
            settings,
            objects,
            profile,
            cipher: None,
            client_challenge: Vec::new(),
            blocks: VecDeque::new(),
            log: RequestLog::default(),
        }
    }

    async fn next(&mut self) -> Option<HdlcFrame> {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return frame.ok();
            }
            let n = self.io.read(&mut buf).await.ok()?;
            if n == 0 {
                return None;
            }
            self.decoder.extend(&buf[..n]);
        }
    }

    async fn write(&mut self, frame: HdlcFrame) -> bool {
        self.io.write_all(&frame.encode().unwrap()).await.is_ok()
    }

    async fn reply(&mut self, apdu: &[u8]) -> bool {
        let mut info = LLC_RESPONSE.to_vec();
        info.extend_from_slice(apdu);
        let max = self.settings.hdlc.max_information_field_length_tx as usize;
        let chunks: Vec<Vec<u8>> = info.chunks(max).map(<[u8]>::to_vec).collect();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let frame =
                HdlcFrame::new_information(self.pair, chunk, self.send_seq, self.recv_seq, i < last);
            self.send_seq = (self.send_seq + 1) % 8;
            if !self.write(frame).await {
                return false;
            }
            if i < last {
                match self.next().await {
                    Some(rr) if matches!(rr.frame_type(), FrameType::ReceiveReady { .. }) => {}
                    _ => return false,
                }
            }
        }
        true
    }

    async fn run(mut self) {
        let mut apdu = Vec::new();
        while let Some(frame) = self.next().await {
            let alive = match frame.frame_type() {
                FrameType::SetNormalResponseMode => {
                    self.send_seq = 0;
                    self.recv_seq = 0;
                    let ua = HdlcFrame::new(
                        self.pair,
                        FrameType::UnnumberedAcknowledge,
                        self.settings.hdlc.encode_ua(),
                    );
                    self.write(ua).await
                }
                FrameType::Information { .. } => {
                    self.recv_seq = (self.recv_seq + 1) % 8;
                    apdu.extend_from_slice(frame.information_field());
                    if frame.is_segmented() {
                        let rr = HdlcFrame::new(
                            self.pair,
                            FrameType::ReceiveReady {
                                recv_seq: self.recv_seq,
                            },
                            Vec::new(),
                        );
                        self.write(rr).await
                    } else {
                        let request = std::mem::take(&mut apdu);
                        match self.answer(&request[3..]).await {
                            Some(answer) => self.reply(&answer).await,
                            None => true,
                        }
                    }
                }
                FrameType::Disconnect => {
                    let ua = HdlcFrame::new(self.pair, FrameType::UnnumberedAcknowledge, Vec::new());
                    self.write(ua).await
                }
                _ => true,
            };
            if !alive {
                break;
            }
        }
    }

    async fn answer(&mut self, apdu: &[u8]) -> Option<Vec<u8>> {
        let tag = *apdu.first()?;
        if tag == 0x60 {
            return self.associate(apdu);
        }
        if !is_glo_tag(tag) {
            return self.serve(apdu).await;
        }
        let plain = self.cipher.as_mut()?.decipher_apdu(apdu).ok()?;
        let answer = self.serve(&plain).await?;
        self.cipher.as_ref()?.cipher_apdu(&answer).ok()
    }

    fn associate(&mut self, apdu: &[u8]) -> Option<Vec<u8>> {
        let aarq = AARQApdu::decode(apdu).ok()?;
        let context = aarq.application_context_name;
        self.cipher = None;

        let refuse = |diagnostic| {
            AAREApdu::new(
                context,
                AssociateResult::RejectedPermanent,
                AssociateSourceDiagnostic::ServiceUser(diagnostic),
            )
            .encode()
            .ok()
        };
        let needs_keys = context.is_ciphered() || aarq.mechanism_name == Some(MechanismName::HighGmac);
        if needs_keys {
            let (Some(keys), Some(title)) = (self.settings.keys.clone(), aarq.calling_ap_title.as_deref())
            else {
                return refuse(service_user::APPLICATION_CONTEXT_NAME_NOT_SUPPORTED);
            };
            let mut cipher = XdlmsContext::new(
                keys,
                SystemTitle::new(SERVER_TITLE),
                InvocationCounter::new(1000),
                SecurityControl::new(0, true, true),
            );
            cipher.set_server_system_title(SystemTitle::from_slice(title).ok()?);
            self.cipher = Some(cipher);
        }

        let user_information = aarq.user_information.unwrap_or_default();
        let initiate = if context.is_ciphered() {
            match self.cipher.as_mut()?.decipher_apdu(&user_information) {
                Ok(plain) => plain,
                Err(_) => return refuse(service_user::NO_REASON_GIVEN),
            }
        } else {
            user_information
        };
        InitiateRequest::decode(&initiate).ok()?;
        let response =
            InitiateResponse::new(Conformance::default(), self.settings.max_receive_pdu_size)
                .encode();

        let mut aare = AAREApdu::new(
            context,
            AssociateResult::Accepted,
            AssociateSourceDiagnostic::ServiceUser(service_user::NULL),
        );
        aare.user_information = Some(if context.is_ciphered() {
            self.cipher.as_ref()?.cipher_apdu(&response).ok()?
        } else {
            response
        });
        if self.cipher.is_some() {
            aare.responding_ap_title = Some(SERVER_TITLE.to_vec());
        }
        if aarq.mechanism_name == Some(MechanismName::HighGmac) {
            self.client_challenge = aarq.calling_authentication_value.unwrap_or_default();
            aare.mechanism_name = Some(MechanismName::HighGmac);
            aare.responding_authentication_value = Some(STOC.to_vec());
            aare.result_source_diagnostic =
                AssociateSourceDiagnostic::ServiceUser(service_user::AUTHENTICATION_REQUIRED);
        }
        aare.encode().ok()
    }

    async fn serve(&mut self, apdu: &[u8]) -> Option<Vec<u8>> {
        self.log.push(apdu);
        match apdu.first()? {
            0xC0 => self.get(GetRequest::decode(apdu).ok()?).await,
            0xC1 => Some(self.set(SetRequest::decode(apdu).ok()?).encode()),
            0xC3 => Some(self.action(ActionRequest::decode(apdu).ok()?).encode()),
            _ => None,
        }
    }

    async fn get(&mut self, request: GetRequest) -> Option<Vec<u8>> {
        let (invoke_id_and_priority, references) = match request {
            GetRequest::Normal {
                invoke_id_and_priority,
                reference,
            } => (invoke_id_and_priority, vec![reference]),
            GetRequest::WithList {
                invoke_id_and_priority,
                references,
            } => (invoke_id_and_priority, references),
            GetRequest::Next {
                invoke_id_and_priority,
                block_number,
            } => return self.next_block(invoke_id_and_priority, block_number),
        };

        let delay = self
            .settings
            .delays
            .iter()
            .filter(|(obis, _)| references.iter().any(|r| r.descriptor.instance_id == *obis))
            .map(|(_, delay)| *delay)
            .max();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let results: Vec<GetDataResult> = references.iter().map(|r| self.read(r)).collect();
        let raw = match results.as_slice() {
            [GetDataResult::Data(value)] => encode_data_object(value),
            [_] => Vec::new(),
            _ => {
                let mut encoder = AxdrEncoder::new();
                encode_result_list(&mut encoder, &results);
                encoder.into_bytes()
            }
        };
        if let Some(size) = self.settings.block_size {
            if raw.len() > size {
                self.blocks = raw.chunks(size).map(<[u8]>::to_vec).collect();
                return self.next_block(invoke_id_and_priority, 0);
            }
        }

        let response = if references.len() == 1 {
            GetResponse::Normal {
                invoke_id_and_priority,
                result: results.into_iter().next()?,
            }
        } else {
            GetResponse::WithList {
                invoke_id_and_priority,
                results,
            }
        };
        Some(response.encode())
    }

    fn next_block(
        &mut self,
        invoke_id_and_priority: InvokeIdAndPriority,
        block_number: u32,
    ) -> Option<Vec<u8>> {
        let raw = self.blocks.pop_front()?;
        let block = DataBlock {
            last_block: self.blocks.is_empty(),
            block_number: block_number + 1,
            result: DataBlockResult::RawData(raw),
        };
        Some(
            GetResponse::WithDataBlock {
                invoke_id_and_priority,
                block,
            }
            .encode(),
        )
    }

    fn read(&self, reference: &AttributeReference) -> GetDataResult {
        let descriptor = reference.descriptor;
        if descriptor == CosemAttributeDescriptor::new(7, LOAD_PROFILE, 2) {
            return match self.select(reference.access_selection.as_ref()) {
                Some(entries) => GetDataResult::Data(DataObject::Array(entries)),
                None => GetDataResult::DataAccessResult(DataAccessResult::OtherReason),
            };
        }
        self.objects
            .iter()
            .find(|(d, _)| *d == descriptor)
            .map(|(_, value)| GetDataResult::Data(value.clone()))
            .unwrap_or(GetDataResult::DataAccessResult(
                DataAccessResult::ObjectUnavailable,
            ))
    }

    fn select(&self, selector: Option<&AccessSelector>) -> Option<Vec<DataObject>> {
        match selector {
            None => Some(self.profile.clone()),
            Some(AccessSelector::ByEntry {
                from_entry,
                to_entry,
                ..
            }) => {
                let from = (*from_entry as usize).max(1);
                let to = match *to_entry as usize {
                    0 => self.profile.len(),
                    to => to.min(self.profile.len()),
                };
                Some(self.profile.get(from - 1..to).unwrap_or_default().to_vec())
            }
            Some(AccessSelector::ByRange {
                restricting_object,
                from_value: DataObject::OctetString(from),
                to_value: DataObject::OctetString(to),
                ..
            }) if *restricting_object == CaptureObjectDefinition::clock() => {
                let (from, to) = (time_key(from)?, time_key(to)?);
                Some(
                    self.profile
                        .iter()
                        .filter(|entry| {
                            let key = match entry {
                                DataObject::Structure(fields) => match fields.first() {
                                    Some(DataObject::OctetString(time)) => time_key(time),
                                    _ => None,
                                },
                                _ => None,
                            };
                            key.is_some_and(|key| from <= key && key <= to)
                        })
                        .cloned()
                        .collect(),
                )
            }
            Some(_) => None,
        }
    }

    fn set(&mut self, request: SetRequest) -> SetResponse {
        match request {
            SetRequest::Normal {
                invoke_id_and_priority,
                reference,
                value,
            } => SetResponse::Normal {
                invoke_id_and_priority,
                result: self.write_attribute(&reference, value),
            },
            SetRequest::WithList {
                invoke_id_and_priority,
                references,
                values,
            } => SetResponse::WithList {
                invoke_id_and_priority,
                results: references
                    .iter()
                    .zip(values)
                    .map(|(reference, value)| self.write_attribute(reference, value))
                    .collect(),
            },
        }
    }

    /// Data objects (class 1) are writable, everything else is read-only
    fn write_attribute(&mut self, reference: &AttributeReference, value: DataObject) -> DataAccessResult {
        match self
            .objects
            .iter_mut()
            .find(|(d, _)| *d == reference.descriptor)
        {
            Some((descriptor, slot)) if descriptor.class_id == 1 => {
                *slot = value;
                DataAccessResult::Success
            }
            Some(_) => DataAccessResult::ReadWriteDenied,
            None => DataAccessResult::ObjectUndefined,
        }
    }

    fn action(&mut self, request: ActionRequest) -> ActionResponse {
        let ActionRequest::Normal {
            invoke_id_and_priority,
            method,
            parameters,
        } = request;
        let (result, return_data) = match (method.class_id, method.instance_id, parameters) {
            (15, ObisCode::CURRENT_ASSOCIATION, Some(DataObject::OctetString(f_stoc))) => {
                match self.hls_reply(&f_stoc) {
                    Some(f_ctos) => (
                        DataAccessResult::Success,
                        Some(GetDataResult::Data(DataObject::OctetString(f_ctos))),
                    ),
                    None => (DataAccessResult::ReadWriteDenied, None),
                }
            }
            (70, DISCONNECT_CONTROL, _) => (DataAccessResult::Success, None),
            _ => (DataAccessResult::ObjectUnavailable, None),
        };
        ActionResponse::Normal {
            invoke_id_and_priority,
            result,
            return_data,
        }
    }

    /// Check f(StoC) and compute f(CtoS)
    fn hls_reply(&self, f_stoc: &[u8]) -> Option<Vec<u8>> {
        let cipher = self.cipher.as_ref()?;
        let hls = Hls5GmacAuth::new();
        hls.verify(cipher, &STOC, f_stoc).ok()?;
        hls.respond(cipher, &[], &self.client_challenge).ok()
    }
}

/// Date and time fields of a 12-byte date-time, day of week left out
fn time_key(bytes: &[u8]) -> Option<[u8; 8]> {
    if bytes.len() != 12 {
        return None;
    }
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&bytes[..4]);
    key[4..].copy_from_slice(&bytes[5..9]);
    Some(key)
}
