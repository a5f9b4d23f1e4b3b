//! HDLC link: connect, framed exchange of APDUs, disconnect

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::address::HdlcAddressPair;
use crate::hdlc::decoder::HdlcMessageDecoder;
use crate::hdlc::frame::{FrameType, HdlcFrame, LLC_REQUEST, LLC_RESPONSE};
use crate::hdlc::parameters::{HdlcAddressing, HdlcParameters, LinkTimeouts};
use crate::hdlc::state::HdlcConnectionState;
use crate::hdlc::statistics::HdlcStatistics;
use dlms_transport::StreamAccessor;
use log::{debug, trace, warn};
use tokio::time::Instant;

const READ_CHUNK: usize = 2048;

/// Client side of one HDLC link
///
/// Owns the byte stream, the sequence counters and the negotiated limits.
/// Nothing else mutates them; callers serialize access through `&mut self`.
pub struct HdlcConnection<T: StreamAccessor> {
    transport: T,
    addresses: HdlcAddressPair,
    proposed: HdlcParameters,
    parameters: HdlcParameters,
    timeouts: LinkTimeouts,
    send_sequence: u8,
    receive_sequence: u8,
    state: HdlcConnectionState,
    decoder: HdlcMessageDecoder,
    statistics: HdlcStatistics,
    /// N(R) a reply to a timed-out request would carry
    expired_reply: Option<u8>,
}

impl<T: StreamAccessor> HdlcConnection<T> {
    pub fn new(
        transport: T,
        addressing: HdlcAddressing,
        parameters: HdlcParameters,
        timeouts: LinkTimeouts,
    ) -> DlmsResult<Self> {
        let addresses = HdlcAddressPair::new(addressing.client()?, addressing.server()?);
        Ok(Self {
            transport,
            addresses,
            proposed: parameters,
            parameters,
            timeouts,
            send_sequence: 0,
            receive_sequence: 0,
            state: HdlcConnectionState::Idle,
            decoder: HdlcMessageDecoder::new(),
            statistics: HdlcStatistics::new(),
            expired_reply: None,
        })
    }

    pub fn state(&self) -> HdlcConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == HdlcConnectionState::Connected
    }

    /// Limits in force: negotiated once connected, proposed before
    pub fn parameters(&self) -> &HdlcParameters {
        &self.parameters
    }

    pub fn timeouts(&self) -> &LinkTimeouts {
        &self.timeouts
    }

    pub fn statistics(&self) -> &HdlcStatistics {
        &self.statistics
    }

    pub fn send_sequence(&self) -> u8 {
        self.send_sequence
    }

    pub fn receive_sequence(&self) -> u8 {
        self.receive_sequence
    }

    /// Largest APDU that still fits one I-frame after the LLC header
    pub fn max_apdu_per_frame(&self) -> usize {
        (self.parameters.max_information_field_length_tx as usize).saturating_sub(LLC_REQUEST.len())
    }

    fn transition_to(&mut self, new_state: HdlcConnectionState) -> DlmsResult<()> {
        self.state.validate_transition(new_state)?;
        if self.state != new_state {
            debug!("HDLC link {} -> {}", self.state, new_state);
        }
        self.state = new_state;
        Ok(())
    }

    /// Drop to `Closed` after an unrecoverable failure and hand the error back
    async fn fail_link(&mut self, error: DlmsError) -> DlmsError {
        warn!("HDLC link failed: {}", error);
        let _ = self.transport.close().await;
        self.state = HdlcConnectionState::Closed;
        self.decoder.clear();
        error
    }

    /// SNRM/UA handshake
    pub async fn connect(&mut self) -> DlmsResult<()> {
        self.transition_to(HdlcConnectionState::Connecting)?;
        self.decoder.clear();
        self.expired_reply = None;
        let snrm = HdlcFrame::new(
            self.addresses,
            FrameType::SetNormalResponseMode,
            self.proposed.encode_snrm(),
        );
        self.send_frame(&snrm).await?;

        let deadline = Instant::now() + self.timeouts.snrm_timeout;
        loop {
            let frame = match self.next_frame(deadline).await {
                Ok(frame) => frame,
                Err(DlmsError::Timeout) => {
                    self.statistics.timeouts += 1;
                    return Err(self.fail_link(DlmsError::LinkTimeout("SNRM")).await);
                }
                Err(e) => return Err(e),
            };
            match frame.frame_type() {
                FrameType::UnnumberedAcknowledge => {
                    let negotiated = match self.proposed.negotiate(frame.information_field()) {
                        Ok(p) => p,
                        Err(e) => return Err(self.fail_link(e).await),
                    };
                    self.parameters = negotiated;
                    self.send_sequence = 0;
                    self.receive_sequence = 0;
                    self.transition_to(HdlcConnectionState::Connected)?;
                    debug!(
                        "HDLC connected, max info tx={} rx={}, window tx={} rx={}",
                        negotiated.max_information_field_length_tx,
                        negotiated.max_information_field_length_rx,
                        negotiated.window_size_tx,
                        negotiated.window_size_rx
                    );
                    return Ok(());
                }
                FrameType::DisconnectMode => {
                    return Err(self
                        .fail_link(DlmsError::Protocol("SNRM rejected with DM".to_string()))
                        .await);
                }
                other => debug!("Ignoring {:?} while connecting", other),
            }
        }
    }

    /// Send one APDU, split over several I-frames when needed
    pub async fn send(&mut self, apdu: &[u8]) -> DlmsResult<()> {
        if !self.state.can_send_information() {
            return Err(DlmsError::Protocol(format!(
                "Cannot send data while link is {}",
                self.state
            )));
        }
        let mut info = Vec::with_capacity(LLC_REQUEST.len() + apdu.len());
        info.extend_from_slice(&LLC_REQUEST);
        info.extend_from_slice(apdu);

        let max = (self.parameters.max_information_field_length_tx as usize).max(1);
        let segments: Vec<&[u8]> = info.chunks(max).collect();
        let last = segments.len() - 1;
        for (index, segment) in segments.into_iter().enumerate() {
            let more = index < last;
            let frame = HdlcFrame::new_information(
                self.addresses,
                segment.to_vec(),
                self.send_sequence,
                self.receive_sequence,
                more,
            );
            self.send_frame(&frame).await?;
            self.send_sequence = (self.send_sequence + 1) % 8;
            if more {
                self.statistics.segments_sent += 1;
                self.await_receive_ready().await?;
            }
        }
        Ok(())
    }

    /// The server acknowledges each segment it receives with RR
    async fn await_receive_ready(&mut self) -> DlmsResult<()> {
        let deadline = Instant::now() + self.timeouts.response_timeout;
        loop {
            let frame = match self.next_frame(deadline).await {
                Ok(frame) => frame,
                Err(DlmsError::Timeout) => {
                    self.statistics.timeouts += 1;
                    return Err(self.fail_link(DlmsError::LinkTimeout("RR")).await);
                }
                Err(e) => return Err(e),
            };
            match frame.frame_type() {
                FrameType::ReceiveReady { recv_seq } if recv_seq == self.send_sequence => {
                    return Ok(())
                }
                FrameType::ReceiveReady { recv_seq } => {
                    self.statistics.sequence_errors += 1;
                    return Err(self
                        .fail_link(DlmsError::Protocol(format!(
                            "RR acknowledges {} while {} was expected",
                            recv_seq, self.send_sequence
                        )))
                        .await);
                }
                // only a reply to an expired request may cross a segment in flight
                FrameType::Information { send_seq, recv_seq }
                    if self.expired_reply == Some(recv_seq) =>
                {
                    self.accept_information(send_seq, recv_seq, frame.is_segmented())
                        .await?;
                }
                FrameType::Information { .. } => {
                    self.statistics.sequence_errors += 1;
                    return Err(self
                        .fail_link(DlmsError::Protocol(format!(
                            "Unexpected {} while waiting for RR",
                            frame
                        )))
                        .await);
                }
                other => self.check_link_frame(other).await?,
            }
        }
    }

    /// Check N(S) and N(R) of an incoming I-frame, then advance V(R)
    ///
    /// Returns `true` for a frame of a reply whose request already timed
    /// out; its content is to be dropped. Any other mismatch closes the link
    /// and leaves the counters untouched.
    async fn accept_information(
        &mut self,
        send_seq: u8,
        recv_seq: u8,
        segmented: bool,
    ) -> DlmsResult<bool> {
        if send_seq != self.receive_sequence {
            self.statistics.sequence_errors += 1;
            return Err(self
                .fail_link(DlmsError::Protocol(format!(
                    "Out of order I-frame: N(S)={} while {} was expected",
                    send_seq, self.receive_sequence
                )))
                .await);
        }
        let late = recv_seq != self.send_sequence && self.expired_reply == Some(recv_seq);
        if recv_seq != self.send_sequence && !late {
            self.statistics.sequence_errors += 1;
            return Err(self
                .fail_link(DlmsError::Protocol(format!(
                    "I-frame acknowledges N(R)={} while {} was expected",
                    recv_seq, self.send_sequence
                )))
                .await);
        }
        self.receive_sequence = (self.receive_sequence + 1) % 8;
        if late {
            warn!("Discarding late reply to an expired request");
            if segmented {
                self.send_receive_ready().await?;
            } else {
                self.expired_reply = None;
            }
        }
        Ok(late)
    }

    /// Receive one complete APDU, LLC header stripped
    ///
    /// On timeout the reply is considered lost. If it still arrives later,
    /// it is recognised by its sequence numbers and discarded.
    pub async fn receive(&mut self, deadline: Instant) -> DlmsResult<Vec<u8>> {
        if !self.state.can_send_information() {
            return Err(DlmsError::Protocol(format!(
                "Cannot receive data while link is {}",
                self.state
            )));
        }
        let mut reassembled: Vec<u8> = Vec::new();
        loop {
            let frame = match self.next_frame(deadline).await {
                Ok(frame) => frame,
                Err(DlmsError::Timeout) => {
                    self.statistics.timeouts += 1;
                    self.expired_reply = Some(self.send_sequence);
                    return Err(DlmsError::Timeout);
                }
                Err(e) => return Err(e),
            };
            let (send_seq, recv_seq) = match frame.frame_type() {
                FrameType::Information { send_seq, recv_seq } => (send_seq, recv_seq),
                other => {
                    self.check_link_frame(other).await?;
                    continue;
                }
            };
            let segmented = frame.is_segmented();
            if self.accept_information(send_seq, recv_seq, segmented).await? {
                continue;
            }
            reassembled.extend_from_slice(frame.information_field());
            if segmented {
                self.statistics.segments_received += 1;
                self.send_receive_ready().await?;
                continue;
            }
            return strip_llc(reassembled);
        }
    }

    /// Send an APDU and wait for the reply
    pub async fn request(&mut self, apdu: &[u8], deadline: Instant) -> DlmsResult<Vec<u8>> {
        self.send(apdu).await?;
        self.receive(deadline).await
    }

    /// DISC, wait for UA or DM, then release the stream whatever happened
    pub async fn disconnect(&mut self) -> DlmsResult<()> {
        if self.state == HdlcConnectionState::Connected {
            self.transition_to(HdlcConnectionState::Disconnecting)?;
            let disc = HdlcFrame::new(self.addresses, FrameType::Disconnect, Vec::new());
            if self.send_frame(&disc).await.is_ok() {
                let deadline = Instant::now() + self.timeouts.disc_timeout;
                loop {
                    match self.next_frame(deadline).await {
                        Ok(frame)
                            if matches!(
                                frame.frame_type(),
                                FrameType::UnnumberedAcknowledge | FrameType::DisconnectMode
                            ) =>
                        {
                            break
                        }
                        Ok(frame) => debug!("Ignoring {} while disconnecting", frame),
                        Err(e) => {
                            warn!("No acknowledgement for DISC: {}", e);
                            break;
                        }
                    }
                }
            }
        }
        let _ = self.transport.close().await;
        self.decoder.clear();
        self.transition_to(HdlcConnectionState::Closed)?;
        Ok(())
    }

    async fn send_receive_ready(&mut self) -> DlmsResult<()> {
        let rr = HdlcFrame::new(
            self.addresses,
            FrameType::ReceiveReady {
                recv_seq: self.receive_sequence,
            },
            Vec::new(),
        );
        self.send_frame(&rr).await
    }

    /// Handle a non-I frame arriving while connected
    async fn check_link_frame(&mut self, frame_type: FrameType) -> DlmsResult<()> {
        match frame_type {
            FrameType::FrameReject => Err(self
                .fail_link(DlmsError::Protocol("Server rejected a frame (FRMR)".to_string()))
                .await),
            FrameType::DisconnectMode | FrameType::Disconnect => {
                Err(self.fail_link(DlmsError::ConnectionClosed).await)
            }
            other => {
                debug!("Ignoring {:?} frame", other);
                Ok(())
            }
        }
    }

    async fn send_frame(&mut self, frame: &HdlcFrame) -> DlmsResult<()> {
        let bytes = frame.encode()?;
        debug!("HDLC send {}", frame);
        trace!("HDLC tx {:02X?}", bytes);
        let written = match self.transport.write_all(&bytes).await {
            Ok(()) => self.transport.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            return Err(self.fail_link(e).await);
        }
        self.statistics.frames_sent += 1;
        Ok(())
    }

    /// Next well-formed frame addressed to this client
    async fn next_frame(&mut self, deadline: Instant) -> DlmsResult<HdlcFrame> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            while let Some(result) = self.decoder.next_frame() {
                match result {
                    Ok(frame) => {
                        if frame.address_pair() != self.addresses.swapped() {
                            self.statistics.frames_foreign += 1;
                            warn!("Discarding frame for another station: {}", frame);
                            continue;
                        }
                        self.statistics.frames_received += 1;
                        debug!("HDLC recv {}", frame);
                        return Ok(frame);
                    }
                    Err(e) => {
                        self.statistics.frames_discarded += 1;
                        warn!("Discarding malformed frame: {}", e);
                    }
                }
            }
            let read = tokio::time::timeout_at(deadline, self.transport.read(&mut chunk)).await;
            match read {
                Err(_) => return Err(DlmsError::Timeout),
                Ok(Err(e)) => return Err(self.fail_link(e).await),
                Ok(Ok(0)) => return Err(self.fail_link(DlmsError::ConnectionClosed).await),
                Ok(Ok(n)) => {
                    trace!("HDLC rx {:02X?}", &chunk[..n]);
                    self.decoder.extend(&chunk[..n]);
                }
            }
        }
    }
}

fn strip_llc(mut info: Vec<u8>) -> DlmsResult<Vec<u8>> {
    if !info.starts_with(&LLC_RESPONSE) {
        return Err(DlmsError::Protocol(format!(
            "Missing LLC response header, got {:02X?}",
            &info[..info.len().min(3)]
        )));
    }
    info.drain(..LLC_RESPONSE.len());
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdlc::address::HdlcAddress;
    use dlms_transport::IoStream;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Minimal meter side: answers SNRM with UA, echoes APDUs, acknowledges DISC
    struct FakeMeter {
        io: DuplexStream,
        decoder: HdlcMessageDecoder,
        pair: HdlcAddressPair,
        send_seq: u8,
        recv_seq: u8,
        params: HdlcParameters,
    }

    impl FakeMeter {
        fn new(io: DuplexStream, params: HdlcParameters) -> Self {
            Self {
                io,
                decoder: HdlcMessageDecoder::new(),
                pair: HdlcAddressPair::new(
                    HdlcAddress::server(1, 0, 1).unwrap(),
                    HdlcAddress::client(0x10).unwrap(),
                ),
                send_seq: 0,
                recv_seq: 0,
                params,
            }
        }

        async fn next(&mut self) -> Option<HdlcFrame> {
            let mut buf = [0u8; 512];
            loop {
                if let Some(frame) = self.decoder.next_frame() {
                    return Some(frame.unwrap());
                }
                let n = self.io.read(&mut buf).await.ok()?;
                if n == 0 {
                    return None;
                }
                self.decoder.extend(&buf[..n]);
            }
        }

        async fn write(&mut self, frame: HdlcFrame) {
            self.io.write_all(&frame.encode().unwrap()).await.unwrap();
        }

        async fn reply(&mut self, apdu: &[u8]) {
            let mut info = LLC_RESPONSE.to_vec();
            info.extend_from_slice(apdu);
            let max = self.params.max_information_field_length_tx as usize;
            let chunks: Vec<Vec<u8>> = info.chunks(max).map(|c| c.to_vec()).collect();
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.into_iter().enumerate() {
                let frame =
                    HdlcFrame::new_information(self.pair, chunk, self.send_seq, self.recv_seq, i < last);
                self.send_seq = (self.send_seq + 1) % 8;
                self.write(frame).await;
                if i < last {
                    let rr = self.next().await.unwrap();
                    assert!(matches!(rr.frame_type(), FrameType::ReceiveReady { .. }));
                }
            }
        }

        async fn run(mut self) {
            let mut apdu = Vec::new();
            while let Some(frame) = self.next().await {
                match frame.frame_type() {
                    FrameType::SetNormalResponseMode => {
                        let ua = HdlcFrame::new(
                            self.pair,
                            FrameType::UnnumberedAcknowledge,
                            self.params.encode_ua(),
                        );
                        self.write(ua).await;
                    }
                    FrameType::Information { .. } => {
                        self.recv_seq = (self.recv_seq + 1) % 8;
                        apdu.extend_from_slice(frame.information_field());
                        if frame.is_segmented() {
                            let rr = HdlcFrame::new(
                                self.pair,
                                FrameType::ReceiveReady { recv_seq: self.recv_seq },
                                Vec::new(),
                            );
                            self.write(rr).await;
                            continue;
                        }
                        let request = std::mem::take(&mut apdu);
                        assert_eq!(&request[..3], &LLC_REQUEST);
                        let mut response = request[3..].to_vec();
                        response.reverse();
                        self.reply(&response).await;
                    }
                    FrameType::Disconnect => {
                        let ua = HdlcFrame::new(self.pair, FrameType::UnnumberedAcknowledge, Vec::new());
                        self.write(ua).await;
                    }
                    _ => {}
                }
            }
        }
    }

    fn link(io: DuplexStream, params: HdlcParameters) -> HdlcConnection<IoStream<DuplexStream>> {
        HdlcConnection::new(
            IoStream::new(io),
            HdlcAddressing::default(),
            params,
            LinkTimeouts {
                snrm_timeout: Duration::from_millis(500),
                disc_timeout: Duration::from_millis(500),
                response_timeout: Duration::from_millis(500),
                cosem_wait_time: Duration::from_millis(500),
            },
        )
        .unwrap()
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    #[tokio::test]
    async fn test_sequence_numbers_after_n_exchanges() {
        let (client_io, meter_io) = tokio::io::duplex(4096);
        tokio::spawn(FakeMeter::new(meter_io, HdlcParameters::default()).run());
        let mut link = link(client_io, HdlcParameters::default());
        link.connect().await.unwrap();
        assert!(link.is_connected());

        for n in 1..=11u8 {
            let reply = link.request(&[0xC0, n, 0x01], soon()).await.unwrap();
            assert_eq!(reply, vec![0x01, n, 0xC0]);
            assert_eq!(link.send_sequence(), n % 8);
            assert_eq!(link.receive_sequence(), n % 8);
        }
        link.disconnect().await.unwrap();
        assert_eq!(link.state(), HdlcConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_segmented_both_directions() {
        let small = HdlcParameters {
            max_information_field_length_tx: 32,
            max_information_field_length_rx: 32,
            window_size_tx: 1,
            window_size_rx: 1,
        };
        let (client_io, meter_io) = tokio::io::duplex(4096);
        tokio::spawn(FakeMeter::new(meter_io, small).run());
        let mut link = link(client_io, HdlcParameters::default());
        link.connect().await.unwrap();
        assert_eq!(link.parameters().max_information_field_length_tx, 32);

        let apdu: Vec<u8> = (0..100).collect();
        let reply = link.request(&apdu, soon()).await.unwrap();
        let mut expected = apdu.clone();
        expected.reverse();
        assert_eq!(reply, expected);
        assert!(link.statistics().segments_sent >= 3);
        assert!(link.statistics().segments_received >= 3);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let (client_io, _meter_io) = tokio::io::duplex(4096);
        let mut link = link(client_io, HdlcParameters::default());
        match link.connect().await {
            Err(DlmsError::LinkTimeout(what)) => assert_eq!(what, "SNRM"),
            other => panic!("unexpected {:?}", other.err()),
        }
        assert_eq!(link.state(), HdlcConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_scripted_exchange() {
        let client = HdlcAddressPair::new(
            HdlcAddress::client(0x10).unwrap(),
            HdlcAddress::server(1, 0, 1).unwrap(),
        );
        let meter = HdlcAddressPair::new(
            HdlcAddress::server(1, 0, 1).unwrap(),
            HdlcAddress::client(0x10).unwrap(),
        );
        let params = HdlcParameters::default();
        let frame = |pair, kind, info: Vec<u8>| HdlcFrame::new(pair, kind, info).encode().unwrap();

        let mut request = LLC_REQUEST.to_vec();
        request.extend_from_slice(&[0xC0, 0x01, 0xC1]);
        let mut response = LLC_RESPONSE.to_vec();
        response.extend_from_slice(&[0xC4, 0x01, 0xC1, 0x00, 0x11, 0x07]);

        let script = tokio_test::io::Builder::new()
            .write(&frame(client, FrameType::SetNormalResponseMode, params.encode_snrm()))
            .read(&frame(meter, FrameType::UnnumberedAcknowledge, params.encode_ua()))
            .write(&HdlcFrame::new_information(client, request, 0, 0, false).encode().unwrap())
            .read(&HdlcFrame::new_information(meter, response, 0, 1, false).encode().unwrap())
            .write(&frame(client, FrameType::Disconnect, Vec::new()))
            .read(&frame(meter, FrameType::UnnumberedAcknowledge, Vec::new()))
            .build();

        let mut link = HdlcConnection::new(
            IoStream::new(script),
            HdlcAddressing::default(),
            params,
            LinkTimeouts::default(),
        )
        .unwrap();
        link.connect().await.unwrap();
        let reply = link.request(&[0xC0, 0x01, 0xC1], soon()).await.unwrap();
        assert_eq!(reply, vec![0xC4, 0x01, 0xC1, 0x00, 0x11, 0x07]);
        assert_eq!((link.send_sequence(), link.receive_sequence()), (1, 1));
        link.disconnect().await.unwrap();
        assert_eq!(link.state(), HdlcConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_rejected_with_dm() {
        let (client_io, meter_io) = tokio::io::duplex(4096);
        let mut meter = FakeMeter::new(meter_io, HdlcParameters::default());
        tokio::spawn(async move {
            meter.next().await.unwrap();
            let dm = HdlcFrame::new(meter.pair, FrameType::DisconnectMode, Vec::new());
            meter.write(dm).await;
            let _ = meter.next().await;
        });
        let mut link = link(client_io, HdlcParameters::default());
        assert!(matches!(link.connect().await, Err(DlmsError::Protocol(_))));
        assert_eq!(link.state(), HdlcConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_out_of_order_frame_fails_exchange() {
        let (client_io, meter_io) = tokio::io::duplex(4096);
        let mut meter = FakeMeter::new(meter_io, HdlcParameters::default());
        tokio::spawn(async move {
            meter.next().await.unwrap();
            let ua = HdlcFrame::new(meter.pair, FrameType::UnnumberedAcknowledge, Vec::new());
            meter.write(ua).await;
            meter.next().await.unwrap();
            // N(S) should be 0
            let mut info = LLC_RESPONSE.to_vec();
            info.push(0xC4);
            let frame = HdlcFrame::new_information(meter.pair, info, 3, 1, false);
            meter.write(frame).await;
            let _ = meter.next().await;
        });
        let mut link = link(client_io, HdlcParameters::default());
        link.connect().await.unwrap();
        let err = link.request(&[0xC0], soon()).await.unwrap_err();
        assert!(matches!(err, DlmsError::Protocol(_)));
        assert_eq!(link.statistics().sequence_errors, 1);
        assert_eq!(link.state(), HdlcConnectionState::Closed);
        assert_eq!(link.receive_sequence(), 0);
    }

    #[tokio::test]
    async fn test_wrong_acknowledgement_closes_link() {
        let (client_io, meter_io) = tokio::io::duplex(4096);
        let mut meter = FakeMeter::new(meter_io, HdlcParameters::default());
        tokio::spawn(async move {
            meter.next().await.unwrap();
            let ua = HdlcFrame::new(meter.pair, FrameType::UnnumberedAcknowledge, Vec::new());
            meter.write(ua).await;
            meter.next().await.unwrap();
            // N(R) should be 1
            let mut info = LLC_RESPONSE.to_vec();
            info.push(0xC4);
            meter.write(HdlcFrame::new_information(meter.pair, info, 0, 5, false)).await;
            let _ = meter.next().await;
        });
        let mut link = link(client_io, HdlcParameters::default());
        link.connect().await.unwrap();
        let err = link.request(&[0xC0], soon()).await.unwrap_err();
        assert!(matches!(err, DlmsError::Protocol(_)));
        assert_eq!(link.state(), HdlcConnectionState::Closed);
        assert_eq!((link.send_sequence(), link.receive_sequence()), (1, 0));
        assert!(matches!(link.send(&[0xC0]).await, Err(DlmsError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_missing_segment_acknowledgement_closes_link() {
        let small = HdlcParameters {
            max_information_field_length_tx: 32,
            max_information_field_length_rx: 32,
            window_size_tx: 1,
            window_size_rx: 1,
        };
        let (client_io, meter_io) = tokio::io::duplex(4096);
        let mut meter = FakeMeter::new(meter_io, small);
        tokio::spawn(async move {
            meter.next().await.unwrap();
            let ua = HdlcFrame::new(
                meter.pair,
                FrameType::UnnumberedAcknowledge,
                meter.params.encode_ua(),
            );
            meter.write(ua).await;
            // first segment is never acknowledged
            meter.next().await.unwrap();
            let _ = meter.next().await;
        });
        let mut link = link(client_io, HdlcParameters::default());
        link.connect().await.unwrap();
        let apdu = vec![0x5A; 60];
        match link.send(&apdu).await {
            Err(DlmsError::LinkTimeout(what)) => assert_eq!(what, "RR"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(link.state(), HdlcConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_corrupted_frame_is_discarded() {
        let (client_io, meter_io) = tokio::io::duplex(4096);
        let mut meter = FakeMeter::new(meter_io, HdlcParameters::default());
        tokio::spawn(async move {
            meter.next().await.unwrap();
            let ua = HdlcFrame::new(meter.pair, FrameType::UnnumberedAcknowledge, Vec::new());
            let mut bad = ua.encode().unwrap();
            bad[4] ^= 0x10;
            meter.io.write_all(&bad).await.unwrap();
            meter.write(ua).await;
            let _ = meter.next().await;
        });
        let mut link = link(client_io, HdlcParameters::default());
        link.connect().await.unwrap();
        assert_eq!(link.statistics().frames_discarded, 1);
    }

    #[tokio::test]
    async fn test_late_reply_is_discarded() {
        let (client_io, meter_io) = tokio::io::duplex(4096);
        let mut meter = FakeMeter::new(meter_io, HdlcParameters::default());
        tokio::spawn(async move {
            meter.next().await.unwrap();
            let ua = HdlcFrame::new(meter.pair, FrameType::UnnumberedAcknowledge, Vec::new());
            meter.write(ua).await;
            // first request: answered only after the second one arrives
            meter.next().await.unwrap();
            meter.recv_seq = 1;
            meter.next().await.unwrap();
            meter.recv_seq = 2;
            let mut late = LLC_RESPONSE.to_vec();
            late.push(0xAA);
            meter.write(HdlcFrame::new_information(meter.pair, late, 0, 1, false)).await;
            meter.send_seq = 1;
            meter.reply(&[0xBB]).await;
            let _ = meter.next().await;
        });
        let mut link = link(client_io, HdlcParameters::default());
        link.connect().await.unwrap();
        let expired = link
            .request(&[0x01], Instant::now() + Duration::from_millis(50))
            .await;
        assert!(matches!(expired, Err(DlmsError::Timeout)));
        let reply = link.request(&[0x02], soon()).await.unwrap();
        assert_eq!(reply, vec![0xBB]);
        assert_eq!(link.receive_sequence(), 2);
    }

    #[tokio::test]
    async fn test_late_reply_during_segmented_send() {
        let small = HdlcParameters {
            max_information_field_length_tx: 32,
            max_information_field_length_rx: 32,
            window_size_tx: 1,
            window_size_rx: 1,
        };
        let (client_io, meter_io) = tokio::io::duplex(4096);
        let mut meter = FakeMeter::new(meter_io, small);
        tokio::spawn(async move {
            meter.next().await.unwrap();
            let ua = HdlcFrame::new(
                meter.pair,
                FrameType::UnnumberedAcknowledge,
                meter.params.encode_ua(),
            );
            meter.write(ua).await;
            // first request, answered too late
            meter.next().await.unwrap();
            meter.recv_seq = 1;
            // first segment of the second request
            let segment = meter.next().await.unwrap();
            assert!(segment.is_segmented());
            meter.recv_seq = 2;
            let mut late = LLC_RESPONSE.to_vec();
            late.push(0xAA);
            meter.write(HdlcFrame::new_information(meter.pair, late, 0, 1, false)).await;
            meter.send_seq = 1;
            let rr = HdlcFrame::new(meter.pair, FrameType::ReceiveReady { recv_seq: 2 }, Vec::new());
            meter.write(rr).await;
            loop {
                let frame = meter.next().await.unwrap();
                meter.recv_seq = (meter.recv_seq + 1) % 8;
                if !frame.is_segmented() {
                    break;
                }
                let rr = HdlcFrame::new(
                    meter.pair,
                    FrameType::ReceiveReady { recv_seq: meter.recv_seq },
                    Vec::new(),
                );
                meter.write(rr).await;
            }
            meter.reply(&[0xBB]).await;
            let _ = meter.next().await;
        });
        let mut link = link(client_io, HdlcParameters::default());
        link.connect().await.unwrap();
        let expired = link
            .request(&[0x01], Instant::now() + Duration::from_millis(50))
            .await;
        assert!(matches!(expired, Err(DlmsError::Timeout)));
        let reply = link.request(&[0x02; 60], soon()).await.unwrap();
        assert_eq!(reply, vec![0xBB]);
        assert!(link.is_connected());
        assert_eq!(link.receive_sequence(), 2);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let (client_io, _meter_io) = tokio::io::duplex(64);
        let mut link = link(client_io, HdlcParameters::default());
        assert!(matches!(link.send(&[1]).await, Err(DlmsError::Protocol(_))));
    }
}
