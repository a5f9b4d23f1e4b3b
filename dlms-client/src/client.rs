//! Public client: open a link, associate, then submit requests
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use dlms_client::{ClientConfig, DlmsClient, ObjectReference};
//! use dlms_core::ObisCode;
//! use dlms_transport::TcpSettings;
//!
//! # async fn read() -> dlms_core::DlmsResult<()> {
//! let client = DlmsClient::connect_tcp(
//!     TcpSettings::new("192.168.1.20", 4059),
//!     ClientConfig::default(),
//! )
//! .await?;
//! let energy = ObjectReference::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2);
//! let value = client.get(energy).await?;
//! println!("{:?}", value);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ClientConfig;
use crate::engine::{Engine, Job};
use crate::error::{DlmsError, DlmsResult};
use crate::request::{BatchResult, ObjectReference};
use dlms_application::association::{Association, AssociationStep, NegotiatedParameters};
use dlms_application::service::CosemMethodDescriptor;
use dlms_core::{DataObject, ObisCode};
use dlms_session::HdlcConnection;
use dlms_transport::{StreamAccessor, TcpSettings, TcpTransport, TransportLayer};
use log::{debug, warn};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// A connected link on which an association can be opened
///
/// A failed association attempt leaves the link connected and the session
/// not associated; [`associate`](Self::associate) may be called again.
pub struct ClientSession<T: StreamAccessor> {
    link: HdlcConnection<T>,
    config: ClientConfig,
    association: Option<Association>,
}

impl<T: StreamAccessor + 'static> ClientSession<T> {
    /// Connect the HDLC link over an already open byte stream
    pub async fn open(transport: T, config: ClientConfig) -> DlmsResult<Self> {
        let mut link =
            HdlcConnection::new(transport, config.addressing, config.hdlc, config.timeouts)?;
        link.connect().await?;
        Ok(Self {
            link,
            config,
            association: None,
        })
    }

    pub fn is_associated(&self) -> bool {
        self.association
            .as_ref()
            .is_some_and(Association::is_associated)
    }

    pub fn negotiated(&self) -> Option<&NegotiatedParameters> {
        self.association.as_ref().and_then(Association::negotiated)
    }

    /// Run the association handshake
    ///
    /// Each attempt starts from fresh key material and a fresh challenge.
    pub async fn associate(&mut self) -> DlmsResult<()> {
        self.association = None;
        let mut association = Association::new(self.config.association.clone());
        match self.handshake(&mut association).await {
            Ok(()) => {
                debug!(
                    "Associated with {:?}",
                    association.application_context()
                );
                self.association = Some(association);
                Ok(())
            }
            Err(e) => {
                warn!("Association failed in state {}: {}", association.state(), e);
                association.release();
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, association: &mut Association) -> DlmsResult<()> {
        let aarq = association.build_aarq()?;
        let aare = self.await_answer(&aarq).await?;
        match association.process_aare(&aare)? {
            AssociationStep::Established => Ok(()),
            AssociationStep::HlsReply(reply) => {
                let answer = self.await_answer(&reply).await?;
                association.process_hls_reply(&answer)
            }
        }
    }

    async fn await_answer(&mut self, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
        let deadline = Instant::now() + self.link.timeouts().cosem_wait_time;
        match self.link.request(apdu, deadline).await {
            Err(DlmsError::Timeout) => Err(DlmsError::RequestTimeout),
            other => other,
        }
    }

    /// Hand the link and the association to a background engine
    ///
    /// Must be called from within a tokio runtime.
    pub fn into_client(self) -> DlmsResult<DlmsClient> {
        let association = match self.association {
            Some(association) if association.is_associated() => association,
            _ => {
                return Err(DlmsError::Protocol(
                    "Cannot serve requests before an association".to_string(),
                ))
            }
        };
        let negotiated = association.negotiated().copied().ok_or_else(|| {
            DlmsError::Protocol("Association without negotiated parameters".to_string())
        })?;
        let (jobs, job_queue) = mpsc::channel(self.config.queue_depth);
        let (closes, close_requests) = mpsc::channel(1);
        let engine = Engine::new(
            self.link,
            association,
            self.config.request_deadline,
            self.config.max_items_per_request,
        );
        tokio::spawn(engine.run(job_queue, close_requests));
        Ok(DlmsClient {
            jobs,
            closes,
            negotiated,
        })
    }

    /// Disconnect without associating
    pub async fn close(mut self) -> DlmsResult<()> {
        if let Some(association) = self.association.as_mut() {
            association.release();
        }
        self.link.disconnect().await
    }
}

/// Handle to an associated meter
///
/// Cheap to clone. Submissions from all clones are served one after the
/// other in the order they were accepted.
#[derive(Clone)]
pub struct DlmsClient {
    jobs: mpsc::Sender<Job>,
    closes: mpsc::Sender<oneshot::Sender<()>>,
    negotiated: NegotiatedParameters,
}

impl DlmsClient {
    /// Open the link and associate; the link is dropped again on failure
    pub async fn connect<T: StreamAccessor + 'static>(
        transport: T,
        config: ClientConfig,
    ) -> DlmsResult<Self> {
        let mut session = ClientSession::open(transport, config).await?;
        if let Err(e) = session.associate().await {
            let _ = session.close().await;
            return Err(e);
        }
        session.into_client()
    }

    pub async fn connect_tcp(settings: TcpSettings, config: ClientConfig) -> DlmsResult<Self> {
        let mut transport = TcpTransport::new(settings);
        transport.open().await?;
        Self::connect(transport, config).await
    }

    /// Parameters agreed with the server at association
    pub fn negotiated(&self) -> &NegotiatedParameters {
        &self.negotiated
    }

    /// Queue a batch of reads and writes
    ///
    /// Waits while the queue is full. The returned handle resolves once
    /// every item has a result or the request deadline has passed.
    pub async fn submit(&self, items: Vec<ObjectReference>) -> DlmsResult<BatchHandle> {
        if items.is_empty() {
            return Err(DlmsError::InvalidData("Empty batch".to_string()));
        }
        let (reply, receiver) = oneshot::channel();
        let job = Job::Batch {
            items,
            submitted: Instant::now(),
            reply,
        };
        self.jobs
            .send(job)
            .await
            .map_err(|_| DlmsError::ConnectionClosed)?;
        Ok(BatchHandle { receiver })
    }

    /// Submit and wait for the results
    pub async fn request(&self, items: Vec<ObjectReference>) -> DlmsResult<BatchResult> {
        self.submit(items).await?.await
    }

    /// Read one attribute
    pub async fn get(&self, reference: ObjectReference) -> DlmsResult<DataObject> {
        let mut results = self.request(vec![reference]).await?.into_results();
        match results.pop() {
            Some(item) => item.map(|item| item.value),
            None => Err(DlmsError::Protocol("Empty result for a single read".to_string())),
        }
    }

    /// Write one attribute
    pub async fn set(&self, reference: ObjectReference, value: DataObject) -> DlmsResult<()> {
        let mut results = self
            .request(vec![reference.with_value(value)])
            .await?
            .into_results();
        match results.pop() {
            Some(item) => item.map(|_| ()),
            None => Err(DlmsError::Protocol("Empty result for a single write".to_string())),
        }
    }

    /// Invoke a method; returns the method's return data, if any
    pub async fn invoke(
        &self,
        class_id: u16,
        instance_id: ObisCode,
        method_id: i8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        let (reply, receiver) = oneshot::channel();
        let job = Job::Invoke {
            method: CosemMethodDescriptor::new(class_id, instance_id, method_id),
            parameters,
            submitted: Instant::now(),
            reply,
        };
        self.jobs
            .send(job)
            .await
            .map_err(|_| DlmsError::ConnectionClosed)?;
        receiver.await.unwrap_or(Err(DlmsError::ConnectionClosed))
    }

    /// Fail everything pending with [`DlmsError::ConnectionClosed`], then
    /// release the association and disconnect the link
    ///
    /// Closing an already closed client does nothing.
    pub async fn close(&self) -> DlmsResult<()> {
        let (ack, done) = oneshot::channel();
        if self.closes.send(ack).await.is_err() {
            return Ok(());
        }
        let _ = done.await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

/// Result of a submitted batch, delivered exactly once
#[derive(Debug)]
#[must_use = "a batch handle does nothing unless awaited"]
pub struct BatchHandle {
    receiver: oneshot::Receiver<DlmsResult<BatchResult>>,
}

impl Future for BatchHandle {
    type Output = DlmsResult<BatchResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|delivered| delivered.unwrap_or(Err(DlmsError::ConnectionClosed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfigBuilder;
    use crate::simulator::*;
    use dlms_application::selector::AccessSelector;
    use dlms_asn1::ApplicationContextName;
    use dlms_core::DataAccessResult;
    use dlms_security::{AuthenticationMechanism, SecuritySuite, SystemTitle};
    use dlms_session::LinkTimeouts;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> ClientConfigBuilder {
        ClientConfig::builder()
            .timeouts(LinkTimeouts {
                snrm_timeout: Duration::from_secs(1),
                disc_timeout: Duration::from_millis(300),
                response_timeout: Duration::from_secs(1),
                cosem_wait_time: Duration::from_secs(1),
            })
            .request_deadline(Duration::from_secs(2))
    }

    fn hls_suite(authentication_key: [u8; 16]) -> SecuritySuite {
        SecuritySuite::builder()
            .set_authentication_mechanism(AuthenticationMechanism::Hls5Gmac)
            .set_global_unicast_encryption_key(EK)
            .set_authentication_key(authentication_key)
            .set_system_title(SystemTitle::new(CLIENT_TITLE))
            .build()
            .unwrap()
    }

    async fn connect(meter: MeterSettings, config: ClientConfig) -> (DlmsClient, RequestLog) {
        let (transport, log) = spawn_meter(meter);
        let client = DlmsClient::connect(transport, config).await.unwrap();
        (client, log)
    }

    fn energy() -> ObjectReference {
        ObjectReference::new(3, ACTIVE_ENERGY, 2)
    }

    fn voltage() -> ObjectReference {
        ObjectReference::new(3, VOLTAGE_L1, 2)
    }

    fn load_profile() -> ObjectReference {
        ObjectReference::new(7, LOAD_PROFILE, 2)
    }

    fn entry_values(profile: &DataObject) -> Vec<u32> {
        profile
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| match entry.as_structure().unwrap() {
                [_, DataObject::Unsigned32(value)] => *value,
                other => panic!("unexpected entry {:?}", other),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rejected_item_does_not_fail_siblings() {
        let (client, log) = connect(MeterSettings::default(), config().build().unwrap()).await;
        let missing = ObjectReference::new(3, MISSING, 2);
        let batch = client
            .request(vec![energy(), missing, voltage()])
            .await
            .unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.data_at(0), Some(&DataObject::Unsigned32(123_456)));
        assert_eq!(
            batch.data_access_result_at(1),
            Some(DataAccessResult::ObjectUnavailable)
        );
        assert_eq!(batch.data_at(2), Some(&DataObject::Unsigned16(2301)));
        let first = batch.results()[0].as_ref().unwrap();
        assert!(first.delivered_in <= batch.delivered_in());

        let gets = log.with_tag(0xC0);
        assert_eq!(gets.len(), 1);
        assert_eq!(gets[0][1], 0x03, "one GetRequest-WithList");
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_batch_is_split() {
        let config = config().max_items_per_request(2).build().unwrap();
        let (client, log) = connect(MeterSettings::default(), config).await;
        let items = vec![energy(), voltage(), energy(), voltage(), energy()];
        let batch = client.request(items).await.unwrap();

        for i in [0, 2, 4] {
            assert_eq!(batch.data_at(i), Some(&DataObject::Unsigned32(123_456)));
        }
        for i in [1, 3] {
            assert_eq!(batch.data_at(i), Some(&DataObject::Unsigned16(2301)));
        }
        let choices: Vec<u8> = log.with_tag(0xC0).iter().map(|apdu| apdu[1]).collect();
        assert_eq!(choices, vec![0x03, 0x03, 0x01]);
    }

    #[tokio::test]
    async fn test_deadline_fails_only_outstanding_items() {
        let meter = MeterSettings {
            delays: vec![(VOLTAGE_L1, Duration::from_millis(700))],
            ..MeterSettings::default()
        };
        let config = config()
            .max_items_per_request(1)
            .request_deadline(Duration::from_millis(500))
            .build()
            .unwrap();
        let (client, _log) = connect(meter, config).await;

        let batch = client.request(vec![energy(), voltage()]).await.unwrap();
        assert_eq!(batch.data_at(0), Some(&DataObject::Unsigned32(123_456)));
        assert!(matches!(batch.error_at(1), Some(DlmsError::RequestTimeout)));

        // the late answer to the voltage read must not be taken for this one
        let value = client.get(energy()).await.unwrap();
        assert_eq!(value, DataObject::Unsigned32(123_456));
    }

    #[tokio::test]
    async fn test_profile_by_entry() {
        let (client, _log) = connect(MeterSettings::default(), config().build().unwrap()).await;
        let profile = client
            .get(load_profile().with_selector(AccessSelector::by_entry(1, 10)))
            .await
            .unwrap();
        assert_eq!(entry_values(&profile), (1000..1010).collect::<Vec<u32>>());

        let tail = client
            .get(load_profile().with_selector(AccessSelector::by_entry(18, 0)))
            .await
            .unwrap();
        assert_eq!(entry_values(&tail), vec![1017, 1018, 1019]);
    }

    #[tokio::test]
    async fn test_profile_by_time_range() {
        let (client, _log) = connect(MeterSettings::default(), config().build().unwrap()).await;
        let by_entry = client
            .get(load_profile().with_selector(AccessSelector::by_entry(1, 10)))
            .await
            .unwrap();
        // entries are numbered from 1, timestamps from 0
        let selector = AccessSelector::by_time_range(&profile_time(0), &profile_time(9));
        let by_range = client
            .get(load_profile().with_selector(selector))
            .await
            .unwrap();
        assert_eq!(entry_values(&by_range), (1000..1010).collect::<Vec<u32>>());
        assert_eq!(by_range, by_entry);

        let selector = AccessSelector::by_time_range(&profile_time(4), &profile_time(8));
        let middle = client
            .get(load_profile().with_selector(selector))
            .await
            .unwrap();
        assert_eq!(entry_values(&middle), vec![1004, 1005, 1006, 1007, 1008]);
    }

    #[tokio::test]
    async fn test_long_get_follows_data_blocks() {
        let meter = MeterSettings {
            block_size: Some(64),
            ..MeterSettings::default()
        };
        let (client, log) = connect(meter, config().build().unwrap()).await;

        let profile = client.get(load_profile()).await.unwrap();
        assert_eq!(entry_values(&profile).len(), PROFILE_ENTRIES);
        let next_requests = log
            .with_tag(0xC0)
            .iter()
            .filter(|apdu| apdu[1] == 0x02)
            .count();
        assert!(next_requests >= 5, "{} GetRequest-Next", next_requests);

        let batch = client.request(vec![load_profile(), energy()]).await.unwrap();
        assert_eq!(entry_values(batch.data_at(0).unwrap()).len(), PROFILE_ENTRIES);
        assert_eq!(batch.data_at(1), Some(&DataObject::Unsigned32(123_456)));
    }

    #[tokio::test]
    async fn test_mixed_batch_reads_then_writes() {
        let (client, log) = connect(MeterSettings::default(), config().build().unwrap()).await;
        let label = ObjectReference::new(1, DEVICE_LABEL, 2);
        let batch = client
            .request(vec![
                label
                    .clone()
                    .with_value(DataObject::VisibleString(b"hall".to_vec())),
                energy(),
                energy().with_value(DataObject::Unsigned32(0)),
            ])
            .await
            .unwrap();

        assert_eq!(batch.data_at(0), Some(&DataObject::Null));
        assert_eq!(batch.data_at(1), Some(&DataObject::Unsigned32(123_456)));
        assert_eq!(
            batch.data_access_result_at(2),
            Some(DataAccessResult::ReadWriteDenied)
        );
        let sets = log.with_tag(0xC1);
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0][1], 0x04, "one SetRequest-WithList");

        assert_ok!(
            client
                .set(label.clone(), DataObject::VisibleString(b"attic".to_vec()))
                .await
        );
        assert_eq!(
            client.get(label).await.unwrap(),
            DataObject::VisibleString(b"attic".to_vec())
        );
    }

    #[tokio::test]
    async fn test_invoke_method() {
        let (client, _log) = connect(MeterSettings::default(), config().build().unwrap()).await;
        let returned = assert_ok!(
            client
                .invoke(70, DISCONNECT_CONTROL, 1, Some(DataObject::Integer8(0)))
                .await
        );
        assert_eq!(returned, None);

        let err = assert_err!(client.invoke(70, MISSING, 1, None).await);
        assert!(matches!(
            err,
            DlmsError::DataAccess(DataAccessResult::ObjectUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_hls_gmac_over_ciphered_context() {
        let config = config().security(hls_suite(AK)).build().unwrap();
        let (client, log) = connect(MeterSettings::default().with_keys(), config).await;
        assert_eq!(client.negotiated().max_request_size(), 0x0200);

        let serial = ObjectReference::new(1, SERIAL_NUMBER, 2);
        let batch = client.request(vec![serial, energy()]).await.unwrap();
        assert_eq!(
            batch.data_at(0),
            Some(&DataObject::OctetString(b"MTR00042".to_vec()))
        );
        assert_eq!(batch.data_at(1), Some(&DataObject::Unsigned32(123_456)));

        let actions = log.with_tag(0xC3);
        assert_eq!(actions.len(), 1, "reply to HLS authentication");
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_hls_gmac_wrong_key_leaves_link_usable() {
        let config = config()
            .security(hls_suite([0x42; 16]))
            .application_context(ApplicationContextName::LogicalNameNoCiphering)
            .build()
            .unwrap();
        let (transport, _log) = spawn_meter(MeterSettings::default().with_keys());
        let mut session = ClientSession::open(transport, config).await.unwrap();

        for _ in 0..2 {
            let err = session.associate().await.unwrap_err();
            assert!(matches!(err, DlmsError::AuthenticationFailure(_)), "{:?}", err);
            assert!(!session.is_associated());
        }
        assert!(session.negotiated().is_none());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_ciphered_context_rejected_by_meter_without_keys() {
        let config = config().security(hls_suite(AK)).build().unwrap();
        let (transport, _log) = spawn_meter(MeterSettings::default());
        match DlmsClient::connect(transport, config).await {
            Err(DlmsError::AssociationRejected { result, diagnostic }) => {
                assert_eq!(result, 1);
                assert_eq!(diagnostic, 2);
            }
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("association should have been rejected"),
        }
    }

    #[tokio::test]
    async fn test_close_fails_pending_handles() {
        let meter = MeterSettings {
            delays: vec![(ACTIVE_ENERGY, Duration::from_secs(2))],
            ..MeterSettings::default()
        };
        let config = config()
            .request_deadline(Duration::from_secs(5))
            .build()
            .unwrap();
        let (client, _log) = connect(meter, config).await;

        let in_flight = client.submit(vec![energy()]).await.unwrap();
        let queued = client.submit(vec![voltage()]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.close().await.unwrap();

        assert!(matches!(in_flight.await, Err(DlmsError::ConnectionClosed)));
        assert!(matches!(queued.await, Err(DlmsError::ConnectionClosed)));
        assert!(client.is_closed());
        assert!(matches!(
            client.submit(vec![energy()]).await,
            Err(DlmsError::ConnectionClosed)
        ));
        assert_ok!(client.close().await);
    }

    #[tokio::test]
    async fn test_clones_share_one_queue() {
        let (client, log) = connect(MeterSettings::default(), config().build().unwrap()).await;
        let other = client.clone();
        let (a, b, c) = tokio::join!(
            client.get(energy()),
            other.get(voltage()),
            client.request(vec![energy(), voltage()]),
        );
        assert_eq!(a.unwrap(), DataObject::Unsigned32(123_456));
        assert_eq!(b.unwrap(), DataObject::Unsigned16(2301));
        assert_eq!(c.unwrap().len(), 2);
        assert_eq!(log.with_tag(0xC0).len(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_is_refused() {
        let (client, _log) = connect(MeterSettings::default(), config().build().unwrap()).await;
        assert!(matches!(
            client.submit(Vec::new()).await,
            Err(DlmsError::InvalidData(_))
        ));
    }
}
