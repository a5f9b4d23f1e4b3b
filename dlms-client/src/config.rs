//! Client configuration
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use dlms_client::ClientConfig;
//! use dlms_session::HdlcAddressing;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .addressing(HdlcAddressing::new(0x10, 1).with_physical_device(37, 4))
//!     .request_deadline(Duration::from_secs(20))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::{DlmsError, DlmsResult};
use dlms_application::association::AssociationSettings;
use dlms_application::pdu::Conformance;
use dlms_asn1::ApplicationContextName;
use dlms_security::{SecuritySuite, SystemTitle};
use dlms_session::{HdlcAddressing, HdlcParameters, LinkTimeouts};
use std::time::Duration;

pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(30);
pub const DEFAULT_QUEUE_DEPTH: usize = 32;
pub const DEFAULT_MAX_ITEMS_PER_REQUEST: usize = 10;

/// Everything needed to open a link and an association
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addressing: HdlcAddressing,
    pub hdlc: HdlcParameters,
    pub timeouts: LinkTimeouts,
    pub association: AssociationSettings,
    /// Bound on one submission, from submit to the last result
    pub request_deadline: Duration,
    /// Submissions waiting behind the one in flight
    pub queue_depth: usize,
    /// Largest number of attributes in one WithList request
    pub max_items_per_request: usize,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addressing: HdlcAddressing::default(),
            hdlc: HdlcParameters::default(),
            timeouts: LinkTimeouts::default(),
            association: AssociationSettings::default(),
            request_deadline: DEFAULT_REQUEST_DEADLINE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            max_items_per_request: DEFAULT_MAX_ITEMS_PER_REQUEST,
        }
    }
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn addressing(mut self, addressing: HdlcAddressing) -> Self {
        self.config.addressing = addressing;
        self
    }

    pub fn hdlc_parameters(mut self, parameters: HdlcParameters) -> Self {
        self.config.hdlc = parameters;
        self
    }

    pub fn timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn security(mut self, security: SecuritySuite) -> Self {
        self.config.association.security = security;
        self
    }

    /// Force an application context instead of deriving it from the suite
    pub fn application_context(mut self, context: ApplicationContextName) -> Self {
        self.config.association.application_context = Some(context);
        self
    }

    pub fn calling_ap_title(mut self, title: SystemTitle) -> Self {
        self.config.association.calling_ap_title = Some(title);
        self
    }

    pub fn conformance(mut self, conformance: Conformance) -> Self {
        self.config.association.conformance = conformance;
        self
    }

    pub fn max_receive_pdu_size(mut self, size: u16) -> Self {
        self.config.association.max_receive_pdu_size = size;
        self
    }

    pub fn request_deadline(mut self, deadline: Duration) -> Self {
        self.config.request_deadline = deadline;
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.queue_depth = depth;
        self
    }

    pub fn max_items_per_request(mut self, items: usize) -> Self {
        self.config.max_items_per_request = items;
        self
    }

    pub fn build(self) -> DlmsResult<ClientConfig> {
        let config = self.config;
        if config.queue_depth == 0 {
            return Err(DlmsError::InvalidData("Queue depth must be at least 1".to_string()));
        }
        if config.max_items_per_request == 0 {
            return Err(DlmsError::InvalidData(
                "At least one item per request is needed".to_string(),
            ));
        }
        if config.request_deadline.is_zero() {
            return Err(DlmsError::InvalidData("Request deadline must not be zero".to_string()));
        }
        if config.association.max_receive_pdu_size < 12 {
            return Err(DlmsError::InvalidData(format!(
                "Max receive PDU size {} is too small",
                config.association.max_receive_pdu_size
            )));
        }
        Ok(config)
    }
}
