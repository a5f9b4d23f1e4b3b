//! DLMS/COSEM client stack for electricity meters
//!
//! # Architecture
//!
//! The stack is split over several crates, re-exported here:
//!
//! - `dlms-core`: COSEM data types, OBIS codes, errors
//! - `dlms-asn1`: A-XDR and the ACSE association APDUs
//! - `dlms-transport`: byte streams (TCP, in-memory)
//! - `dlms-session`: HDLC framing and the link state machine
//! - `dlms-security`: xDLMS ciphering and HLS authentication
//! - `dlms-application`: xDLMS PDUs and the association handshake
//! - `dlms-client`: the request engine callers talk to
//!
//! # Usage
//!
//! ```no_run
//! use dlms::client::{ClientConfig, DlmsClient, ObjectReference};
//! use dlms::transport::TcpSettings;
//! use dlms::ObisCode;
//!
//! # async fn read() -> dlms::DlmsResult<()> {
//! let client =
//!     DlmsClient::connect_tcp(TcpSettings::new("10.0.0.7", 4059), ClientConfig::default())
//!         .await?;
//! let batch = client
//!     .request(vec![
//!         ObjectReference::new(3, ObisCode::new(1, 0, 1, 8, 0, 255), 2),
//!         ObjectReference::new(3, ObisCode::new(1, 0, 32, 7, 0, 255), 2),
//!     ])
//!     .await?;
//! println!("{:?}", batch.results());
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use dlms_core::datatypes::*;
pub use dlms_core::{DataAccessResult, DlmsError, DlmsResult, ObisCode};

// Re-export client API
pub mod client {
    pub use dlms_client::*;
}

pub mod application {
    pub use dlms_application::*;
}

pub mod security {
    pub use dlms_security::*;
}

pub mod session {
    pub use dlms_session::*;
}

pub mod transport {
    pub use dlms_transport::*;
}
