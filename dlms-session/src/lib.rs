//! Session layer for DLMS/COSEM over HDLC
//!
//! Frames, addressing and checksums of HDLC frame format type 3, plus the
//! link that carries APDUs over any [`dlms_transport::StreamAccessor`].

pub mod error;
pub mod hdlc;

pub use error::{DlmsError, DlmsResult};
pub use hdlc::*;
