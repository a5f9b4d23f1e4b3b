//! DLMS/COSEM client
//!
//! Opens an HDLC link over a byte stream, runs the association handshake
//! (lowest level, password or HLS-5 GMAC) and serves batched Get, Set and
//! Action requests from a background engine.
//!
//! ```text
//! ClientSession::open   SNRM/UA
//!        |
//! ClientSession::associate   AARQ/AARE (+ HLS reply)
//!        |
//! ClientSession::into_client -> DlmsClient (cloneable)
//!        |                        submit / get / set / invoke
//!        v
//! Engine task: FIFO queue, one exchange on the wire at a time
//! ```

pub mod client;
pub mod config;
mod engine;
pub mod error;
pub mod request;

#[cfg(test)]
mod simulator;

pub use client::{BatchHandle, ClientSession, DlmsClient};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{DlmsError, DlmsResult};
pub use request::{BatchResult, ItemValue, ObjectReference};
