//! Transport layer for DLMS/COSEM clients
//!
//! A [`StreamAccessor`] is the byte pipe the HDLC link runs over: a TCP
//! socket in production, any tokio stream (e.g. an in-memory duplex) in tests.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{DlmsError, DlmsResult};
pub use stream::{IoStream, StreamAccessor, TransportLayer};
pub use tcp::{TcpSettings, TcpTransport, DEFAULT_PORT};
