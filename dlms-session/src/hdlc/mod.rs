//! HDLC session layer module

pub mod address;
pub mod connection;
pub mod decoder;
pub mod fcs;
pub mod frame;
pub mod parameters;
pub mod state;
pub mod statistics;

pub use address::{reserved, HdlcAddress, HdlcAddressPair};
pub use connection::HdlcConnection;
pub use decoder::HdlcMessageDecoder;
pub use fcs::FcsCalc;
pub use frame::{FrameType, HdlcFrame, FLAG, LLC_REQUEST, LLC_RESPONSE, MAX_FRAME_LENGTH};
pub use parameters::{HdlcAddressing, HdlcParameters, LinkTimeouts};
pub use state::HdlcConnectionState;
pub use statistics::HdlcStatistics;
