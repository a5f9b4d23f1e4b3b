//! BER (X.690) primitives used by the ACSE association PDUs
//!
//! Only definite lengths are supported, which is all DLMS/COSEM needs.

pub mod decoder;
pub mod encoder;
pub mod types;

pub use decoder::BerDecoder;
pub use encoder::BerEncoder;
pub use types::{BerTag, BerTagClass};
