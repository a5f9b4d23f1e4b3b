//! ISO-ACSE association control PDUs (AARQ, AARE, RLRQ, RLRE)

pub mod pdu;
pub mod types;

pub use pdu::{AAREApdu, AARQApdu, RLREApdu, RLRQApdu};
pub use types::*;
