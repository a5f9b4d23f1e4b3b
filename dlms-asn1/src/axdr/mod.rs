//! A-XDR encoding of typed values

pub mod decoder;
pub mod encoder;
pub mod types;

pub use decoder::{decode_data_object, AxdrDecoder};
pub use encoder::{encode_data_object, AxdrEncoder};
pub use types::AxdrTag;
