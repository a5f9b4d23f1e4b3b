//! Core types for the DLMS/COSEM client stack
//!
//! Error taxonomy, the typed value model shared by every layer, OBIS
//! instance identifiers and data-access-result codes.

pub mod data_access;
pub mod datatypes;
pub mod error;
pub mod obis_code;

pub use data_access::DataAccessResult;
pub use datatypes::*;
pub use error::{DlmsError, DlmsResult};
pub use obis_code::ObisCode;
