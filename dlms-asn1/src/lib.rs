//! Encodings for DLMS/COSEM
//!
//! A-XDR for typed values and xDLMS service PDUs, BER for the ACSE
//! association PDUs.

pub mod axdr;
pub mod ber;
pub mod error;
pub mod iso_acse;

pub use axdr::{decode_data_object, encode_data_object, AxdrDecoder, AxdrEncoder, AxdrTag};
pub use ber::{BerDecoder, BerEncoder, BerTag, BerTagClass};
pub use error::{DlmsError, DlmsResult};
pub use iso_acse::{
    AAREApdu, AARQApdu, ApplicationContextName, AssociateResult, AssociateSourceDiagnostic,
    MechanismName, RLREApdu, RLRQApdu,
};
