//! Application layer for DLMS/COSEM clients
//!
//! xDLMS PDUs, the Get/Set/Action services with selective access, and the
//! association handshake. Everything here is pure encoding and state; the
//! bytes travel over `dlms-session`.

pub mod association;
pub mod error;
pub mod pdu;
pub mod selector;
pub mod service;

pub use association::{Association, AssociationSettings, AssociationState, AssociationStep};
pub use error::{DlmsError, DlmsResult};
pub use pdu::{Conformance, InitiateRequest, InitiateResponse};
pub use selector::{AccessSelector, CaptureObjectDefinition};
pub use service::{
    AttributeReference, CosemAttributeDescriptor, CosemMethodDescriptor, GetDataResult,
    InvokeIdAndPriority,
};
