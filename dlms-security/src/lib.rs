//! Security layer for DLMS/COSEM clients
//!
//! Association authentication (low level and HLS), xDLMS ciphering of
//! service APDUs, key derivation and invocation counter bookkeeping.

pub mod auth_flow;
pub mod authentication;
pub mod encryption;
pub mod error;
pub mod suite;
pub mod xdlms;

pub use auth_flow::{generate_challenge, AuthenticationFlow, AuthenticationState};
pub use authentication::{Hls5GmacAuth, Hls6Sha256Auth, HlsAuthenticator, LowAuth};
pub use encryption::{AesGcmEncryption, SecurityControl};
pub use suite::{AuthenticationMechanism, SecuritySuite, SecuritySuiteBuilder};
pub use xdlms::{InvocationCounter, SessionKeys, SystemTitle, XdlmsContext};
