use crate::data_access::DataAccessResult;
use thiserror::Error;

/// Main error type for DLMS client operations
#[derive(Error, Debug)]
pub enum DlmsError {
    /// I/O failure on the underlying byte stream. Fatal to the link.
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Security error: {0}")]
    Security(String),

    /// Generic wait timeout on a single stream operation
    #[error("Timeout")]
    Timeout,

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("ASN.1 encoding error: {0}")]
    Asn1Encoding(String),

    #[error("ASN.1 decoding error: {0}")]
    Asn1Decoding(String),

    /// Check-sequence mismatch or malformed HDLC frame
    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    /// SNRM or DISC acknowledgment not received in time
    #[error("Link timeout: no {0} acknowledgment received")]
    LinkTimeout(&'static str),

    #[error("Association rejected: result {result}, diagnostic {diagnostic}")]
    AssociationRejected { result: u8, diagnostic: u8 },

    /// Challenge/response tag mismatch during HLS authentication
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Malformed or unsupported typed value encoding
    #[error("Decode error at offset {offset}, element {path}: {reason}")]
    Decode {
        offset: usize,
        path: String,
        reason: String,
    },

    /// Per-item rejection reported by the device
    #[error("Data access error: {0}")]
    DataAccess(DataAccessResult),

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Connection closed")]
    ConnectionClosed,
}

impl DlmsError {
    /// Build a decode error for the value at `offset` with an empty element path
    pub fn decode(offset: usize, reason: impl Into<String>) -> Self {
        DlmsError::Decode {
            offset,
            path: String::new(),
            reason: reason.into(),
        }
    }

    /// Prefix the element path of a decode error with `[index]`
    ///
    /// Used by container decoders so that a failure deep inside nested
    /// structures reports where it happened, e.g. `[2][0]`.
    pub fn within_element(self, index: usize) -> Self {
        match self {
            DlmsError::Decode {
                offset,
                path,
                reason,
            } => DlmsError::Decode {
                offset,
                path: format!("[{}]{}", index, path),
                reason,
            },
            other => other,
        }
    }

    /// Whether this error leaves the link unusable
    pub fn is_fatal_to_link(&self) -> bool {
        matches!(
            self,
            DlmsError::Connection(_) | DlmsError::LinkTimeout(_) | DlmsError::ConnectionClosed
        )
    }
}

/// Result type alias for DLMS operations
pub type DlmsResult<T> = Result<T, DlmsError>;
