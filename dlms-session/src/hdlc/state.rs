//! HDLC link state machine

use crate::error::{DlmsError, DlmsResult};
use std::fmt;

/// Link states
///
/// ```text
/// Idle -> Connecting -> Connected -> Disconnecting -> Closed
/// ```
/// Any state may drop to `Closed` on an unrecoverable I/O failure. A
/// closed link may be connected again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HdlcConnectionState {
    #[default]
    Idle,
    /// SNRM sent, waiting for UA
    Connecting,
    Connected,
    /// DISC sent, waiting for UA or DM
    Disconnecting,
    Closed,
}

impl HdlcConnectionState {
    /// Whether I-frames may be sent
    pub fn can_send_information(&self) -> bool {
        matches!(self, HdlcConnectionState::Connected)
    }

    pub fn validate_transition(&self, new_state: HdlcConnectionState) -> DlmsResult<()> {
        use HdlcConnectionState::*;
        let valid = matches!(
            (*self, new_state),
            (Idle, Connecting)
                | (Closed, Connecting)
                | (Connecting, Connected)
                | (Connected, Disconnecting)
                | (_, Closed)
        );
        if valid {
            Ok(())
        } else {
            Err(DlmsError::Protocol(format!(
                "Invalid link state transition: {} -> {}",
                self, new_state
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HdlcConnectionState::Idle => "Idle",
            HdlcConnectionState::Connecting => "Connecting",
            HdlcConnectionState::Connected => "Connected",
            HdlcConnectionState::Disconnecting => "Disconnecting",
            HdlcConnectionState::Closed => "Closed",
        }
    }
}

impl fmt::Display for HdlcConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
