//! Association state machine
//!
//! ```text
//! Idle -> AwaitingAare -> Associated -> Released
//!              |                ^
//!              v                |
//!        AwaitingHlsReply ------+
//!
//! any error on the way: -> Failed
//! ```
//!
//! `Failed` and `Released` are terminal. A new attempt needs a new
//! [`Association`](super::Association), so no key material or challenge of
//! a failed attempt is ever reused.

use std::fmt::{self, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    /// Nothing sent yet
    Idle,
    /// AARQ sent
    AwaitingAare,
    /// AARE accepted, reply to the server challenge sent
    AwaitingHlsReply,
    /// Services may be used
    Associated,
    /// Rejected, authentication failed or a malformed answer
    Failed,
    Released,
}

impl AssociationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Released)
    }
}

impl Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingAare => "awaiting AARE",
            Self::AwaitingHlsReply => "awaiting HLS reply",
            Self::Associated => "associated",
            Self::Failed => "failed",
            Self::Released => "released",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(AssociationState::Failed.is_terminal());
        assert!(AssociationState::Released.is_terminal());
        assert!(!AssociationState::AwaitingHlsReply.is_terminal());
        assert_eq!(AssociationState::AwaitingAare.to_string(), "awaiting AARE");
    }
}
