//! Client side of the four-pass HLS exchange
//!
//! 1. The AARQ carries the client challenge (CtoS).
//! 2. The AARE carries the server challenge (StoC).
//! 3. The client returns f(StoC) through the current association object.
//! 4. The server answers with f(CtoS), which the client verifies.

use crate::authentication::HlsAuthenticator;
use crate::error::{DlmsError, DlmsResult};
use crate::xdlms::XdlmsContext;
use rand::RngCore;

/// Shortest challenge the protocol allows
pub const MIN_CHALLENGE_LENGTH: usize = 8;
/// Longest challenge the protocol allows
pub const MAX_CHALLENGE_LENGTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationState {
    NotAuthenticated,
    /// Client challenge sent in the AARQ
    ChallengeSent,
    /// AARE accepted with a server challenge
    ServerChallengeReceived,
    /// f(StoC) sent, waiting for f(CtoS)
    ResponseSent,
    Authenticated,
    /// Terminal: the association must not be used
    AuthenticationFailed,
}

/// Tracks one HLS handshake
pub struct AuthenticationFlow {
    authenticator: Box<dyn HlsAuthenticator>,
    state: AuthenticationState,
    client_challenge: Vec<u8>,
    server_challenge: Option<Vec<u8>>,
}

impl AuthenticationFlow {
    /// Start a flow with a fresh random client challenge
    pub fn new(authenticator: Box<dyn HlsAuthenticator>, challenge_length: usize) -> DlmsResult<Self> {
        let challenge = generate_challenge(challenge_length)?;
        Ok(Self::with_challenge(authenticator, challenge))
    }

    /// Start a flow with a caller-provided client challenge
    pub fn with_challenge(authenticator: Box<dyn HlsAuthenticator>, challenge: Vec<u8>) -> Self {
        Self {
            authenticator,
            state: AuthenticationState::NotAuthenticated,
            client_challenge: challenge,
            server_challenge: None,
        }
    }

    pub fn state(&self) -> AuthenticationState {
        self.state
    }

    pub fn mechanism_id(&self) -> u8 {
        self.authenticator.mechanism_id()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthenticationState::Authenticated
    }

    /// The calling authentication value for the AARQ
    pub fn client_challenge(&mut self) -> &[u8] {
        if self.state == AuthenticationState::NotAuthenticated {
            self.state = AuthenticationState::ChallengeSent;
        }
        &self.client_challenge
    }

    pub fn server_challenge_received(&mut self, challenge: Vec<u8>) -> DlmsResult<()> {
        self.expect(AuthenticationState::ChallengeSent)?;
        if challenge.len() < MIN_CHALLENGE_LENGTH || challenge.len() > MAX_CHALLENGE_LENGTH {
            self.state = AuthenticationState::AuthenticationFailed;
            return Err(DlmsError::AuthenticationFailure(format!(
                "Server challenge of {} bytes is outside {}..={}",
                challenge.len(),
                MIN_CHALLENGE_LENGTH,
                MAX_CHALLENGE_LENGTH
            )));
        }
        self.server_challenge = Some(challenge);
        self.state = AuthenticationState::ServerChallengeReceived;
        Ok(())
    }

    /// f(StoC) to send back to the server
    pub fn response(&mut self, context: &XdlmsContext) -> DlmsResult<Vec<u8>> {
        self.expect(AuthenticationState::ServerChallengeReceived)?;
        let server_challenge = self.server_challenge.as_deref().unwrap_or_default();
        match self
            .authenticator
            .respond(context, &self.client_challenge, server_challenge)
        {
            Ok(reply) => {
                self.state = AuthenticationState::ResponseSent;
                Ok(reply)
            }
            Err(e) => {
                self.state = AuthenticationState::AuthenticationFailed;
                Err(e)
            }
        }
    }

    /// Verify f(CtoS); any failure leaves the flow failed for good
    pub fn verify_server_response(
        &mut self,
        context: &XdlmsContext,
        server_response: &[u8],
    ) -> DlmsResult<()> {
        self.expect(AuthenticationState::ResponseSent)?;
        match self
            .authenticator
            .verify(context, &self.client_challenge, server_response)
        {
            Ok(()) => {
                self.state = AuthenticationState::Authenticated;
                Ok(())
            }
            Err(e) => {
                self.state = AuthenticationState::AuthenticationFailed;
                Err(match e {
                    DlmsError::AuthenticationFailure(_) => e,
                    other => DlmsError::AuthenticationFailure(other.to_string()),
                })
            }
        }
    }

    /// Mark the flow failed after an error outside the flow itself
    pub fn fail(&mut self) {
        self.state = AuthenticationState::AuthenticationFailed;
    }

    fn expect(&mut self, wanted: AuthenticationState) -> DlmsResult<()> {
        if self.state == wanted {
            return Ok(());
        }
        let was = self.state;
        self.state = AuthenticationState::AuthenticationFailed;
        Err(DlmsError::AuthenticationFailure(format!(
            "Authentication step out of order: in {:?}, expected {:?}",
            was, wanted
        )))
    }
}

impl std::fmt::Debug for AuthenticationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationFlow")
            .field("mechanism", &self.authenticator.mechanism_id())
            .field("state", &self.state)
            .finish()
    }
}

/// Random printable challenge of `length` bytes
pub fn generate_challenge(length: usize) -> DlmsResult<Vec<u8>> {
    if !(MIN_CHALLENGE_LENGTH..=MAX_CHALLENGE_LENGTH).contains(&length) {
        return Err(DlmsError::Security(format!(
            "Challenge length {} outside {}..={}",
            length, MIN_CHALLENGE_LENGTH, MAX_CHALLENGE_LENGTH
        )));
    }
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789;:";
    let mut raw = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut raw);
    Ok(raw
        .into_iter()
        .map(|b| ALPHABET[(b as usize) % ALPHABET.len()])
        .collect())
}
