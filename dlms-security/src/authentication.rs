//! Association authentication mechanisms

use crate::encryption::{AesGcmEncryption, SecurityControl, GCM_TAG_LENGTH};
use crate::error::{DlmsError, DlmsResult};
use crate::xdlms::{build_iv, constant_time_eq, SystemTitle, XdlmsContext};
use sha2::{Digest, Sha256};

/// Mechanism ids of the authentication-mechanism-name object identifier
pub mod mechanism_id {
    pub const LOW: u8 = 1;
    pub const HIGH_MD5: u8 = 3;
    pub const HIGH_SHA1: u8 = 4;
    pub const HIGH_GMAC: u8 = 5;
    pub const HIGH_SHA256: u8 = 6;
}

/// Low level security: the password travels as the calling authentication value
#[derive(Clone)]
pub struct LowAuth {
    password: Vec<u8>,
}

impl LowAuth {
    pub fn new(password: &[u8]) -> Self {
        Self {
            password: password.to_vec(),
        }
    }

    pub fn authentication_value(&self) -> &[u8] {
        &self.password
    }
}

impl std::fmt::Debug for LowAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LowAuth(..)")
    }
}

/// Pass 3 and 4 of a high level security handshake
///
/// After the AARE the client answers the server challenge with
/// [`respond`](Self::respond), then checks the server's answer to its own
/// challenge with [`verify`](Self::verify).
pub trait HlsAuthenticator: Send + Sync {
    fn mechanism_id(&self) -> u8;

    /// f(StoC), the client's proof over the server challenge
    fn respond(
        &self,
        context: &XdlmsContext,
        client_challenge: &[u8],
        server_challenge: &[u8],
    ) -> DlmsResult<Vec<u8>>;

    /// Check f(CtoS) returned by the server
    fn verify(
        &self,
        context: &XdlmsContext,
        client_challenge: &[u8],
        server_response: &[u8],
    ) -> DlmsResult<()>;
}

/// HLS mechanism 5, GMAC over the challenge with the association keys
///
/// The proof is SC || IC || GMAC(IV = system title || IC,
/// AAD = SC || AK || challenge) with SC = 0x10.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hls5GmacAuth;

impl Hls5GmacAuth {
    pub fn new() -> Self {
        Self
    }

    fn tag(
        context: &XdlmsContext,
        system_title: &SystemTitle,
        ic: u32,
        challenge: &[u8],
    ) -> DlmsResult<Vec<u8>> {
        let sc = SecurityControl::new(0, true, false);
        let keys = context.keys();
        let mut aad = Vec::with_capacity(1 + 16 + challenge.len());
        aad.push(sc.to_byte());
        aad.extend_from_slice(&keys.authentication_key);
        aad.extend_from_slice(challenge);
        AesGcmEncryption::new(&keys.encryption_key)?.gmac(&build_iv(system_title, ic), &aad)
    }
}

impl HlsAuthenticator for Hls5GmacAuth {
    fn mechanism_id(&self) -> u8 {
        mechanism_id::HIGH_GMAC
    }

    fn respond(
        &self,
        context: &XdlmsContext,
        _client_challenge: &[u8],
        server_challenge: &[u8],
    ) -> DlmsResult<Vec<u8>> {
        let ic = context.counter().reserve()?;
        let tag = Self::tag(context, context.client_system_title(), ic, server_challenge)?;
        let mut out = Vec::with_capacity(5 + GCM_TAG_LENGTH);
        out.push(SecurityControl::new(0, true, false).to_byte());
        out.extend(ic.to_be_bytes());
        out.extend(tag);
        Ok(out)
    }

    fn verify(
        &self,
        context: &XdlmsContext,
        client_challenge: &[u8],
        server_response: &[u8],
    ) -> DlmsResult<()> {
        if server_response.len() != 5 + GCM_TAG_LENGTH {
            return Err(DlmsError::AuthenticationFailure(format!(
                "Server response has {} bytes, expected {}",
                server_response.len(),
                5 + GCM_TAG_LENGTH
            )));
        }
        if server_response[0] != SecurityControl::AUTHENTICATED {
            return Err(DlmsError::AuthenticationFailure(format!(
                "Unexpected security control 0x{:02X} in server response",
                server_response[0]
            )));
        }
        let server_title = context.server_system_title().ok_or_else(|| {
            DlmsError::AuthenticationFailure("Server system title missing from AARE".to_string())
        })?;
        let ic = u32::from_be_bytes([
            server_response[1],
            server_response[2],
            server_response[3],
            server_response[4],
        ]);
        let expected = Self::tag(context, server_title, ic, client_challenge)?;
        if !constant_time_eq(&expected, &server_response[5..]) {
            return Err(DlmsError::AuthenticationFailure(
                "Server GMAC does not match the client challenge".to_string(),
            ));
        }
        Ok(())
    }
}

/// HLS mechanism 6, SHA-256 over the shared secret, both system titles and
/// both challenges
#[derive(Clone)]
pub struct Hls6Sha256Auth {
    secret: Vec<u8>,
}

impl Hls6Sha256Auth {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: secret.to_vec(),
        }
    }

    fn digest(
        &self,
        first_title: &SystemTitle,
        second_title: &SystemTitle,
        first_challenge: &[u8],
        second_challenge: &[u8],
    ) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(first_title.as_bytes());
        hasher.update(second_title.as_bytes());
        hasher.update(first_challenge);
        hasher.update(second_challenge);
        hasher.finalize().to_vec()
    }
}

impl std::fmt::Debug for Hls6Sha256Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Hls6Sha256Auth(..)")
    }
}

/// The client proof is SHA-256(secret || title-C || title-S || StoC || CtoS);
/// the server's swaps both titles and both challenges.
impl HlsAuthenticator for Hls6Sha256Auth {
    fn mechanism_id(&self) -> u8 {
        mechanism_id::HIGH_SHA256
    }

    fn respond(
        &self,
        context: &XdlmsContext,
        client_challenge: &[u8],
        server_challenge: &[u8],
    ) -> DlmsResult<Vec<u8>> {
        let server_title = context.server_system_title().ok_or_else(|| {
            DlmsError::AuthenticationFailure("Server system title missing from AARE".to_string())
        })?;
        Ok(self.digest(
            context.client_system_title(),
            server_title,
            server_challenge,
            client_challenge,
        ))
    }

    fn verify(
        &self,
        context: &XdlmsContext,
        client_challenge: &[u8],
        server_response: &[u8],
    ) -> DlmsResult<()> {
        let server_title = context.server_system_title().ok_or_else(|| {
            DlmsError::AuthenticationFailure("Server system title missing from AARE".to_string())
        })?;
        let server_challenge = context.server_challenge().ok_or_else(|| {
            DlmsError::AuthenticationFailure("Server challenge missing from AARE".to_string())
        })?;
        let expected = self.digest(
            server_title,
            context.client_system_title(),
            client_challenge,
            server_challenge,
        );
        if constant_time_eq(&expected, server_response) {
            Ok(())
        } else {
            Err(DlmsError::AuthenticationFailure(
                "Server SHA-256 response mismatch".to_string(),
            ))
        }
    }
}

/// Placeholder for HLS mechanisms this client does not implement
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedHls {
    mechanism_id: u8,
}

impl UnsupportedHls {
    pub fn new(mechanism_id: u8) -> Self {
        Self { mechanism_id }
    }

    fn error(&self) -> DlmsError {
        DlmsError::Security(format!(
            "HLS mechanism {} is not supported",
            self.mechanism_id
        ))
    }
}

impl HlsAuthenticator for UnsupportedHls {
    fn mechanism_id(&self) -> u8 {
        self.mechanism_id
    }

    fn respond(
        &self,
        _context: &XdlmsContext,
        _client_challenge: &[u8],
        _server_challenge: &[u8],
    ) -> DlmsResult<Vec<u8>> {
        Err(self.error())
    }

    fn verify(
        &self,
        _context: &XdlmsContext,
        _client_challenge: &[u8],
        _server_response: &[u8],
    ) -> DlmsResult<()> {
        Err(self.error())
    }
}
