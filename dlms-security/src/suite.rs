//! Security configuration of a client association

use crate::authentication::{
    mechanism_id, Hls5GmacAuth, Hls6Sha256Auth, HlsAuthenticator, LowAuth, UnsupportedHls,
};
use crate::encryption::SecurityControl;
use crate::error::{DlmsError, DlmsResult};
use crate::xdlms::{
    InvocationCounter, KeyDerivationFunction, KeyId, SessionKeys, SystemTitle, XdlmsContext,
};
use std::fmt;

/// Authentication mechanism requested in the AARQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationMechanism {
    None,
    Low,
    HlsMd5,
    HlsSha1,
    Hls5Gmac,
    HlsSha256,
}

impl AuthenticationMechanism {
    /// Id of the authentication-mechanism-name, `None` for no authentication
    pub fn id(&self) -> Option<u8> {
        match self {
            Self::None => None,
            Self::Low => Some(mechanism_id::LOW),
            Self::HlsMd5 => Some(mechanism_id::HIGH_MD5),
            Self::HlsSha1 => Some(mechanism_id::HIGH_SHA1),
            Self::Hls5Gmac => Some(mechanism_id::HIGH_GMAC),
            Self::HlsSha256 => Some(mechanism_id::HIGH_SHA256),
        }
    }

    pub fn is_hls_mechanism(&self) -> bool {
        !matches!(self, Self::None | Self::Low)
    }
}

/// Where the association keys come from
#[derive(Clone, PartialEq, Eq)]
enum KeySource {
    Fixed(SessionKeys),
    /// Keys derived afresh for every association
    Master([u8; 16]),
}

/// Security suite builder
pub struct SecuritySuiteBuilder {
    authentication_mechanism: AuthenticationMechanism,
    global_unicast_encryption_key: Option<[u8; 16]>,
    authentication_key: Option<[u8; 16]>,
    master_key: Option<[u8; 16]>,
    password: Option<Vec<u8>>,
    hls_secret: Option<Vec<u8>>,
    system_title: Option<SystemTitle>,
    invocation_counter: u32,
    security_control: SecurityControl,
}

impl SecuritySuiteBuilder {
    /// No authentication and no ciphering
    pub fn new() -> Self {
        Self {
            authentication_mechanism: AuthenticationMechanism::None,
            global_unicast_encryption_key: None,
            authentication_key: None,
            master_key: None,
            password: None,
            hls_secret: None,
            system_title: None,
            invocation_counter: 0,
            security_control: SecurityControl::new(0, true, true),
        }
    }

    pub fn set_authentication_mechanism(mut self, mechanism: AuthenticationMechanism) -> Self {
        self.authentication_mechanism = mechanism;
        self
    }

    pub fn set_global_unicast_encryption_key(mut self, key: [u8; 16]) -> Self {
        self.global_unicast_encryption_key = Some(key);
        self
    }

    pub fn set_authentication_key(mut self, key: [u8; 16]) -> Self {
        self.authentication_key = Some(key);
        self
    }

    /// Derive the encryption and authentication keys from `key` on every association
    pub fn set_master_key(mut self, key: [u8; 16]) -> Self {
        self.master_key = Some(key);
        self
    }

    /// Password for low level security
    pub fn set_password(mut self, password: Vec<u8>) -> Self {
        self.password = Some(password);
        self.authentication_mechanism = AuthenticationMechanism::Low;
        self
    }

    /// Shared secret for HLS mechanism 6
    pub fn set_hls_secret(mut self, secret: Vec<u8>) -> Self {
        self.hls_secret = Some(secret);
        self
    }

    pub fn set_system_title(mut self, title: SystemTitle) -> Self {
        self.system_title = Some(title);
        self
    }

    /// First invocation counter value to use
    pub fn set_invocation_counter(mut self, counter: u32) -> Self {
        self.invocation_counter = counter;
        self
    }

    pub fn set_security_control(mut self, sc: SecurityControl) -> Self {
        self.security_control = sc;
        self
    }

    pub fn build(self) -> DlmsResult<SecuritySuite> {
        self.validate()?;
        let keys = match (
            self.master_key,
            self.global_unicast_encryption_key,
            self.authentication_key,
        ) {
            (Some(master), _, _) => Some(KeySource::Master(master)),
            (None, Some(ek), Some(ak)) => Some(KeySource::Fixed(SessionKeys {
                encryption_key: ek,
                authentication_key: ak,
            })),
            _ => None,
        };
        Ok(SecuritySuite {
            authentication_mechanism: self.authentication_mechanism,
            keys,
            password: self.password,
            hls_secret: self.hls_secret,
            system_title: self.system_title,
            invocation_counter: InvocationCounter::new(self.invocation_counter),
            security_control: self.security_control,
        })
    }

    fn validate(&self) -> DlmsResult<()> {
        let has_keys = self.master_key.is_some()
            || (self.global_unicast_encryption_key.is_some() && self.authentication_key.is_some());
        match self.authentication_mechanism {
            AuthenticationMechanism::Low => {
                if self.password.is_none() {
                    return Err(DlmsError::Security(
                        "Password is not set for the security level low".to_string(),
                    ));
                }
            }
            AuthenticationMechanism::Hls5Gmac => {
                if !has_keys {
                    return Err(DlmsError::Security(
                        "HLS-GMAC needs an encryption and an authentication key or a master key"
                            .to_string(),
                    ));
                }
                if self.system_title.is_none() {
                    return Err(DlmsError::Security(
                        "HLS-GMAC needs the client system title".to_string(),
                    ));
                }
            }
            AuthenticationMechanism::HlsSha256 => {
                if self.hls_secret.is_none() || self.system_title.is_none() {
                    return Err(DlmsError::Security(
                        "HLS-SHA256 needs a secret and the client system title".to_string(),
                    ));
                }
            }
            _ => {}
        }
        if self.global_unicast_encryption_key.is_some() != self.authentication_key.is_some() {
            return Err(DlmsError::Security(
                "Encryption and authentication keys must be supplied together".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SecuritySuiteBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Security suite
///
/// Cloning shares the invocation counter, so every association opened from
/// the same suite draws from one monotonic sequence.
#[derive(Clone)]
pub struct SecuritySuite {
    authentication_mechanism: AuthenticationMechanism,
    keys: Option<KeySource>,
    password: Option<Vec<u8>>,
    hls_secret: Option<Vec<u8>>,
    system_title: Option<SystemTitle>,
    invocation_counter: InvocationCounter,
    security_control: SecurityControl,
}

impl SecuritySuite {
    pub fn builder() -> SecuritySuiteBuilder {
        SecuritySuiteBuilder::new()
    }

    pub fn authentication_mechanism(&self) -> AuthenticationMechanism {
        self.authentication_mechanism
    }

    pub fn system_title(&self) -> Option<&SystemTitle> {
        self.system_title.as_ref()
    }

    pub fn invocation_counter(&self) -> &InvocationCounter {
        &self.invocation_counter
    }

    /// Low level security credentials, if configured
    pub fn low_auth(&self) -> Option<LowAuth> {
        self.password.as_deref().map(LowAuth::new)
    }

    /// Whether service APDUs are ciphered after association
    pub fn is_ciphered(&self) -> bool {
        self.keys.is_some() && self.system_title.is_some()
    }

    /// Authenticator for pass 3 and 4 of the configured HLS mechanism
    pub fn authenticator(&self) -> DlmsResult<Box<dyn HlsAuthenticator>> {
        match self.authentication_mechanism {
            AuthenticationMechanism::Hls5Gmac => Ok(Box::new(Hls5GmacAuth::new())),
            AuthenticationMechanism::HlsSha256 => {
                let secret = self.hls_secret.as_deref().ok_or_else(|| {
                    DlmsError::Security("HLS-SHA256 secret missing".to_string())
                })?;
                Ok(Box::new(Hls6Sha256Auth::new(secret)))
            }
            AuthenticationMechanism::HlsMd5 => Ok(Box::new(UnsupportedHls::new(mechanism_id::HIGH_MD5))),
            AuthenticationMechanism::HlsSha1 => Ok(Box::new(UnsupportedHls::new(mechanism_id::HIGH_SHA1))),
            other => Err(DlmsError::Security(format!(
                "{:?} is not a high level mechanism",
                other
            ))),
        }
    }

    /// Ciphering context for a new association
    ///
    /// Keys configured through a master key are derived again here, so no
    /// key material outlives the association that used it.
    pub fn begin_association(&self) -> DlmsResult<Option<XdlmsContext>> {
        let (Some(source), Some(title)) = (&self.keys, self.system_title) else {
            return Ok(None);
        };
        let keys = match source {
            KeySource::Fixed(keys) => keys.clone(),
            KeySource::Master(master) => SessionKeys {
                encryption_key: KeyDerivationFunction::derive_key(
                    master,
                    &title,
                    KeyId::GlobalUnicastEncryptionKey,
                ),
                authentication_key: KeyDerivationFunction::derive_key(
                    master,
                    &title,
                    KeyId::AuthenticationKey,
                ),
            },
        };
        Ok(Some(XdlmsContext::new(
            keys,
            title,
            self.invocation_counter.clone(),
            self.security_control,
        )))
    }
}

impl Default for SecuritySuite {
    fn default() -> Self {
        Self {
            authentication_mechanism: AuthenticationMechanism::None,
            keys: None,
            password: None,
            hls_secret: None,
            system_title: None,
            invocation_counter: InvocationCounter::new(0),
            security_control: SecurityControl::new(0, true, true),
        }
    }
}

impl fmt::Debug for SecuritySuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecuritySuite")
            .field("authentication_mechanism", &self.authentication_mechanism)
            .field("system_title", &self.system_title)
            .field("ciphered", &self.is_ciphered())
            .finish()
    }
}

impl fmt::Display for SecuritySuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SecuritySuite(auth={:?}, ciphered={})",
            self.authentication_mechanism,
            self.is_ciphered()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hls5_builder() -> SecuritySuiteBuilder {
        SecuritySuite::builder()
            .set_authentication_mechanism(AuthenticationMechanism::Hls5Gmac)
            .set_system_title(SystemTitle::new(*b"MEL\0\0\0\0\0"))
    }

    #[test]
    fn test_default_is_open() {
        let suite = SecuritySuite::default();
        assert_eq!(suite.authentication_mechanism().id(), None);
        assert!(!suite.is_ciphered());
        assert!(suite.begin_association().unwrap().is_none());
    }

    #[test]
    fn test_low_requires_password() {
        assert!(SecuritySuite::builder()
            .set_authentication_mechanism(AuthenticationMechanism::Low)
            .build()
            .is_err());
        let suite = SecuritySuite::builder()
            .set_password(b"12345678".to_vec())
            .build()
            .unwrap();
        assert_eq!(suite.low_auth().unwrap().authentication_value(), b"12345678");
    }

    #[test]
    fn test_hls5_requires_keys() {
        assert!(hls5_builder().build().is_err());
        assert!(hls5_builder()
            .set_global_unicast_encryption_key([1; 16])
            .build()
            .is_err());
        let suite = hls5_builder()
            .set_global_unicast_encryption_key([1; 16])
            .set_authentication_key([2; 16])
            .build()
            .unwrap();
        assert!(suite.is_ciphered());
        assert_eq!(suite.authenticator().unwrap().mechanism_id(), 5);
    }

    #[test]
    fn test_master_key_derives_per_association() {
        let suite = hls5_builder()
            .set_master_key([9; 16])
            .set_invocation_counter(40)
            .build()
            .unwrap();
        let first = suite.begin_association().unwrap().unwrap();
        let second = suite.begin_association().unwrap().unwrap();
        assert_eq!(first.keys(), second.keys());
        assert_ne!(first.keys().encryption_key, [9; 16]);
        // both associations share the counter
        assert_eq!(first.counter().reserve().unwrap(), 40);
        assert_eq!(second.counter().reserve().unwrap(), 41);

        // same keys, same challenge: the counter still makes the proofs differ
        let auth = Hls5GmacAuth::new();
        let proof_first = auth.respond(&first, b"CtoS0001", b"StoC0001").unwrap();
        let proof_second = auth.respond(&second, b"CtoS0001", b"StoC0001").unwrap();
        assert_eq!(&proof_first[1..5], &[0, 0, 0, 42]);
        assert_eq!(&proof_second[1..5], &[0, 0, 0, 43]);
        assert_ne!(proof_first[5..], proof_second[5..]);
    }

    #[test]
    fn test_unsupported_hls_is_explicit() {
        let suite = SecuritySuite::builder()
            .set_authentication_mechanism(AuthenticationMechanism::HlsMd5)
            .build()
            .unwrap();
        assert_eq!(suite.authenticator().unwrap().mechanism_id(), 3);
    }
}
