//! xDLMS security material: system titles, invocation counters, key
//! derivation and the per-association ciphering context

use crate::encryption::{AesGcmEncryption, SecurityControl, GCM_TAG_LENGTH};
use crate::error::{DlmsError, DlmsResult};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use std::fmt;
use std::sync::{Arc, Mutex};

/// 8-byte system title identifying a client or a device
///
/// By convention the first three bytes carry the manufacturer flag id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemTitle {
    value: [u8; 8],
}

impl SystemTitle {
    pub fn new(bytes: [u8; 8]) -> Self {
        Self { value: bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> DlmsResult<Self> {
        let value: [u8; 8] = bytes.try_into().map_err(|_| {
            DlmsError::InvalidData(format!(
                "System title must be 8 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { value })
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.value
    }
}

impl fmt::Debug for SystemTitle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemTitle(")?;
        for b in self.value {
            write!(f, "{:02X}", b)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug)]
struct CounterState {
    next: u64,
}

/// Monotonic invocation counter shared by every association of a client
///
/// A value handed out by [`reserve`](Self::reserve) is never handed out
/// again. Moving the counter back to a used value is rejected.
#[derive(Debug, Clone)]
pub struct InvocationCounter {
    state: Arc<Mutex<CounterState>>,
}

impl InvocationCounter {
    pub fn new(start: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(CounterState { next: start as u64 })),
        }
    }

    fn lock(&self) -> DlmsResult<std::sync::MutexGuard<'_, CounterState>> {
        self.state
            .lock()
            .map_err(|_| DlmsError::Security("Invocation counter lock poisoned".to_string()))
    }

    /// The value the next reservation will return
    pub fn peek(&self) -> DlmsResult<u32> {
        let state = self.lock()?;
        u32::try_from(state.next)
            .map_err(|_| DlmsError::Security("Invocation counter exhausted".to_string()))
    }

    /// Take the next unused value
    pub fn reserve(&self) -> DlmsResult<u32> {
        let mut state = self.lock()?;
        let value = u32::try_from(state.next)
            .map_err(|_| DlmsError::Security("Invocation counter exhausted".to_string()))?;
        state.next += 1;
        Ok(value)
    }

    /// Continue counting from `value`
    ///
    /// Fails when `value` has already been handed out.
    pub fn advance_to(&self, value: u32) -> DlmsResult<()> {
        let mut state = self.lock()?;
        if (value as u64) < state.next {
            return Err(DlmsError::Security(format!(
                "Invocation counter {} already used (next unused is {})",
                value, state.next
            )));
        }
        state.next = value as u64;
        Ok(())
    }
}

/// Key identifiers of the key derivation input block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyId {
    GlobalUnicastEncryptionKey = 0,
    AuthenticationKey = 1,
}

/// Derives working keys from a master key
pub struct KeyDerivationFunction;

impl KeyDerivationFunction {
    /// AES-128-ECB(master, system title || key id || 0x00 * 7)
    pub fn derive_key(
        master_key: &[u8; 16],
        system_title: &SystemTitle,
        key_id: KeyId,
    ) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[..8].copy_from_slice(system_title.as_bytes());
        block[8] = key_id as u8;
        let cipher = Aes128::new(GenericArray::from_slice(master_key));
        let mut block = GenericArray::clone_from_slice(&block);
        cipher.encrypt_block(&mut block);
        let mut out = [0u8; 16];
        out.copy_from_slice(&block);
        out
    }
}

/// Encryption and authentication keys of one association
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub encryption_key: [u8; 16],
    pub authentication_key: [u8; 16],
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

/// glo-ciphered APDU tags keyed by the plain APDU tag
pub fn glo_tag_for(plain_tag: u8) -> Option<u8> {
    match plain_tag {
        0x01 => Some(0x21), // initiate-request
        0x08 => Some(0x28), // initiate-response
        0xC0 => Some(0xC8), // get-request
        0xC1 => Some(0xC9), // set-request
        0xC3 => Some(0xCB), // action-request
        0xC4 => Some(0xCC), // get-response
        0xC5 => Some(0xCD), // set-response
        0xC7 => Some(0xCF), // action-response
        _ => None,
    }
}

/// Whether `tag` is one of the glo-ciphered APDU tags
pub fn is_glo_tag(tag: u8) -> bool {
    matches!(tag, 0x21 | 0x28 | 0xC8 | 0xC9 | 0xCB | 0xCC | 0xCD | 0xCF)
}

/// Ciphering state of a single association
///
/// Built fresh for every association from the configured or derived keys.
/// Outgoing APDUs take their invocation counter from the shared client
/// counter; incoming counters must strictly increase.
#[derive(Debug)]
pub struct XdlmsContext {
    keys: SessionKeys,
    client_system_title: SystemTitle,
    server_system_title: Option<SystemTitle>,
    server_challenge: Option<Vec<u8>>,
    counter: InvocationCounter,
    last_received: Option<u32>,
    security_control: SecurityControl,
}

impl XdlmsContext {
    pub fn new(
        keys: SessionKeys,
        client_system_title: SystemTitle,
        counter: InvocationCounter,
        security_control: SecurityControl,
    ) -> Self {
        Self {
            keys,
            client_system_title,
            server_system_title: None,
            server_challenge: None,
            counter,
            last_received: None,
            security_control,
        }
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    pub fn client_system_title(&self) -> &SystemTitle {
        &self.client_system_title
    }

    pub fn server_system_title(&self) -> Option<&SystemTitle> {
        self.server_system_title.as_ref()
    }

    pub fn set_server_system_title(&mut self, title: SystemTitle) {
        self.server_system_title = Some(title);
    }

    /// Challenge the server sent in its AARE
    pub fn server_challenge(&self) -> Option<&[u8]> {
        self.server_challenge.as_deref()
    }

    pub fn set_server_challenge(&mut self, challenge: Vec<u8>) {
        self.server_challenge = Some(challenge);
    }

    pub fn counter(&self) -> &InvocationCounter {
        &self.counter
    }

    /// Protect `apdu` and wrap it under its glo tag
    ///
    /// Layout: glo-tag, length, SC, IC (4 bytes), ciphertext, tag (12 bytes).
    pub fn cipher_apdu(&self, apdu: &[u8]) -> DlmsResult<Vec<u8>> {
        let plain_tag = *apdu
            .first()
            .ok_or_else(|| DlmsError::Security("Cannot cipher an empty APDU".to_string()))?;
        let glo_tag = glo_tag_for(plain_tag).ok_or_else(|| {
            DlmsError::Security(format!("No ciphered form for APDU tag 0x{:02X}", plain_tag))
        })?;
        let ic = self.counter.reserve()?;
        let body = protect(
            &self.keys,
            &self.client_system_title,
            self.security_control,
            ic,
            apdu,
        )?;
        let mut out = Vec::with_capacity(body.len() + 4);
        out.push(glo_tag);
        push_length(body.len(), &mut out);
        out.extend(body);
        Ok(out)
    }

    /// Unwrap and verify a glo-ciphered APDU sent by the server
    pub fn decipher_apdu(&mut self, data: &[u8]) -> DlmsResult<Vec<u8>> {
        let server_title = self.server_system_title.ok_or_else(|| {
            DlmsError::Security("Server system title unknown, cannot decipher".to_string())
        })?;
        let tag = *data
            .first()
            .ok_or_else(|| DlmsError::Security("Empty ciphered APDU".to_string()))?;
        if !is_glo_tag(tag) {
            return Err(DlmsError::Security(format!(
                "Tag 0x{:02X} is not a ciphered APDU",
                tag
            )));
        }
        let (len, used) = read_length(&data[1..])?;
        let body = data.get(1 + used..1 + used + len).ok_or_else(|| {
            DlmsError::Security("Ciphered APDU shorter than its length field".to_string())
        })?;
        let (ic, plain) = unprotect(&self.keys, &server_title, body)?;
        if let Some(last) = self.last_received {
            if ic <= last {
                return Err(DlmsError::Security(format!(
                    "Replayed invocation counter {} (last {})",
                    ic, last
                )));
            }
        }
        self.last_received = Some(ic);
        Ok(plain)
    }
}

/// SC || IC || protected payload
pub fn protect(
    keys: &SessionKeys,
    system_title: &SystemTitle,
    sc: SecurityControl,
    ic: u32,
    plaintext: &[u8],
) -> DlmsResult<Vec<u8>> {
    let gcm = AesGcmEncryption::new(&keys.encryption_key)?;
    let iv = build_iv(system_title, ic);
    let mut aad = vec![sc.to_byte()];
    aad.extend_from_slice(&keys.authentication_key);

    let payload = match (sc.is_encrypted(), sc.is_authenticated()) {
        (true, true) => gcm.encrypt(&iv, plaintext, &aad)?,
        (true, false) => gcm.encrypt_unauthenticated(&iv, plaintext)?,
        (false, true) => {
            aad.extend_from_slice(plaintext);
            let mut out = plaintext.to_vec();
            out.extend(gcm.gmac(&iv, &aad)?);
            out
        }
        (false, false) => {
            return Err(DlmsError::Security(
                "Security control requests neither encryption nor authentication".to_string(),
            ))
        }
    };
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(sc.to_byte());
    out.extend(ic.to_be_bytes());
    out.extend(payload);
    Ok(out)
}

/// Inverse of [`protect`], returning the invocation counter and plaintext
pub fn unprotect(
    keys: &SessionKeys,
    system_title: &SystemTitle,
    body: &[u8],
) -> DlmsResult<(u32, Vec<u8>)> {
    if body.len() < 5 {
        return Err(DlmsError::Security("Ciphered payload too short".to_string()));
    }
    let sc = SecurityControl::from_byte(body[0]);
    let ic = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
    let payload = &body[5..];
    let gcm = AesGcmEncryption::new(&keys.encryption_key)?;
    let iv = build_iv(system_title, ic);
    let mut aad = vec![sc.to_byte()];
    aad.extend_from_slice(&keys.authentication_key);

    let plain = match (sc.is_encrypted(), sc.is_authenticated()) {
        (true, true) => gcm.decrypt(&iv, payload, &aad)?,
        (true, false) => gcm.encrypt_unauthenticated(&iv, payload)?,
        (false, true) => {
            if payload.len() < GCM_TAG_LENGTH {
                return Err(DlmsError::Security("Missing authentication tag".to_string()));
            }
            let (data, tag) = payload.split_at(payload.len() - GCM_TAG_LENGTH);
            aad.extend_from_slice(data);
            let expected = gcm.gmac(&iv, &aad)?;
            if !constant_time_eq(&expected, tag) {
                return Err(DlmsError::Security("Authentication tag mismatch".to_string()));
            }
            data.to_vec()
        }
        (false, false) => {
            return Err(DlmsError::Security(format!(
                "Unsupported security control 0x{:02X}",
                sc.to_byte()
            )))
        }
    };
    Ok((ic, plain))
}

pub fn build_iv(system_title: &SystemTitle, ic: u32) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[..8].copy_from_slice(system_title.as_bytes());
    iv[8..].copy_from_slice(&ic.to_be_bytes());
    iv
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn push_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.extend([0x81, len as u8]);
    } else {
        out.push(0x82);
        out.extend((len as u16).to_be_bytes());
    }
}

fn read_length(data: &[u8]) -> DlmsResult<(usize, usize)> {
    match data {
        [b, ..] if *b < 0x80 => Ok((*b as usize, 1)),
        [0x81, b, ..] => Ok((*b as usize, 2)),
        [0x82, hi, lo, ..] => Ok((u16::from_be_bytes([*hi, *lo]) as usize, 3)),
        _ => Err(DlmsError::Security("Bad ciphered APDU length".to_string())),
    }
}
