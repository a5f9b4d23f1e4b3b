//! AES-GCM ciphering with the 12-byte tag used by security suite 0

use crate::error::{DlmsError, DlmsResult};
use aes::Aes128;
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{AesGcm, KeyInit, Nonce};

/// Length of the truncated GCM authentication tag
pub const GCM_TAG_LENGTH: usize = 12;

type Aes128Gcm12 = AesGcm<Aes128, U12, U12>;

/// AES-128-GCM context producing 12-byte tags
///
/// The caller supplies the 12-byte IV (system title followed by the
/// invocation counter), so the same inputs always give the same output.
pub struct AesGcmEncryption {
    cipher: Aes128Gcm12,
    key: [u8; 16],
}

impl AesGcmEncryption {
    pub fn new(key: &[u8]) -> DlmsResult<Self> {
        let key: [u8; 16] = key.try_into().map_err(|_| {
            DlmsError::Security(format!(
                "Invalid AES-128 key length: expected 16 bytes, got {}",
                key.len()
            ))
        })?;
        let cipher = Aes128Gcm12::new_from_slice(&key)
            .map_err(|e| DlmsError::Security(format!("Invalid key: {}", e)))?;
        Ok(Self { cipher, key })
    }

    /// Encrypt and authenticate, returning ciphertext followed by the tag
    pub fn encrypt(&self, iv: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> DlmsResult<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
            .map_err(|e| DlmsError::Security(format!("Encryption failed: {}", e)))
    }

    /// Verify the trailing tag and decrypt
    pub fn decrypt(&self, iv: &[u8; 12], ciphertext: &[u8], aad: &[u8]) -> DlmsResult<Vec<u8>> {
        if ciphertext.len() < GCM_TAG_LENGTH {
            return Err(DlmsError::Security("Ciphertext shorter than its tag".to_string()));
        }
        self.cipher
            .decrypt(Nonce::from_slice(iv), Payload { msg: ciphertext, aad })
            .map_err(|_| DlmsError::Security("Authentication tag mismatch".to_string()))
    }

    /// GMAC: a tag over `aad` with an empty plaintext
    pub fn gmac(&self, iv: &[u8; 12], aad: &[u8]) -> DlmsResult<Vec<u8>> {
        self.encrypt(iv, &[], aad)
    }

    /// Counter-mode keystream only, for encryption without authentication
    ///
    /// GCM encrypts with the counter starting at 2, so the tag-less
    /// ciphertext equals the leading part of the authenticated output.
    /// XOR is its own inverse, so this also decrypts.
    pub fn encrypt_unauthenticated(&self, iv: &[u8; 12], data: &[u8]) -> DlmsResult<Vec<u8>> {
        use aes::cipher::generic_array::GenericArray;
        use aes::cipher::BlockEncrypt;

        let block_cipher = Aes128::new(GenericArray::from_slice(&self.key));
        let mut out = Vec::with_capacity(data.len());
        for (index, chunk) in data.chunks(16).enumerate() {
            let mut counter_block = [0u8; 16];
            counter_block[..12].copy_from_slice(iv);
            let counter = (index as u32).wrapping_add(2);
            counter_block[12..].copy_from_slice(&counter.to_be_bytes());
            let mut block = GenericArray::clone_from_slice(&counter_block);
            block_cipher.encrypt_block(&mut block);
            out.extend(chunk.iter().zip(block.iter()).map(|(d, k)| d ^ k));
        }
        Ok(out)
    }
}

/// Security control byte of a ciphered APDU or an HLS tag
///
/// Bits 0..3 carry the suite id, bit 4 authentication, bit 5 encryption,
/// bit 6 the key set and bit 7 compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityControl {
    byte: u8,
}

impl SecurityControl {
    pub const AUTHENTICATED: u8 = 0x10;
    pub const ENCRYPTED: u8 = 0x20;
    pub const BROADCAST_KEY: u8 = 0x40;

    pub fn new(suite_id: u8, authenticated: bool, encrypted: bool) -> Self {
        let mut byte = suite_id & 0x0F;
        if authenticated {
            byte |= Self::AUTHENTICATED;
        }
        if encrypted {
            byte |= Self::ENCRYPTED;
        }
        Self { byte }
    }

    pub fn from_byte(byte: u8) -> Self {
        Self { byte }
    }

    pub fn to_byte(&self) -> u8 {
        self.byte
    }

    pub fn security_suite_id(&self) -> u8 {
        self.byte & 0x0F
    }

    pub fn is_authenticated(&self) -> bool {
        self.byte & Self::AUTHENTICATED != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.byte & Self::ENCRYPTED != 0
    }

    pub fn uses_broadcast_key(&self) -> bool {
        self.byte & Self::BROADCAST_KEY != 0
    }
}
