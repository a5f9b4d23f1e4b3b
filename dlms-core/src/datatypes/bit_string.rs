//! Bit string type

use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// String of bits, most significant bit of the first byte first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitString {
    bytes: Vec<u8>,
    num_bits: usize,
}

impl BitString {
    /// Build a bit string from `bytes` holding `num_bits` bits
    ///
    /// `bytes` must be exactly as long as needed for `num_bits`; padding bits
    /// of the last byte are kept as given.
    pub fn new(bytes: Vec<u8>, num_bits: usize) -> DlmsResult<Self> {
        let needed = num_bits.div_ceil(8);
        if bytes.len() != needed {
            return Err(DlmsError::InvalidData(format!(
                "{} bits need {} bytes, got {}",
                num_bits,
                needed,
                bytes.len()
            )));
        }
        Ok(Self { bytes, num_bits })
    }

    pub fn from_bits(bits: &[bool]) -> Self {
        let mut bytes = vec![0u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            if *bit {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Self {
            bytes,
            num_bits: bits.len(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        if index >= self.num_bits {
            return None;
        }
        Some(self.bytes[index / 8] & (0x80 >> (index % 8)) != 0)
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.num_bits {
            write!(f, "{}", if self.bit(i) == Some(true) { '1' } else { '0' })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_msb_first() {
        let bs = BitString::from_bits(&[true, false, true, true, false, false, false, false, true]);
        assert_eq!(bs.as_bytes(), &[0xB0, 0x80]);
        assert_eq!(bs.bit(8), Some(true));
        assert_eq!(bs.bit(9), None);
        assert_eq!(bs.to_string(), "101100001");
    }

    #[test]
    fn test_length_mismatch() {
        assert!(BitString::new(vec![0x00], 9).is_err());
        assert!(BitString::new(vec![], 0).is_ok());
    }
}
