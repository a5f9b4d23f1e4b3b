//! CRC-16/X.25 frame and header check sequences

use crate::error::{DlmsError, DlmsResult};

const INITIAL_FCS: u16 = 0xFFFF;
/// Residue left after running the check over data followed by its own FCS
const GOOD_FCS: u16 = 0xF0B8;
/// 0x1021 bit-reversed
const POLYNOMIAL: u16 = 0x8408;

static FCS_TABLE: once_cell::sync::Lazy<[u16; 256]> = once_cell::sync::Lazy::new(|| {
    let mut table = [0u16; 256];
    for (b, slot) in table.iter_mut().enumerate() {
        let mut v = b as u16;
        for _ in 0..8 {
            v = if v & 1 == 1 { (v >> 1) ^ POLYNOMIAL } else { v >> 1 };
        }
        *slot = v;
    }
    table
});

/// Running check sequence
#[derive(Debug, Clone, Copy)]
pub struct FcsCalc {
    fcs_value: u16,
}

impl FcsCalc {
    pub fn new() -> Self {
        Self {
            fcs_value: INITIAL_FCS,
        }
    }

    pub fn update(&mut self, data: u8) {
        self.fcs_value =
            (self.fcs_value >> 8) ^ FCS_TABLE[((self.fcs_value ^ data as u16) & 0xFF) as usize];
    }

    pub fn update_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Complemented value, least significant byte first as sent on the wire
    pub fn fcs_value_bytes(&self) -> [u8; 2] {
        (self.fcs_value ^ 0xFFFF).to_le_bytes()
    }

    /// Check a run that included its trailing check sequence
    pub fn validate(&self) -> DlmsResult<()> {
        if self.fcs_value != GOOD_FCS {
            Err(DlmsError::FrameInvalid(format!(
                "Check sequence residue 0x{:04X}, expected 0x{:04X}",
                self.fcs_value, GOOD_FCS
            )))
        } else {
            Ok(())
        }
    }
}

impl Default for FcsCalc {
    fn default() -> Self {
        Self::new()
    }
}

/// Check sequence bytes for `data`
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let mut calc = FcsCalc::new();
    calc.update_bytes(data);
    calc.fcs_value_bytes()
}

/// Whether `data` ends with its own valid check sequence
pub fn verify(data_with_fcs: &[u8]) -> DlmsResult<()> {
    let mut calc = FcsCalc::new();
    calc.update_bytes(data_with_fcs);
    calc.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        // CRC-16/X.25 check value over "123456789"
        assert_eq!(u16::from_le_bytes(checksum(b"123456789")), 0x906E);
    }

    #[test]
    fn test_snrm_header() {
        // SNRM from client 0x10 to server 0x03 seen on the wire: 7E A0 07 03 21 93 0F 01 7E
        assert_eq!(checksum(&[0xA0, 0x07, 0x03, 0x21, 0x93]), [0x0F, 0x01]);
    }

    #[test]
    fn test_residue() {
        let mut data = vec![0xA0, 0x07, 0x03, 0x21, 0x93];
        data.extend(checksum(&data));
        verify(&data).unwrap();
        data[2] ^= 0x01;
        assert!(verify(&data).is_err());
    }
}
