//! Conversions between hex strings, binary strings, bit vectors and bytes.
//!
//! Bits are always ordered most significant first, both within a nibble and
//! within a byte.

use crate::error::{ModemError, Result};

pub const HIGH_VAL: char = '1';
pub const LOW_VAL: char = '0';

pub fn bin_array_from_bin_str(bin: &str) -> Result<Vec<bool>> {
    bin.chars()
        .map(|c| match c {
            HIGH_VAL => Ok(true),
            LOW_VAL => Ok(false),
            other => Err(ModemError::InvalidBinaryString(other)),
        })
        .collect()
}

pub fn bin_str_from_bin_array(bits: &[bool]) -> String {
    bits.iter()
        .map(|&b| if b { HIGH_VAL } else { LOW_VAL })
        .collect()
}

/// Checks a hex payload (`-?[0-9a-fA-F]+`) and returns its digits without the
/// optional sign marker.
pub fn validate_hex(hex: &str) -> Result<&str> {
    if hex.is_empty() {
        return Err(ModemError::InvalidHexData("hex data can not be empty".into()));
    }
    let digits = hex.strip_prefix('-').unwrap_or(hex);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ModemError::InvalidHexData(format!(
            "{:?} contains invalid characters",
            hex
        )));
    }
    Ok(digits)
}

/// Four binary digits per hex digit.
pub fn hex_to_bin(hex: &str) -> Result<String> {
    let mut bin = String::with_capacity(hex.len() * 4);
    for c in hex.chars() {
        let nibble = c
            .to_digit(16)
            .ok_or_else(|| ModemError::InvalidHexData(format!("{:?} is not a hex digit", c)))?;
        bin.push_str(&format!("{:04b}", nibble));
    }
    Ok(bin)
}

/// One lowercase hex digit per complete nibble; a trailing partial nibble is
/// ignored.
pub fn bin_to_hex(bits: &[bool]) -> String {
    bits.chunks_exact(4)
        .map(|nibble| {
            let value = nibble
                .iter()
                .fold(0u32, |acc, &b| (acc << 1) | b as u32);
            char::from_digit(value, 16).unwrap_or('0')
        })
        .collect()
}

pub fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |i| byte & (1 << i) != 0))
        .collect()
}

pub fn bits_to_bytes(bits: &[bool]) -> Result<Vec<u8>> {
    if bits.len() % 8 != 0 {
        return Err(ModemError::BlockLength {
            expected: (bits.len() / 8 + 1) * 8,
            actual: bits.len(),
        });
    }
    Ok(bits
        .chunks_exact(8)
        .map(|byte| byte.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8))
        .collect())
}

pub fn byte_to_hex(byte: u8) -> String {
    format!("{:02x}", byte)
}

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| byte_to_hex(b)).collect()
}

pub fn hex_to_byte(hex: &str) -> Result<u8> {
    u8::from_str_radix(hex, 16)
        .map_err(|e| ModemError::InvalidHexData(format!("{:?}: {}", hex, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_array_from_bin_str() {
        assert_eq!(
            bin_array_from_bin_str("0101").unwrap(),
            vec![false, true, false, true]
        );
        assert!(matches!(
            bin_array_from_bin_str("01B1"),
            Err(ModemError::InvalidBinaryString('B'))
        ));
    }

    #[test]
    fn test_bin_str_from_bin_array() {
        assert_eq!(bin_str_from_bin_array(&[false, true, false, true]), "0101");
    }

    #[test]
    fn test_hex_to_bin() {
        assert_eq!(hex_to_bin("0").unwrap(), "0000");
        assert_eq!(
            hex_to_bin("4D414349454B").unwrap(),
            "010011010100000101000011010010010100010101001011"
        );
        assert!(hex_to_bin("4G").is_err());
    }

    #[test]
    fn test_bin_to_hex() {
        assert_eq!(bin_to_hex(&bin_array_from_bin_str("0101").unwrap()), "5");
        assert_eq!(bin_to_hex(&bin_array_from_bin_str("0000").unwrap()), "0");
        assert_eq!(
            bin_to_hex(&bin_array_from_bin_str("000011110000").unwrap()),
            "0f0"
        );
    }

    #[test]
    fn test_hex_roundtrip() {
        for hex in ["6C", "0", "00ff", "DeadBeef", "0123456789abcdef", "a0b0c0"] {
            let bits = bin_array_from_bin_str(&hex_to_bin(hex).unwrap()).unwrap();
            assert_eq!(bin_to_hex(&bits), hex.to_lowercase());
        }
    }

    #[test]
    fn test_validate_hex() {
        assert_eq!(validate_hex("6C").unwrap(), "6C");
        assert_eq!(validate_hex("-6c").unwrap(), "6c");
        assert!(validate_hex("").is_err());
        assert!(validate_hex("-").is_err());
        assert!(validate_hex("6C 7").is_err());
        assert!(validate_hex("xyz").is_err());
    }

    #[test]
    fn test_bytes_and_bits() {
        let bits = bytes_to_bits(&[0x01, 0x80]);
        assert_eq!(
            bin_str_from_bin_array(&bits),
            "0000000110000000"
        );
        assert_eq!(bits_to_bytes(&bits).unwrap(), vec![0x01, 0x80]);
        assert!(bits_to_bytes(&bits[..7]).is_err());
    }

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_to_byte("ff").unwrap(), 0xff);
        assert_eq!(byte_to_hex(0x0a), "0a");
        assert_eq!(bytes_to_hex(&[0x01, 0xad, 0xff]), "01adff");
    }
}
