//! Hamming(8,4) single error correcting, double error detecting code.
//!
//! Every codeword has even weight and the last column of the parity-check
//! matrix is all ones, so the last syndrome bit is the overall parity of the
//! received word: odd parity means one flipped bit, even parity with a non-zero
//! syndrome means two.

use crate::error::{ModemError, Result};

pub const DATA_BITS: usize = 4;
pub const CODE_BITS: usize = 8;

const G: [[u8; CODE_BITS]; DATA_BITS] = [
    [1, 1, 1, 0, 0, 0, 0, 1],
    [1, 0, 0, 1, 1, 0, 0, 1],
    [0, 1, 0, 1, 0, 1, 0, 1],
    [1, 1, 0, 1, 0, 0, 1, 0],
];

/// Transposed parity-check matrix.
const H_T: [[u8; 4]; CODE_BITS] = [
    [1, 0, 0, 1],
    [0, 1, 0, 1],
    [1, 1, 0, 1],
    [0, 0, 1, 1],
    [1, 0, 1, 1],
    [0, 1, 1, 1],
    [1, 1, 1, 1],
    [0, 0, 0, 1],
];

/// Picks the data bits (positions 2, 4, 5, 6) out of a codeword.
const R_T: [[u8; DATA_BITS]; CODE_BITS] = [
    [0, 0, 0, 0],
    [0, 0, 0, 0],
    [1, 0, 0, 0],
    [0, 0, 0, 0],
    [0, 1, 0, 0],
    [0, 0, 1, 0],
    [0, 0, 0, 1],
    [0, 0, 0, 0],
];

/// Row vector times matrix over GF(2).
fn mul<const K: usize, const N: usize>(row: &[bool; K], matrix: &[[u8; N]; K]) -> [bool; N] {
    let mut out = [false; N];
    for (col, cell) in out.iter_mut().enumerate() {
        *cell = row
            .iter()
            .zip(matrix.iter())
            .fold(false, |acc, (&bit, m)| acc ^ (bit && m[col] == 1));
    }
    out
}

pub fn encode_block(msg: &[bool; DATA_BITS]) -> [bool; CODE_BITS] {
    mul(msg, &G)
}

pub fn syndrome(word: &[bool; CODE_BITS]) -> [bool; 4] {
    mul(word, &H_T)
}

/// Decode one codeword, correcting a single flipped bit.
pub fn decode_block(word: &[bool; CODE_BITS]) -> Result<[bool; DATA_BITS]> {
    let mut word = *word;
    let syn = syndrome(&word);

    if syn.iter().any(|&b| b) {
        let odd_parity = word.iter().filter(|&&b| b).count() % 2 == 1;
        if !odd_parity {
            return Err(ModemError::DoubleErrorDetected);
        }

        let position = (0..CODE_BITS).find(|&i| {
            let mut error = [false; CODE_BITS];
            error[i] = true;
            syndrome(&error) == syn
        });
        if let Some(i) = position {
            word[i] = !word[i];
        }
    }

    Ok(mul(&word, &R_T))
}

/// Encode a bit stream in groups of four, doubling its length.
pub fn encode(bits: &[bool]) -> Result<Vec<bool>> {
    if bits.len() % DATA_BITS != 0 {
        return Err(ModemError::BlockLength {
            expected: (bits.len() / DATA_BITS + 1) * DATA_BITS,
            actual: bits.len(),
        });
    }
    let mut out = Vec::with_capacity(bits.len() * 2);
    for chunk in bits.chunks_exact(DATA_BITS) {
        let mut msg = [false; DATA_BITS];
        msg.copy_from_slice(chunk);
        out.extend_from_slice(&encode_block(&msg));
    }
    Ok(out)
}

/// Decode a bit stream in groups of eight. Any double error fails the whole
/// stream.
pub fn decode(bits: &[bool]) -> Result<Vec<bool>> {
    if bits.len() % CODE_BITS != 0 {
        return Err(ModemError::BlockLength {
            expected: (bits.len() / CODE_BITS + 1) * CODE_BITS,
            actual: bits.len(),
        });
    }
    let mut out = Vec::with_capacity(bits.len() / 2);
    for chunk in bits.chunks_exact(CODE_BITS) {
        let mut word = [false; CODE_BITS];
        word.copy_from_slice(chunk);
        out.extend_from_slice(&decode_block(&word)?);
    }
    Ok(out)
}
