//! The 4-letter DNA alphabet used throughout the aligner.
//!
//! The profile HMM only supports DNA: four symbols encoded 0..=3 in the
//! order A, C, G, T. Encoding is case-insensitive; anything else (gaps,
//! IUPAC degenerate codes, padding) is a non-symbol.

/// Number of symbols in the alphabet.
pub const SIZE: usize = 4;

/// Alphabet alias checked by parsers and constructors.
pub const ALIAS: &str = "DNA";

/// Uppercase symbol for each code, in encoding order.
const SYMBOLS: [u8; SIZE] = [b'A', b'C', b'G', b'T'];

/// Encode a byte to its symbol index (A=0, C=1, G=2, T=3), or `None` if
/// the byte is not a DNA symbol.
pub fn encode(b: u8) -> Option<usize> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Decode a symbol index back to its uppercase byte.
///
/// # Panics
///
/// Panics if `code >= SIZE`.
pub fn decode(code: usize) -> u8 {
    SYMBOLS[code]
}

/// Whether a byte is a DNA symbol (case-insensitive).
pub fn is_symbol(b: u8) -> bool {
    encode(b).is_some()
}
