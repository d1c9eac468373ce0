//! Hex fixtures for frames and object data.
//!
//! Fixtures are written as space-separated byte pairs, e.g.
//! `"05 64 05 C0 01 00 00 04 E9 21"`.

use crate::error::{Dnp3Error, Result};

/// Parse a hex fixture into bytes.
///
/// Spaces are ignored. The letter `o` is rejected explicitly since it is
/// a common typo for zero in hand-written fixtures.
pub fn parse_hex(sequence: &str) -> Result<Vec<u8>> {
    let compact: String = sequence.chars().filter(|c| *c != ' ').collect();

    if compact.contains(|c| c == 'o' || c == 'O') {
        return Err(Dnp3Error::argument("Sequence contains 'o' or 'O'"));
    }

    if compact.len() % 2 != 0 {
        return Err(Dnp3Error::argument(format!(
            "Sequence does not contain an even number of characters: {}",
            compact.len()
        )));
    }

    ::hex::decode(&compact)
        .map_err(|e| Dnp3Error::argument(format!("Invalid hex sequence '{}': {}", sequence, e)))
}

/// Render bytes as upper-case space-separated pairs.
pub fn to_hex(bytes: &[u8]) -> String {
    let encoded = ::hex::encode_upper(bytes);
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, pair) in encoded.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push(pair[0] as char);
        out.push(pair[1] as char);
    }
    out
}
