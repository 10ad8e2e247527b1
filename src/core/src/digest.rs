//! Content digest helpers.
//!
//! Digests are always computed here from bytes we hold, never taken from a
//! registry response.

use sha2::{Digest, Sha256};

/// Compute the `sha256:<hex>` digest of a byte slice.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Check that a string is a well-formed `algorithm:hex` digest.
///
/// `sha256` digests must carry exactly 64 lowercase hex characters.
pub fn is_valid_digest(digest: &str) -> bool {
    let Some((algorithm, encoded)) = digest.split_once(':') else {
        return false;
    };
    if algorithm.is_empty() || encoded.is_empty() {
        return false;
    }
    let hex_ok = encoded
        .chars()
        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    match algorithm {
        "sha256" => hex_ok && encoded.len() == 64,
        "sha512" => hex_ok && encoded.len() == 128,
        _ => false,
    }
}
