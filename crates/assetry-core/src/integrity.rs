//! Digest helpers: hex SHA-256 for cache addressing, short URL-safe tokens for
//! serving paths, and SRI strings (`sha256-<base64>`) for `integrity=` attributes.

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Number of digest bytes embedded in a serving path.
const PATH_TOKEN_BYTES: usize = 16;

/// Lowercase hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

/// True for a 64-char lowercase hex string, i.e. something that can name a cache entry.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Path token for a hex SHA-256: the leading digest bytes in unpadded URL-safe base64.
/// Falls back to hashing the input when it isn't hex, so the result is always path-safe.
pub fn encode_hash(hex_hash: &str) -> String {
    match decode_hex(hex_hash) {
        Some(bytes) if bytes.len() >= PATH_TOKEN_BYTES => {
            URL_SAFE_NO_PAD.encode(&bytes[..PATH_TOKEN_BYTES])
        }
        _ => {
            let digest = Sha256::digest(hex_hash.as_bytes());
            URL_SAFE_NO_PAD.encode(&digest[..PATH_TOKEN_BYTES])
        }
    }
}

/// Path token for raw content.
pub fn content_token(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    URL_SAFE_NO_PAD.encode(&digest[..PATH_TOKEN_BYTES])
}

/// Subresource Integrity string for content.
pub fn sri_sha256(content: &[u8]) -> String {
    format!("sha256-{}", BASE64.encode(Sha256::digest(content)))
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
