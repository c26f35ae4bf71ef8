//! SHA-256 helpers shared by fingerprinting and the compact key checksum.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of a component fingerprint in hex characters (128 bits).
pub const FINGERPRINT_HEX_LEN: usize = 32;

/// Length of the compact key checksum in hex characters.
pub const CHECKSUM_HEX_LEN: usize = 4;

/// Returns the lowercase hex SHA-256 digest of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hashes one hardware value as `"<COMPONENT>:<raw>"`, truncated to 128 bits.
#[must_use]
pub fn component_hash(component: &str, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(component.as_bytes());
    hasher.update(b":");
    hasher.update(raw.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..FINGERPRINT_HEX_LEN / 2])
}

/// First four uppercase hex characters of the digest of `payload`.
#[must_use]
pub fn short_checksum(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode_upper(&digest[..CHECKSUM_HEX_LEN / 2])
}

/// Compares two hex strings ignoring ASCII case, in time independent of
/// where they differ.
#[must_use]
pub fn hex_eq_ct(a: &str, b: &str) -> bool {
    let a = a.to_ascii_lowercase();
    let b = b.to_ascii_lowercase();
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
