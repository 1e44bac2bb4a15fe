//! Content-addressing primitives shared by every identifier in the core.
//!
//! Mirrors the sha256-digest idiom the registry transport layer uses for
//! blobs (`sha2::Digest` over raw bytes, rendered as a lowercase hex
//! string prefixed with `sha256:`), generalized here to hash the
//! canonical encoding of whole value-model records instead of file
//! contents.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest256([u8; 32]);

impl Digest256 {
    pub fn of_bytes(bytes: &[u8]) -> Digest256 {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Digest256(hasher.finalize().into())
    }

    /// Hash the canonical JSON encoding of a serializable value.
    ///
    /// Canonical here means "the field order `serde` emits for a
    /// `#[derive(Serialize)]` struct", which is stable for a fixed type
    /// definition - sufficient for content addressing since we control
    /// every type that gets hashed.
    pub fn of_value<T: Serialize>(value: &T) -> Digest256 {
        let encoded =
            serde_json::to_vec(value).expect("value-model types always serialize");
        Digest256::of_bytes(&encoded)
    }

    pub fn to_hex(self) -> String {
        let mut s = String::with_capacity(64);
        for byte in self.0 {
            use std::fmt::Write;
            write!(s, "{:02x}", byte).expect("writing to a String cannot fail");
        }
        s
    }

    pub fn from_hex(hex: &str) -> Option<Digest256> {
        if hex.len() != 64 {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).ok()?;
            out[i] = u8::from_str_radix(s, 16).ok()?;
        }
        Some(Digest256(out))
    }
}

impl fmt::Display for Digest256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let d = Digest256::of_bytes(b"hello");
        let hex = d.to_hex();
        assert_eq!(Digest256::from_hex(&hex), Some(d));
    }

    #[test]
    fn equal_values_hash_equal() {
        let a = Digest256::of_value(&vec!["a", "b"]);
        let b = Digest256::of_value(&vec!["a", "b"]);
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_values_hash_distinct() {
        let a = Digest256::of_value(&vec!["a", "b"]);
        let b = Digest256::of_value(&vec!["a", "c"]);
        assert_ne!(a, b);
    }
}
