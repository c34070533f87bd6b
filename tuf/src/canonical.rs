//! Canonical JSON encoding.
//!
//! All signatures in the system cover the canonical JSON form of the
//! `signed` subobject: object keys sorted, no insignificant whitespace,
//! integral numbers only. Two implementations serializing the same abstract
//! value must produce byte-identical output, so digests and signatures can
//! be recomputed from a parsed value.

use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Result, TufError};

/// Serialize a value to canonical JSON bytes.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
    value
        .serialize(&mut ser)
        .map_err(|e| TufError::Encode(e.to_string()))?;
    Ok(buf)
}

/// sha256 over the canonical encoding of `value`.
pub fn canonical_sha256<T: Serialize>(value: &T) -> Result<[u8; 32]> {
    Ok(Sha256::digest(to_canonical_json(value)?).into())
}

/// sha256 of raw bytes.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// sha512 of raw bytes.
pub fn sha512(bytes: &[u8]) -> [u8; 64] {
    Sha512::digest(bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_and_whitespace_is_fixed() {
        let value = json!({"zebra": 1, "alpha": {"n": 2, "m": 3}, "mid": [1, 2]});
        let bytes = to_canonical_json(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":{"m":3,"n":2},"mid":[1,2],"zebra":1}"#
        );
    }

    #[test]
    fn encoding_is_stable_across_reparse() {
        let value = json!({"b": "two", "a": 1, "c": {"y": true, "x": null}});
        let first = to_canonical_json(&value).unwrap();
        let reparsed: serde_json::Value = serde_json::from_slice(&first).unwrap();
        let second = to_canonical_json(&reparsed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn digest_matches_known_vector() {
        // sha256("hello")
        assert_eq!(
            hex::encode(sha256(b"hello")),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
