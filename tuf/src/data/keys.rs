//! Public key representation and key id derivation.
//!
//! Keys travel on the wire as `{"keytype": ..., "keyval": {"public": base64}}`.
//! The key id is the hex sha256 of the canonical JSON encoding of that
//! object, so it is stable across renames and across implementations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_sha256;
use crate::error::{Result, TufError};

/// Closed set of key algorithms.
///
/// The x509 variants carry a PEM-encoded certificate as their public
/// material; the certificate fingerprint links TUF key ids to the
/// certificate trust store for root pinning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "ecdsa")]
    Ecdsa,
    #[serde(rename = "ecdsa-x509")]
    EcdsaX509,
    #[serde(rename = "rsa")]
    Rsa,
    #[serde(rename = "rsa-x509")]
    RsaX509,
}

impl KeyAlgorithm {
    /// The signature method a key of this algorithm produces.
    pub fn sig_method(&self) -> SigMethod {
        match self {
            KeyAlgorithm::Ed25519 => SigMethod::Ed25519,
            KeyAlgorithm::Ecdsa | KeyAlgorithm::EcdsaX509 => SigMethod::Ecdsa,
            KeyAlgorithm::Rsa | KeyAlgorithm::RsaX509 => SigMethod::RsaPkcs1v15,
        }
    }

    /// Whether the public material is a PEM certificate rather than bare
    /// key bytes.
    pub fn is_x509(&self) -> bool {
        matches!(self, KeyAlgorithm::EcdsaX509 | KeyAlgorithm::RsaX509)
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyAlgorithm::Ed25519 => "ed25519",
            KeyAlgorithm::Ecdsa => "ecdsa",
            KeyAlgorithm::EcdsaX509 => "ecdsa-x509",
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::RsaX509 => "rsa-x509",
        };
        f.write_str(s)
    }
}

impl FromStr for KeyAlgorithm {
    type Err = TufError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            "ecdsa" => Ok(KeyAlgorithm::Ecdsa),
            "ecdsa-x509" => Ok(KeyAlgorithm::EcdsaX509),
            "rsa" => Ok(KeyAlgorithm::Rsa),
            "rsa-x509" => Ok(KeyAlgorithm::RsaX509),
            other => Err(TufError::InvalidKey(format!("unknown key algorithm: {}", other))),
        }
    }
}

/// Signature methods carried on individual signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigMethod {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "ecdsa")]
    Ecdsa,
    #[serde(rename = "rsapkcs1v15")]
    RsaPkcs1v15,
}

impl fmt::Display for SigMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SigMethod::Ed25519 => "ed25519",
            SigMethod::Ecdsa => "ecdsa",
            SigMethod::RsaPkcs1v15 => "rsapkcs1v15",
        };
        f.write_str(s)
    }
}

mod keyval {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct KeyVal {
        public: String,
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        KeyVal { public: STANDARD.encode(bytes) }.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let kv = KeyVal::deserialize(de)?;
        STANDARD.decode(kv.public).map_err(serde::de::Error::custom)
    }
}

/// A public key as it appears in role metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    #[serde(rename = "keytype")]
    pub algorithm: KeyAlgorithm,
    #[serde(rename = "keyval", with = "keyval")]
    pub public: Vec<u8>,
}

impl PublicKey {
    pub fn new(algorithm: KeyAlgorithm, public: Vec<u8>) -> Self {
        PublicKey { algorithm, public }
    }

    /// Hex sha256 of the canonical JSON encoding of this key object.
    pub fn key_id(&self) -> String {
        // Canonical encoding of a two-field struct cannot fail.
        let digest = canonical_sha256(self).unwrap_or([0u8; 32]);
        hex::encode(digest)
    }
}

/// A single signature over the canonical bytes of a `signed` subobject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "keyid")]
    pub key_id: String,
    pub method: SigMethod,
    #[serde(with = "sig_bytes")]
    pub sig: Vec<u8>,
}

mod sig_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
