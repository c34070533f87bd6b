//! Per-algorithm signing and verification.
//!
//! Algorithms are a closed set; each variant knows how to parse its public
//! material, sign, and verify. ECDSA signatures are raw `r || s`
//! internally; DER-encoded signatures from remote signers are normalized
//! before they reach the verifier. RSA signatures are PKCS#1 v1.5 over
//! sha256.

use ed25519_dalek::Verifier as _;
use p256::ecdsa::signature::Signer as _;
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey as _;
use rsa::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _, EncodePrivateKey as _};
use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256};
use x509_cert::der::Decode as _;
use zeroize::Zeroizing;

use crate::data::{KeyAlgorithm, PublicKey, SigMethod};
use crate::error::{Result, TufError};

/// A private signing key held in memory.
///
/// This type only ever lives inside a signer implementation; the rest of
/// the system sees the `Signer` capability and public keys.
pub enum PrivateKey {
    Ed25519(ed25519_dalek::SigningKey),
    Ecdsa(p256::ecdsa::SigningKey),
    Rsa(Box<rsa::RsaPrivateKey>),
}

impl PrivateKey {
    /// Generate a fresh key for a bare (non-x509) algorithm.
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        match algorithm {
            KeyAlgorithm::Ed25519 => {
                Ok(PrivateKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng)))
            }
            KeyAlgorithm::Ecdsa | KeyAlgorithm::EcdsaX509 => {
                Ok(PrivateKey::Ecdsa(p256::ecdsa::SigningKey::random(&mut OsRng)))
            }
            KeyAlgorithm::Rsa | KeyAlgorithm::RsaX509 => {
                let key = rsa::RsaPrivateKey::new(&mut OsRng, 2048)
                    .map_err(|e| TufError::InvalidKey(e.to_string()))?;
                Ok(PrivateKey::Rsa(Box::new(key)))
            }
        }
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self {
            PrivateKey::Ed25519(_) => KeyAlgorithm::Ed25519,
            PrivateKey::Ecdsa(_) => KeyAlgorithm::Ecdsa,
            PrivateKey::Rsa(_) => KeyAlgorithm::Rsa,
        }
    }

    /// The public half, in the bare wire encoding for the algorithm.
    pub fn public_key(&self) -> Result<PublicKey> {
        match self {
            PrivateKey::Ed25519(key) => Ok(PublicKey::new(
                KeyAlgorithm::Ed25519,
                key.verifying_key().to_bytes().to_vec(),
            )),
            PrivateKey::Ecdsa(key) => Ok(PublicKey::new(
                KeyAlgorithm::Ecdsa,
                key.verifying_key().to_encoded_point(false).as_bytes().to_vec(),
            )),
            PrivateKey::Rsa(key) => {
                use rsa::pkcs8::EncodePublicKey as _;
                let spki = key
                    .to_public_key()
                    .to_public_key_der()
                    .map_err(|e| TufError::InvalidKey(e.to_string()))?;
                Ok(PublicKey::new(KeyAlgorithm::Rsa, spki.as_bytes().to_vec()))
            }
        }
    }

    /// Sign `message`, returning the signature in the system's normal form
    /// for the algorithm (raw for Ed25519/ECDSA, DER-less PKCS#1 for RSA).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match self {
            PrivateKey::Ed25519(key) => {
                use ed25519_dalek::Signer as _;
                Ok(key.sign(message).to_bytes().to_vec())
            }
            PrivateKey::Ecdsa(key) => {
                let sig: p256::ecdsa::Signature = key.sign(message);
                Ok(sig.to_bytes().to_vec())
            }
            PrivateKey::Rsa(key) => {
                let digest = Sha256::digest(message);
                key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| TufError::InvalidKey(format!("rsa signing failed: {}", e)))
            }
        }
    }

    /// Serialize the private material as PKCS#8 DER, for encrypted storage.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let der = match self {
            PrivateKey::Ed25519(key) => key
                .to_pkcs8_der()
                .map_err(|e| TufError::InvalidKey(e.to_string()))?,
            PrivateKey::Ecdsa(key) => {
                use p256::pkcs8::EncodePrivateKey as _;
                key.to_pkcs8_der().map_err(|e| TufError::InvalidKey(e.to_string()))?
            }
            PrivateKey::Rsa(key) => {
                key.to_pkcs8_der().map_err(|e| TufError::InvalidKey(e.to_string()))?
            }
        };
        Ok(Zeroizing::new(der.as_bytes().to_vec()))
    }

    /// Parse private material previously produced by `to_pkcs8_der`.
    pub fn from_pkcs8_der(algorithm: KeyAlgorithm, der: &[u8]) -> Result<Self> {
        match algorithm {
            KeyAlgorithm::Ed25519 => {
                let key = ed25519_dalek::SigningKey::from_pkcs8_der(der)
                    .map_err(|e| TufError::InvalidKey(e.to_string()))?;
                Ok(PrivateKey::Ed25519(key))
            }
            KeyAlgorithm::Ecdsa | KeyAlgorithm::EcdsaX509 => {
                use p256::pkcs8::DecodePrivateKey as _;
                let key = p256::ecdsa::SigningKey::from_pkcs8_der(der)
                    .map_err(|e| TufError::InvalidKey(e.to_string()))?;
                Ok(PrivateKey::Ecdsa(key))
            }
            KeyAlgorithm::Rsa | KeyAlgorithm::RsaX509 => {
                let key = rsa::RsaPrivateKey::from_pkcs8_der(der)
                    .map_err(|e| TufError::InvalidKey(e.to_string()))?;
                Ok(PrivateKey::Rsa(Box::new(key)))
            }
        }
    }
}

/// Verify `sig` over `message` with `key`, using `method`.
///
/// Returns Ok(true) on a valid signature, Ok(false) on an invalid one,
/// and an error only when the key material itself cannot be parsed.
pub fn verify_signature(
    key: &PublicKey,
    method: SigMethod,
    message: &[u8],
    sig: &[u8],
) -> Result<bool> {
    if key.algorithm.sig_method() != method {
        return Ok(false);
    }
    let material = if key.algorithm.is_x509() {
        spki_from_pem_cert(&key.public)?
    } else {
        key.public.clone()
    };
    match method {
        SigMethod::Ed25519 => {
            let bytes: [u8; 32] = material
                .as_slice()
                .try_into()
                .map_err(|_| TufError::InvalidKey("ed25519 public key must be 32 bytes".into()))?;
            let vk = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|e| TufError::InvalidKey(e.to_string()))?;
            let Ok(signature) = ed25519_dalek::Signature::from_slice(sig) else {
                return Ok(false);
            };
            Ok(vk.verify(message, &signature).is_ok())
        }
        SigMethod::Ecdsa => {
            let vk = p256::ecdsa::VerifyingKey::from_sec1_bytes(&material)
                .map_err(|e| TufError::InvalidKey(e.to_string()))?;
            let Ok(signature) = p256::ecdsa::Signature::from_slice(sig) else {
                return Ok(false);
            };
            use p256::ecdsa::signature::Verifier as _;
            Ok(vk.verify(message, &signature).is_ok())
        }
        SigMethod::RsaPkcs1v15 => {
            let pk = rsa::RsaPublicKey::from_public_key_der(&material)
                .or_else(|_| rsa::RsaPublicKey::from_pkcs1_der(&material))
                .map_err(|e| TufError::InvalidKey(e.to_string()))?;
            let digest = Sha256::digest(message);
            Ok(pk.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, sig).is_ok())
        }
    }
}

/// Normalize an ECDSA signature to raw `r || s`.
///
/// Remote signing services may answer in ASN.1 DER; local verification and
/// the wire format both use the raw form.
pub fn normalize_ecdsa_signature(sig: &[u8]) -> Result<Vec<u8>> {
    if let Ok(raw) = p256::ecdsa::Signature::from_slice(sig) {
        return Ok(raw.to_bytes().to_vec());
    }
    let der = p256::ecdsa::Signature::from_der(sig)
        .map_err(|e| TufError::InvalidKey(format!("unparseable ecdsa signature: {}", e)))?;
    Ok(der.to_bytes().to_vec())
}

/// Extract the subject public key bytes from a PEM certificate.
///
/// For ECDSA certs this is the SEC1 point; for Ed25519 the raw key; for
/// RSA the PKCS#1 RSAPublicKey DER, all exactly as they sit in the SPKI
/// BIT STRING.
pub fn spki_from_pem_cert(pem: &[u8]) -> Result<Vec<u8>> {
    let cert = parse_pem_cert(pem)?;
    let spki = &cert.tbs_certificate.subject_public_key_info;
    spki.subject_public_key
        .as_bytes()
        .map(|b| b.to_vec())
        .ok_or_else(|| TufError::Certificate("certificate SPKI is not byte-aligned".into()))
}

/// Parse a single PEM-encoded certificate.
pub fn parse_pem_cert(pem: &[u8]) -> Result<x509_cert::Certificate> {
    let (label, der) = pem_rfc7468::decode_vec(pem)
        .map_err(|e| TufError::Certificate(format!("invalid PEM: {}", e)))?;
    if label != "CERTIFICATE" {
        return Err(TufError::Certificate(format!("unexpected PEM label: {}", label)));
    }
    x509_cert::Certificate::from_der(&der)
        .map_err(|e| TufError::Certificate(format!("invalid certificate: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ed25519_sign_verify_round_trip() {
        let key = PrivateKey::generate(KeyAlgorithm::Ed25519).unwrap();
        let public = key.public_key().unwrap();
        let sig = key.sign(b"message").unwrap();
        assert!(verify_signature(&public, SigMethod::Ed25519, b"message", &sig).unwrap());
        assert!(!verify_signature(&public, SigMethod::Ed25519, b"other", &sig).unwrap());
    }

    #[test]
    fn ecdsa_sign_verify_round_trip() {
        let key = PrivateKey::generate(KeyAlgorithm::Ecdsa).unwrap();
        let public = key.public_key().unwrap();
        let sig = key.sign(b"message").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verify_signature(&public, SigMethod::Ecdsa, b"message", &sig).unwrap());
        assert!(!verify_signature(&public, SigMethod::Ecdsa, b"tampered", &sig).unwrap());
    }

    #[test]
    fn method_mismatch_is_invalid_not_error() {
        let key = PrivateKey::generate(KeyAlgorithm::Ed25519).unwrap();
        let public = key.public_key().unwrap();
        let sig = key.sign(b"message").unwrap();
        assert!(!verify_signature(&public, SigMethod::Ecdsa, b"message", &sig).unwrap());
    }

    #[test]
    fn ecdsa_der_normalization() {
        use p256::ecdsa::signature::Signer as _;
        let key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let sig: p256::ecdsa::Signature = key.sign(b"payload");
        let der = sig.to_der().as_bytes().to_vec();
        let raw = normalize_ecdsa_signature(&der).unwrap();
        assert_eq!(raw, sig.to_bytes().to_vec());
        // Raw input passes through unchanged.
        assert_eq!(normalize_ecdsa_signature(&raw).unwrap(), raw);
    }

    #[test]
    fn garbage_ecdsa_signature_is_rejected() {
        assert!(normalize_ecdsa_signature(&[0u8; 10]).is_err());
    }

    #[test]
    fn private_key_pkcs8_round_trip() {
        for algo in [KeyAlgorithm::Ed25519, KeyAlgorithm::Ecdsa] {
            let key = PrivateKey::generate(algo).unwrap();
            let der = key.to_pkcs8_der().unwrap();
            let restored = PrivateKey::from_pkcs8_der(algo, &der).unwrap();
            assert_eq!(restored.public_key().unwrap(), key.public_key().unwrap());
            let sig = restored.sign(b"x").unwrap();
            assert!(verify_signature(&key.public_key().unwrap(), algo.sig_method(), b"x", &sig)
                .unwrap());
        }
    }
}
