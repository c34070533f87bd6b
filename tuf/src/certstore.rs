//! Trusted-certificate store: CA set and pinned leaf certificates.
//!
//! Certificates are addressed by the hex sha256 fingerprint of their DER
//! encoding. Root metadata validation asks the store whether a leaf
//! certificate (carried inside an x509-tagged root key) is trustworthy for
//! a GUN: the leaf's CommonName must equal the GUN and the leaf must
//! either be pinned directly or chain to a CA in the store.

use std::collections::HashMap;

use der::asn1::{PrintableStringRef, Utf8StringRef};
use der::oid::ObjectIdentifier;
use der::Encode as _;
use parking_lot::RwLock;
use x509_cert::Certificate;

use crate::canonical::sha256;
use crate::crypto::verify_signature;
use crate::data::{KeyAlgorithm, PublicKey, SigMethod};
use crate::error::{Result, TufError};

const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_ECDSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const OID_ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");
const OID_RSA_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");

/// Hex sha256 fingerprint of a certificate's DER encoding.
pub fn fingerprint(cert: &Certificate) -> Result<String> {
    let der = cert.to_der().map_err(|e| TufError::Certificate(e.to_string()))?;
    Ok(hex::encode(sha256(&der)))
}

/// Extract the subject CommonName of a certificate.
pub fn common_name(cert: &Certificate) -> Result<String> {
    for rdn in cert.tbs_certificate.subject.0.iter() {
        for attr in rdn.0.iter() {
            if attr.oid == OID_COMMON_NAME {
                if let Ok(s) = attr.value.decode_as::<Utf8StringRef>() {
                    return Ok(s.as_str().to_string());
                }
                if let Ok(s) = attr.value.decode_as::<PrintableStringRef>() {
                    return Ok(s.as_str().to_string());
                }
            }
        }
    }
    Err(TufError::Certificate("certificate has no CommonName".into()))
}

/// Verify `child`'s signature using `parent`'s public key.
fn verify_issued_by(child: &Certificate, parent: &Certificate) -> Result<bool> {
    if child.tbs_certificate.issuer != parent.tbs_certificate.subject {
        return Ok(false);
    }
    let tbs = child
        .tbs_certificate
        .to_der()
        .map_err(|e| TufError::Certificate(e.to_string()))?;
    let sig = child
        .signature
        .as_bytes()
        .ok_or_else(|| TufError::Certificate("certificate signature not byte-aligned".into()))?;
    let parent_spki = parent
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| TufError::Certificate("issuer SPKI not byte-aligned".into()))?;

    let oid = child.signature_algorithm.oid;
    let (algorithm, method, sig_bytes) = if oid == OID_ECDSA_SHA256 {
        // Certificate ECDSA signatures are DER; the verifier takes raw r||s.
        let raw = crate::crypto::normalize_ecdsa_signature(sig)?;
        (KeyAlgorithm::Ecdsa, SigMethod::Ecdsa, raw)
    } else if oid == OID_ED25519 {
        (KeyAlgorithm::Ed25519, SigMethod::Ed25519, sig.to_vec())
    } else if oid == OID_RSA_SHA256 {
        (KeyAlgorithm::Rsa, SigMethod::RsaPkcs1v15, sig.to_vec())
    } else {
        return Err(TufError::Certificate(format!("unsupported signature algorithm {}", oid)));
    };

    let key = PublicKey::new(algorithm, parent_spki.to_vec());
    verify_signature(&key, method, &tbs, &sig_bytes)
}

struct StoredCert {
    cert: Certificate,
    pem: Vec<u8>,
}

/// Two partitions of trusted certificates, both fingerprint-addressed.
#[derive(Default)]
pub struct CertStore {
    cas: RwLock<HashMap<String, StoredCert>>,
    pinned: RwLock<HashMap<String, StoredCert>>,
}

impl CertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(partition: &RwLock<HashMap<String, StoredCert>>, pem: &[u8]) -> Result<String> {
        let cert = crate::crypto::parse_pem_cert(pem)?;
        let fp = fingerprint(&cert)?;
        partition.write().insert(fp.clone(), StoredCert { cert, pem: pem.to_vec() });
        Ok(fp)
    }

    /// Add a CA certificate; returns its fingerprint.
    pub fn add_ca(&self, pem: &[u8]) -> Result<String> {
        Self::insert(&self.cas, pem)
    }

    /// Pin a leaf certificate; returns its fingerprint.
    pub fn add_pinned(&self, pem: &[u8]) -> Result<String> {
        Self::insert(&self.pinned, pem)
    }

    pub fn remove_ca(&self, fingerprint: &str) -> bool {
        self.cas.write().remove(fingerprint).is_some()
    }

    pub fn remove_pinned(&self, fingerprint: &str) -> bool {
        self.pinned.write().remove(fingerprint).is_some()
    }

    /// Exact-match lookup across both partitions.
    pub fn get(&self, fingerprint: &str) -> Option<Vec<u8>> {
        if let Some(stored) = self.cas.read().get(fingerprint) {
            return Some(stored.pem.clone());
        }
        self.pinned.read().get(fingerprint).map(|s| s.pem.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.cas.read().is_empty() && self.pinned.read().is_empty()
    }

    /// Decide whether `leaf_pem` is trusted to anchor `gun`.
    ///
    /// The leaf's CommonName must equal the GUN. Acceptance requires the
    /// leaf fingerprint to be pinned, or a chain through the given
    /// intermediates terminating at a stored CA.
    pub fn verify_leaf(&self, gun: &str, leaf_pem: &[u8], intermediates: &[Vec<u8>]) -> Result<()> {
        let leaf = crate::crypto::parse_pem_cert(leaf_pem)?;
        let cn = common_name(&leaf)?;
        if cn != gun {
            return Err(TufError::Certificate(format!(
                "certificate CommonName {:?} does not match collection {:?}",
                cn, gun
            )));
        }

        let fp = fingerprint(&leaf)?;
        if self.pinned.read().contains_key(&fp) {
            return Ok(());
        }

        // Walk from the leaf through intermediates; each hop must be signed
        // by the next link, and the last link must be signed by a stored CA.
        let mut chain = vec![leaf];
        for pem in intermediates {
            chain.push(crate::crypto::parse_pem_cert(pem)?);
        }
        for window in chain.windows(2) {
            if !verify_issued_by(&window[0], &window[1])? {
                return Err(TufError::Certificate(
                    "certificate chain link does not verify".into(),
                ));
            }
        }
        let last = chain.last().expect("chain contains at least the leaf");
        let cas = self.cas.read();
        for stored in cas.values() {
            if verify_issued_by(last, &stored.cert).unwrap_or(false) {
                return Ok(());
            }
        }
        Err(TufError::Certificate(format!("no trust chain for {}", gun)))
    }

    /// Load every `.pem` file in a directory into the given partition.
    pub fn load_dir(&self, dir: &std::path::Path, pinned: bool) -> Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "pem").unwrap_or(false) {
                let pem = std::fs::read(&path)?;
                let result =
                    if pinned { self.add_pinned(&pem) } else { self.add_ca(&pem) };
                match result {
                    Ok(_) => loaded += 1,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unparseable certificate");
                    }
                }
            }
        }
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed(cn: &str) -> (rcgen::CertifiedKey, Vec<u8>) {
        let ck = rcgen::generate_simple_self_signed(vec![cn.to_string()]).unwrap();
        let pem = ck.cert.pem().into_bytes();
        (ck, pem)
    }

    fn issued(cn: &str, issuer: &rcgen::CertifiedKey) -> Vec<u8> {
        let mut params = rcgen::CertificateParams::new(vec![cn.to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, cn);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &issuer.cert, &issuer.key_pair).unwrap();
        cert.pem().into_bytes()
    }

    fn ca(cn: &str) -> (rcgen::CertifiedKey, Vec<u8>) {
        let mut params = rcgen::CertificateParams::new(vec![]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, cn);
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        let pem = cert.pem().into_bytes();
        (rcgen::CertifiedKey { cert, key_pair: key }, pem)
    }

    #[test]
    fn common_name_extraction() {
        let mut params = rcgen::CertificateParams::new(vec![]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "example.com/app");
        let key = rcgen::KeyPair::generate().unwrap();
        let pem = params.self_signed(&key).unwrap().pem().into_bytes();
        let cert = crate::crypto::parse_pem_cert(&pem).unwrap();
        assert_eq!(common_name(&cert).unwrap(), "example.com/app");
    }

    #[test]
    fn pinned_leaf_is_accepted() {
        let store = CertStore::new();
        let mut params = rcgen::CertificateParams::new(vec![]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "example.com/app");
        let key = rcgen::KeyPair::generate().unwrap();
        let pem = params.self_signed(&key).unwrap().pem().into_bytes();
        store.add_pinned(&pem).unwrap();
        store.verify_leaf("example.com/app", &pem, &[]).unwrap();
    }

    #[test]
    fn cn_mismatch_is_rejected_even_when_pinned() {
        let store = CertStore::new();
        let mut params = rcgen::CertificateParams::new(vec![]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "example.com/app");
        let key = rcgen::KeyPair::generate().unwrap();
        let pem = params.self_signed(&key).unwrap().pem().into_bytes();
        store.add_pinned(&pem).unwrap();
        let err = store.verify_leaf("example.com/other", &pem, &[]).unwrap_err();
        assert!(matches!(err, TufError::Certificate(_)));
    }

    #[test]
    fn chain_to_ca_is_accepted() {
        let store = CertStore::new();
        let (ca_key, ca_pem) = ca("Provenant Root CA");
        store.add_ca(&ca_pem).unwrap();

        let leaf_pem = issued("example.com/app", &ca_key);
        store.verify_leaf("example.com/app", &leaf_pem, &[]).unwrap();
    }

    #[test]
    fn untrusted_leaf_is_rejected() {
        let store = CertStore::new();
        let (_, ca_pem) = ca("Provenant Root CA");
        store.add_ca(&ca_pem).unwrap();

        let (_, other_pem) = self_signed("example.com/app");
        let err = store.verify_leaf("example.com/app", &other_pem, &[]).unwrap_err();
        assert!(matches!(err, TufError::Certificate(_)));
    }

    #[test]
    fn fingerprint_lookup_is_exact() {
        let store = CertStore::new();
        let (_, pem) = self_signed("a");
        let fp = store.add_pinned(&pem).unwrap();
        assert!(store.get(&fp).is_some());
        assert!(store.get("00".repeat(32).as_str()).is_none());
        assert!(store.remove_pinned(&fp));
        assert!(store.get(&fp).is_none());
    }
}
