//! File-backed signer with passphrase-encrypted private keys.
//!
//! Each key lives in `<dir>/<key_id>.json` holding the role, GUN,
//! algorithm, public half and the encrypted PKCS#8 private material:
//! PBKDF2-HMAC-SHA256 derives a ChaCha20-Poly1305 key from the role's
//! passphrase, with a per-key random salt and nonce.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::PrivateKey;
use crate::data::{KeyAlgorithm, PublicKey, RoleName, Signature};
use crate::error::{Result, TufError};
use crate::signer::{Signer, SignerHealth};

const PBKDF2_ITERATIONS: u32 = 100_000;

/// Supplies the passphrase protecting a role's private keys.
///
/// Injected capability: the CLI reads environment variables or prompts,
/// tests use [`StaticPassphrase`]. The signer never caches passphrases.
pub trait PassphraseRetriever: Send + Sync {
    fn passphrase(&self, role: RoleName, gun: &str) -> Result<Zeroizing<String>>;
}

/// Fixed passphrase for every role.
pub struct StaticPassphrase(pub String);

impl PassphraseRetriever for StaticPassphrase {
    fn passphrase(&self, _role: RoleName, _gun: &str) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(self.0.clone()))
    }
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    role: RoleName,
    gun: String,
    algorithm: KeyAlgorithm,
    public: String,
    salt: String,
    nonce: String,
    ciphertext: String,
}

struct CachedKey {
    role: RoleName,
    public: PublicKey,
}

/// Passphrase-protected signer over a key directory.
pub struct LocalSigner {
    dir: PathBuf,
    gun: String,
    retriever: Box<dyn PassphraseRetriever>,
    cache: RwLock<HashMap<String, CachedKey>>,
}

impl LocalSigner {
    pub fn new(
        dir: impl Into<PathBuf>,
        gun: impl Into<String>,
        retriever: Box<dyn PassphraseRetriever>,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(LocalSigner { dir, gun: gun.into(), retriever, cache: RwLock::new(HashMap::new()) })
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key_id))
    }

    fn load_key_file(&self, key_id: &str) -> Result<KeyFile> {
        let path = self.key_path(key_id);
        if !path.exists() {
            return Err(TufError::UnknownKey(key_id.to_string()));
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn decrypt_private(&self, key_id: &str, file: &KeyFile) -> Result<PrivateKey> {
        let passphrase = self.retriever.passphrase(file.role, &file.gun)?;
        let salt = hex::decode(&file.salt)
            .map_err(|e| TufError::InvalidKey(format!("corrupt key file salt: {}", e)))?;
        let nonce = hex::decode(&file.nonce)
            .map_err(|e| TufError::InvalidKey(format!("corrupt key file nonce: {}", e)))?;
        let ciphertext = BASE64
            .decode(&file.ciphertext)
            .map_err(|e| TufError::InvalidKey(format!("corrupt key file ciphertext: {}", e)))?;

        let mut aead_key = Zeroizing::new([0u8; 32]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            passphrase.as_bytes(),
            &salt,
            PBKDF2_ITERATIONS,
            aead_key.as_mut(),
        );
        let cipher = ChaCha20Poly1305::new(Key::from_slice(aead_key.as_ref()));
        let der = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| TufError::PassphraseInvalid(key_id.to_string()))?;
        let der = Zeroizing::new(der);
        PrivateKey::from_pkcs8_der(file.algorithm, &der)
    }

    /// Import an existing private key under `role`, returning its key id.
    pub fn add_key(&self, role: RoleName, key: &PrivateKey) -> Result<String> {
        let key_id = key.public_key()?.key_id();
        self.add_key_with_id(&key_id, role, key)?;
        Ok(key_id)
    }

    /// Import a private key under a caller-chosen key id.
    ///
    /// Root keys are published as x509 certificates, so their metadata key
    /// id is derived from the certificate rather than the bare key; the
    /// signer must answer to that id.
    pub fn add_key_with_id(&self, key_id: &str, role: RoleName, key: &PrivateKey) -> Result<()> {
        let public = key.public_key()?;
        // Idempotent by key id.
        if self.key_path(key_id).exists() {
            return Ok(());
        }

        let passphrase = self.retriever.passphrase(role, &self.gun)?;
        let mut salt = [0u8; 16];
        let mut nonce = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let mut aead_key = Zeroizing::new([0u8; 32]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            passphrase.as_bytes(),
            &salt,
            PBKDF2_ITERATIONS,
            aead_key.as_mut(),
        );
        let cipher = ChaCha20Poly1305::new(Key::from_slice(aead_key.as_ref()));
        let der = key.to_pkcs8_der()?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), der.as_slice())
            .map_err(|e| TufError::InvalidKey(format!("key encryption failed: {}", e)))?;

        let file = KeyFile {
            role,
            gun: self.gun.clone(),
            algorithm: key.algorithm(),
            public: BASE64.encode(&public.public),
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        };
        let tmp = self.dir.join(format!(".{}.tmp", key_id));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        std::fs::rename(&tmp, self.key_path(key_id))?;

        self.cache.write().insert(key_id.to_string(), CachedKey { role, public });
        Ok(())
    }

    /// The role a stored key belongs to.
    pub fn key_role(&self, key_id: &str) -> Result<RoleName> {
        if let Some(cached) = self.cache.read().get(key_id) {
            return Ok(cached.role);
        }
        Ok(self.load_key_file(key_id)?.role)
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature> {
        let file = self.load_key_file(key_id)?;
        let private = self.decrypt_private(key_id, &file)?;
        let sig = private.sign(message)?;
        Ok(Signature { key_id: key_id.to_string(), method: file.algorithm.sig_method(), sig })
    }

    async fn public_key(&self, key_id: &str) -> Result<PublicKey> {
        if let Some(cached) = self.cache.read().get(key_id) {
            return Ok(cached.public.clone());
        }
        let file = self.load_key_file(key_id)?;
        let public = PublicKey::new(
            file.algorithm,
            BASE64
                .decode(&file.public)
                .map_err(|e| TufError::InvalidKey(format!("corrupt public key: {}", e)))?,
        );
        self.cache
            .write()
            .insert(key_id.to_string(), CachedKey { role: file.role, public: public.clone() });
        Ok(public)
    }

    async fn generate(
        &self,
        role: RoleName,
        algorithm: KeyAlgorithm,
    ) -> Result<(String, PublicKey)> {
        let private = PrivateKey::generate(algorithm)?;
        let public = private.public_key()?;
        let key_id = self.add_key(role, &private)?;
        Ok((key_id, public))
    }

    async fn remove(&self, key_id: &str) -> Result<()> {
        let path = self.key_path(key_id);
        if !path.exists() {
            return Err(TufError::UnknownKey(key_id.to_string()));
        }
        std::fs::remove_file(path)?;
        self.cache.write().remove(key_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                if !id.starts_with('.') {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn health(&self, _timeout: Duration) -> SignerHealth {
        match std::fs::metadata(&self.dir) {
            Ok(meta) if meta.is_dir() => SignerHealth::Ok,
            Ok(_) => SignerHealth::Unhealthy("key path is not a directory".into()),
            Err(e) => SignerHealth::Unreachable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::verify_signature;

    fn signer(dir: &std::path::Path) -> LocalSigner {
        LocalSigner::new(dir, "example.com/app", Box::new(StaticPassphrase("hunter2".into())))
            .unwrap()
    }

    #[tokio::test]
    async fn generate_sign_verify() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path());
        let (key_id, public) =
            signer.generate(RoleName::Targets, KeyAlgorithm::Ecdsa).await.unwrap();
        assert_eq!(key_id, public.key_id());

        let sig = signer.sign(&key_id, b"payload").await.unwrap();
        assert_eq!(sig.key_id, key_id);
        assert!(verify_signature(&public, sig.method, b"payload", &sig.sig).unwrap());
    }

    #[tokio::test]
    async fn keys_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let (key_id, public) = {
            let signer = signer(dir.path());
            signer.generate(RoleName::Root, KeyAlgorithm::Ed25519).await.unwrap()
        };
        let reopened = signer(dir.path());
        assert_eq!(reopened.public_key(&key_id).await.unwrap(), public);
        assert_eq!(reopened.key_role(&key_id).unwrap(), RoleName::Root);
        let sig = reopened.sign(&key_id, b"data").await.unwrap();
        assert!(verify_signature(&public, sig.method, b"data", &sig.sig).unwrap());
    }

    #[tokio::test]
    async fn wrong_passphrase_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let key_id = {
            let signer = signer(dir.path());
            signer.generate(RoleName::Targets, KeyAlgorithm::Ed25519).await.unwrap().0
        };
        let wrong = LocalSigner::new(
            dir.path(),
            "example.com/app",
            Box::new(StaticPassphrase("nope".into())),
        )
        .unwrap();
        let err = wrong.sign(&key_id, b"payload").await.unwrap_err();
        assert!(matches!(err, TufError::PassphraseInvalid(_)));
    }

    #[tokio::test]
    async fn unknown_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path());
        let err = signer.sign("deadbeef", b"payload").await.unwrap_err();
        assert!(matches!(err, TufError::UnknownKey(_)));
        let err = signer.remove("deadbeef").await.unwrap_err();
        assert!(matches!(err, TufError::UnknownKey(_)));
    }

    #[tokio::test]
    async fn list_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path());
        let (a, _) = signer.generate(RoleName::Root, KeyAlgorithm::Ed25519).await.unwrap();
        let (b, _) = signer.generate(RoleName::Targets, KeyAlgorithm::Ed25519).await.unwrap();
        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(signer.list().await.unwrap(), expected);

        signer.remove(&a).await.unwrap();
        assert_eq!(signer.list().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn add_key_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let signer = signer(dir.path());
        let key = PrivateKey::generate(KeyAlgorithm::Ed25519).unwrap();
        let id1 = signer.add_key(RoleName::Root, &key).unwrap();
        let id2 = signer.add_key(RoleName::Root, &key).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(signer.list().await.unwrap().len(), 1);
    }
}
