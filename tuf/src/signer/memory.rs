//! In-memory signer, for tests and for server-held role keys.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::crypto::PrivateKey;
use crate::data::{KeyAlgorithm, PublicKey, RoleName, Signature};
use crate::error::{Result, TufError};
use crate::signer::{Signer, SignerHealth};

struct Entry {
    role: RoleName,
    private: Arc<PrivateKey>,
    public: PublicKey,
}

/// Holds unencrypted private keys in memory.
#[derive(Default)]
pub struct MemorySigner {
    keys: RwLock<HashMap<String, Entry>>,
}

impl MemorySigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import an existing private key; idempotent by key id.
    pub fn add_key(&self, role: RoleName, private: PrivateKey) -> Result<String> {
        let key_id = private.public_key()?.key_id();
        self.add_key_with_id(&key_id, role, private)?;
        Ok(key_id)
    }

    /// Import a private key under a caller-chosen key id, e.g. the
    /// certificate-derived id of an x509-published root key.
    pub fn add_key_with_id(&self, key_id: &str, role: RoleName, private: PrivateKey) -> Result<()> {
        let public = private.public_key()?;
        self.keys
            .write()
            .entry(key_id.to_string())
            .or_insert(Entry { role, private: Arc::new(private), public });
        Ok(())
    }

    pub fn key_role(&self, key_id: &str) -> Result<RoleName> {
        self.keys
            .read()
            .get(key_id)
            .map(|e| e.role)
            .ok_or_else(|| TufError::UnknownKey(key_id.to_string()))
    }
}

#[async_trait]
impl Signer for MemorySigner {
    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature> {
        let (private, method) = {
            let keys = self.keys.read();
            let entry = keys.get(key_id).ok_or_else(|| TufError::UnknownKey(key_id.to_string()))?;
            (entry.private.clone(), entry.public.algorithm.sig_method())
        };
        let sig = private.sign(message)?;
        Ok(Signature { key_id: key_id.to_string(), method, sig })
    }

    async fn public_key(&self, key_id: &str) -> Result<PublicKey> {
        self.keys
            .read()
            .get(key_id)
            .map(|e| e.public.clone())
            .ok_or_else(|| TufError::UnknownKey(key_id.to_string()))
    }

    async fn generate(
        &self,
        role: RoleName,
        algorithm: KeyAlgorithm,
    ) -> Result<(String, PublicKey)> {
        let private = PrivateKey::generate(algorithm)?;
        let public = private.public_key()?;
        let key_id = self.add_key(role, private)?;
        Ok((key_id, public))
    }

    async fn remove(&self, key_id: &str) -> Result<()> {
        self.keys
            .write()
            .remove(key_id)
            .map(|_| ())
            .ok_or_else(|| TufError::UnknownKey(key_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.keys.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn health(&self, _timeout: Duration) -> SignerHealth {
        SignerHealth::Ok
    }
}
