//! Server-held role keys.
//!
//! The server owns the single timestamp key for every GUN, and holds the
//! snapshot key when publishers delegate snapshot signing. Keys are
//! created lazily; a racing create observes the duplicate, discards its
//! own key and returns the one that won.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use provenant_tuf::data::{KeyAlgorithm, PublicKey, RoleName};
use provenant_tuf::error::{Result, TufError};
use provenant_tuf::signer::{MemorySigner, Signer};

pub struct KeyService {
    signer: Arc<dyn Signer>,
    by_gun_role: RwLock<HashMap<(String, RoleName), String>>,
}

impl KeyService {
    /// Key service over an in-process signer.
    pub fn new() -> Self {
        Self::with_signer(Arc::new(MemorySigner::new()))
    }

    /// Key service over any signer backend, e.g. the remote signing
    /// service that never surrenders private material.
    pub fn with_signer(signer: Arc<dyn Signer>) -> Self {
        KeyService { signer, by_gun_role: RwLock::new(HashMap::new()) }
    }

    /// The signer backing the server-held keys.
    pub fn signer(&self) -> Arc<dyn Signer> {
        self.signer.clone()
    }

    /// Fetch the key for `(gun, role)`, creating it on first use.
    ///
    /// Only timestamp and snapshot keys are server-managed.
    pub async fn get_or_create(&self, gun: &str, role: RoleName) -> Result<PublicKey> {
        if !matches!(role, RoleName::Timestamp | RoleName::Snapshot) {
            return Err(TufError::InvalidOperation {
                msg: format!("{} keys are not held by the server", role),
            });
        }
        if let Some(key_id) = self.lookup(gun, role) {
            return self.signer.public_key(&key_id).await;
        }

        let (key_id, public) = self.signer.generate(role, KeyAlgorithm::Ecdsa).await?;
        let lost_race_to = {
            let mut map = self.by_gun_role.write();
            match map.get(&(gun.to_string(), role)) {
                Some(existing) => Some(existing.clone()),
                None => {
                    map.insert((gun.to_string(), role), key_id.clone());
                    None
                }
            }
        };
        if let Some(existing) = lost_race_to {
            // Lost the create race: keep the winner, drop ours.
            debug!(gun, %role, "key create raced; reusing existing key");
            self.signer.remove(&key_id).await.ok();
            return self.signer.public_key(&existing).await;
        }
        debug!(gun, %role, key_id, "created server-held key");
        Ok(public)
    }

    /// The current key for `(gun, role)` without creating one.
    pub async fn public_key(&self, gun: &str, role: RoleName) -> Result<PublicKey> {
        let key_id = self
            .lookup(gun, role)
            .ok_or_else(|| TufError::MetaNotFound(format!("{} key for {}", role, gun)))?;
        self.signer.public_key(&key_id).await
    }

    pub fn key_id(&self, gun: &str, role: RoleName) -> Option<String> {
        self.lookup(gun, role)
    }

    /// Replace the key for `(gun, role)` with a fresh one.
    pub async fn rotate(&self, gun: &str, role: RoleName) -> Result<PublicKey> {
        if !matches!(role, RoleName::Timestamp | RoleName::Snapshot) {
            return Err(TufError::InvalidOperation {
                msg: format!("{} keys are not held by the server", role),
            });
        }
        let (key_id, public) = self.signer.generate(role, KeyAlgorithm::Ecdsa).await?;
        let old = self.by_gun_role.write().insert((gun.to_string(), role), key_id);
        if let Some(old) = old {
            self.signer.remove(&old).await.ok();
        }
        Ok(public)
    }

    fn lookup(&self, gun: &str, role: RoleName) -> Option<String> {
        self.by_gun_role.read().get(&(gun.to_string(), role)).cloned()
    }
}

impl Default for KeyService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_lazy_and_stable() {
        let keys = KeyService::new();
        assert!(keys.public_key("gun", RoleName::Timestamp).await.is_err());
        let first = keys.get_or_create("gun", RoleName::Timestamp).await.unwrap();
        let second = keys.get_or_create("gun", RoleName::Timestamp).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(keys.public_key("gun", RoleName::Timestamp).await.unwrap(), first);
    }

    #[tokio::test]
    async fn guns_get_distinct_keys() {
        let keys = KeyService::new();
        let a = keys.get_or_create("a", RoleName::Timestamp).await.unwrap();
        let b = keys.get_or_create("b", RoleName::Timestamp).await.unwrap();
        assert_ne!(a.key_id(), b.key_id());
    }

    #[tokio::test]
    async fn only_server_roles_are_managed() {
        let keys = KeyService::new();
        let err = keys.get_or_create("gun", RoleName::Root).await.unwrap_err();
        assert!(matches!(err, TufError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn rotate_replaces_key() {
        let keys = KeyService::new();
        let old = keys.get_or_create("gun", RoleName::Snapshot).await.unwrap();
        let new = keys.rotate("gun", RoleName::Snapshot).await.unwrap();
        assert_ne!(old.key_id(), new.key_id());
        assert_eq!(keys.public_key("gun", RoleName::Snapshot).await.unwrap(), new);
        // The old key is gone from the signer.
        assert!(keys.signer().public_key(&old.key_id()).await.is_err());
    }
}
