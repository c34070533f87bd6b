//! In-memory metadata store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::data::{PublicKey, RoleName, Signed};
use crate::error::{Result, TufError};
use crate::store::MetadataStore;

#[derive(Default)]
pub struct MemoryStore {
    meta: RwLock<BTreeMap<RoleName, Vec<u8>>>,
    keys: RwLock<BTreeMap<RoleName, PublicKey>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the key served for `role`.
    pub fn set_key(&self, role: RoleName, key: PublicKey) {
        self.keys.write().insert(role, key);
    }

    pub fn roles(&self) -> Vec<RoleName> {
        self.meta.read().keys().copied().collect()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_meta(&self, role: RoleName, max_size: u64) -> Result<Vec<u8>> {
        let meta = self.meta.read();
        let bytes = meta
            .get(&role)
            .ok_or_else(|| TufError::MetaNotFound(role.to_string()))?;
        if bytes.len() as u64 > max_size {
            return Err(TufError::Malicious(role.to_string()));
        }
        Ok(bytes.clone())
    }

    async fn set_meta(&self, role: RoleName, bytes: Vec<u8>) -> Result<()> {
        self.meta.write().insert(role, bytes);
        Ok(())
    }

    async fn set_multi(&self, updates: BTreeMap<RoleName, Vec<u8>>) -> Result<()> {
        let mut meta = self.meta.write();
        for (role, bytes) in updates {
            meta.insert(role, bytes);
        }
        Ok(())
    }

    async fn get_key(&self, role: RoleName) -> Result<PublicKey> {
        self.keys
            .read()
            .get(&role)
            .cloned()
            .ok_or_else(|| TufError::MetaNotFound(format!("{} key", role)))
    }

    async fn rotate_key(&self, role: RoleName, _request: Signed) -> Result<PublicKey> {
        Err(TufError::InvalidOperation { msg: format!("cannot rotate {} key in memory store", role) })
    }

    async fn remove_all(&self) -> Result<()> {
        self.meta.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_set_round_trip() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_meta(RoleName::Root, 1024).await.unwrap_err(),
            TufError::MetaNotFound(_)
        ));
        store.set_meta(RoleName::Root, b"root".to_vec()).await.unwrap();
        assert_eq!(store.get_meta(RoleName::Root, 1024).await.unwrap(), b"root");
    }

    #[tokio::test]
    async fn size_cap_is_enforced() {
        let store = MemoryStore::new();
        store.set_meta(RoleName::Targets, vec![0u8; 100]).await.unwrap();
        assert!(matches!(
            store.get_meta(RoleName::Targets, 99).await.unwrap_err(),
            TufError::Malicious(_)
        ));
        assert!(store.get_meta(RoleName::Targets, 100).await.is_ok());
    }

    #[tokio::test]
    async fn multi_set_stores_all() {
        let store = MemoryStore::new();
        let mut updates = BTreeMap::new();
        updates.insert(RoleName::Root, b"r".to_vec());
        updates.insert(RoleName::Targets, b"t".to_vec());
        store.set_multi(updates).await.unwrap();
        assert_eq!(store.roles().len(), 2);
    }
}
