//! Disk-backed metadata store, used as the client's local cache.
//!
//! Layout per GUN: `<base>/<gun>/metadata/<role>.json`. Writes go through
//! a temp file and rename so a crash never leaves a half-written blob.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::data::{PublicKey, RoleName, Signed};
use crate::error::{Result, TufError};
use crate::store::MetadataStore;

pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(base: impl Into<PathBuf>, gun: &str) -> Result<Self> {
        let dir = base.into().join(gun).join("metadata");
        std::fs::create_dir_all(&dir)?;
        Ok(FilesystemStore { dir })
    }

    fn path(&self, role: RoleName) -> PathBuf {
        self.dir.join(format!("{}.json", role))
    }

    fn write_atomic(&self, role: RoleName, bytes: &[u8]) -> Result<()> {
        let tmp = self.dir.join(format!(".{}.tmp", role));
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, self.path(role))?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FilesystemStore {
    async fn get_meta(&self, role: RoleName, max_size: u64) -> Result<Vec<u8>> {
        let path = self.path(role);
        if !path.exists() {
            return Err(TufError::MetaNotFound(role.to_string()));
        }
        let bytes = std::fs::read(&path)?;
        if bytes.len() as u64 > max_size {
            return Err(TufError::Malicious(role.to_string()));
        }
        Ok(bytes)
    }

    async fn set_meta(&self, role: RoleName, bytes: Vec<u8>) -> Result<()> {
        self.write_atomic(role, &bytes)
    }

    async fn set_multi(&self, updates: BTreeMap<RoleName, Vec<u8>>) -> Result<()> {
        for (role, bytes) in updates {
            self.write_atomic(role, &bytes)?;
        }
        Ok(())
    }

    async fn get_key(&self, role: RoleName) -> Result<PublicKey> {
        Err(TufError::InvalidOperation { msg: format!("{} key is not served from cache", role) })
    }

    async fn rotate_key(&self, role: RoleName, _request: Signed) -> Result<PublicKey> {
        Err(TufError::InvalidOperation { msg: format!("cannot rotate {} key in cache", role) })
    }

    async fn remove_all(&self) -> Result<()> {
        for role in RoleName::all() {
            let path = self.path(role);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path(), "example.com/app").unwrap();
        store.set_meta(RoleName::Snapshot, b"snap".to_vec()).await.unwrap();
        assert_eq!(store.get_meta(RoleName::Snapshot, 1024).await.unwrap(), b"snap");

        store.remove_all().await.unwrap();
        assert!(matches!(
            store.get_meta(RoleName::Snapshot, 1024).await.unwrap_err(),
            TufError::MetaNotFound(_)
        ));
    }

    #[tokio::test]
    async fn guns_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let a = FilesystemStore::new(dir.path(), "example.com/a").unwrap();
        let b = FilesystemStore::new(dir.path(), "example.com/b").unwrap();
        a.set_meta(RoleName::Root, b"a-root".to_vec()).await.unwrap();
        assert!(b.get_meta(RoleName::Root, 1024).await.is_err());
    }

    #[tokio::test]
    async fn oversize_cached_blob_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path(), "g").unwrap();
        store.set_meta(RoleName::Targets, vec![1u8; 64].to_vec()).await.unwrap();
        assert!(matches!(
            store.get_meta(RoleName::Targets, 10).await.unwrap_err(),
            TufError::Malicious(_)
        ));
    }
}
