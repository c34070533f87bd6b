//! Server-side metadata storage.
//!
//! Each GUN maps role names to versioned blobs. `apply` is the only write
//! path: it takes a whole update set and commits it atomically, enforcing
//! version monotonicity under the store's write lock. The losing side of
//! a racing publish observes `Conflict`.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;

use provenant_tuf::data::RoleName;
use provenant_tuf::error::{Result, TufError};

/// One accepted role blob, with the version parsed out of its body.
#[derive(Debug, Clone)]
pub struct MetaUpdate {
    pub role: RoleName,
    pub version: u64,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait ServerStorage: Send + Sync {
    /// Current version and bytes for `role`, if any.
    async fn current(&self, gun: &str, role: RoleName) -> Result<Option<(u64, Vec<u8>)>>;

    /// Commit the update set atomically. For a role with stored state the
    /// new version must be exactly one greater; for a fresh role any
    /// version `>= 1` is admitted (a publisher may have iterated locally
    /// before its first publish).
    async fn apply(&self, gun: &str, updates: &[MetaUpdate]) -> Result<()>;

    /// GUNs with any stored metadata.
    async fn guns(&self) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<HashMap<String, HashMap<RoleName, (u64, Vec<u8>)>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerStorage for MemoryBackend {
    async fn current(&self, gun: &str, role: RoleName) -> Result<Option<(u64, Vec<u8>)>> {
        Ok(self.inner.read().get(gun).and_then(|roles| roles.get(&role)).cloned())
    }

    async fn apply(&self, gun: &str, updates: &[MetaUpdate]) -> Result<()> {
        let mut inner = self.inner.write();
        let roles = inner.entry(gun.to_string()).or_default();

        // Validate every version before touching anything, so a reject
        // leaves no partial state.
        for update in updates {
            match roles.get(&update.role) {
                Some((stored, _)) if update.version != stored + 1 => {
                    return Err(TufError::Conflict { role: update.role });
                }
                None if update.version < 1 => {
                    return Err(TufError::Conflict { role: update.role });
                }
                _ => {}
            }
        }
        for update in updates {
            roles.insert(update.role, (update.version, update.data.clone()));
        }
        Ok(())
    }

    async fn guns(&self) -> Result<Vec<String>> {
        let mut guns: Vec<String> = self.inner.read().keys().cloned().collect();
        guns.sort();
        Ok(guns)
    }
}

/// Disk-backed storage: one JSON document per GUN holding every role,
/// committed with a temp-file rename so an update set lands entirely or
/// not at all. A process-wide lock serializes commits; reads go straight
/// to disk.
pub struct FileBackend {
    dir: PathBuf,
    write_lock: parking_lot::Mutex<()>,
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct GunDocument {
    roles: HashMap<RoleName, StoredRole>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct StoredRole {
    version: u64,
    #[serde(with = "blob_base64")]
    data: Vec<u8>,
}

mod blob_base64 {
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

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileBackend { dir, write_lock: parking_lot::Mutex::new(()) })
    }

    fn gun_path(&self, gun: &str) -> PathBuf {
        self.dir.join(gun).join("trust.json")
    }

    fn load(&self, gun: &str) -> Result<GunDocument> {
        let path = self.gun_path(gun);
        if !path.exists() {
            return Ok(GunDocument::default());
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn commit(&self, gun: &str, document: &GunDocument) -> Result<()> {
        let path = self.gun_path(gun);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(document)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[async_trait]
impl ServerStorage for FileBackend {
    async fn current(&self, gun: &str, role: RoleName) -> Result<Option<(u64, Vec<u8>)>> {
        let document = self.load(gun)?;
        Ok(document.roles.get(&role).map(|stored| (stored.version, stored.data.clone())))
    }

    async fn apply(&self, gun: &str, updates: &[MetaUpdate]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut document = self.load(gun)?;
        for update in updates {
            match document.roles.get(&update.role) {
                Some(stored) if update.version != stored.version + 1 => {
                    return Err(TufError::Conflict { role: update.role });
                }
                None if update.version < 1 => {
                    return Err(TufError::Conflict { role: update.role });
                }
                _ => {}
            }
        }
        for update in updates {
            document
                .roles
                .insert(update.role, StoredRole { version: update.version, data: update.data.clone() });
        }
        self.commit(gun, &document)
    }

    async fn guns(&self) -> Result<Vec<String>> {
        let mut guns = Vec::new();
        let mut pending = vec![self.dir.clone()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.file_name().map(|n| n == "trust.json").unwrap_or(false) {
                    if let Some(parent) = path.parent() {
                        if let Ok(gun) = parent.strip_prefix(&self.dir) {
                            guns.push(gun.to_string_lossy().replace('\\', "/"));
                        }
                    }
                }
            }
        }
        guns.sort();
        Ok(guns)
    }
}
