//! Append-only staged edits, replayed onto metadata at publish time.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::data::{FileMeta, PublicKey, RoleName};
use crate::error::{Result, TufError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Targets,
    Root,
}

/// One staged edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub action: Action,
    pub scope: Scope,
    #[serde(rename = "type")]
    pub content_type: String,
    pub path: String,
    pub content: serde_json::Value,
}

impl Change {
    /// Stage adding `meta` as target `name`.
    pub fn add_target(name: &str, meta: &FileMeta) -> Result<Change> {
        Ok(Change {
            action: Action::Create,
            scope: Scope::Targets,
            content_type: "target".to_string(),
            path: name.to_string(),
            content: serde_json::to_value(meta).map_err(|e| TufError::Encode(e.to_string()))?,
        })
    }

    /// Stage removing target `name`.
    pub fn remove_target(name: &str) -> Change {
        Change {
            action: Action::Delete,
            scope: Scope::Targets,
            content_type: "target".to_string(),
            path: name.to_string(),
            content: serde_json::Value::Null,
        }
    }

    /// Stage replacing the keys of a base role in root.
    pub fn rotate_role_keys(role: RoleName, keys: &[PublicKey]) -> Result<Change> {
        Ok(Change {
            action: Action::Create,
            scope: Scope::Root,
            content_type: "role".to_string(),
            path: role.to_string(),
            content: serde_json::to_value(RoleKeyChange { role, keys: keys.to_vec() })
                .map_err(|e| TufError::Encode(e.to_string()))?,
        })
    }
}

/// Content payload of a root-scoped role key change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleKeyChange {
    pub role: RoleName,
    pub keys: Vec<PublicKey>,
}

/// Staged-edit storage. Order of `list` must be insertion order.
pub trait Changelist: Send + Sync {
    fn add(&self, change: Change) -> Result<()>;
    fn list(&self) -> Result<Vec<Change>>;
    fn clear(&self) -> Result<()>;
}

/// In-process changelist.
#[derive(Default)]
pub struct MemoryChangelist {
    changes: parking_lot::Mutex<Vec<Change>>,
}

impl MemoryChangelist {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Changelist for MemoryChangelist {
    fn add(&self, change: Change) -> Result<()> {
        let mut changes = self.changes.lock();
        // Identical re-stage of the same edit is a no-op.
        if changes.last() != Some(&change) {
            changes.push(change);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<Change>> {
        Ok(self.changes.lock().clone())
    }

    fn clear(&self) -> Result<()> {
        self.changes.lock().clear();
        Ok(())
    }
}

/// Changelist persisted as one JSON file per change.
///
/// Files are named `<nanos>_<uuid>.change` and replayed in sorted filename
/// order, which is insertion order for a single writer.
pub struct FileChangelist {
    dir: PathBuf,
}

impl FileChangelist {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(FileChangelist { dir })
    }

    fn entries(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "change").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl Changelist for FileChangelist {
    fn add(&self, change: Change) -> Result<()> {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let name = format!("{:020}_{}.change", nanos, uuid::Uuid::new_v4());
        let tmp = self.dir.join(format!(".{}", name));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&change)?)?;
        std::fs::rename(&tmp, self.dir.join(name))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<Change>> {
        let mut changes = Vec::new();
        for path in self.entries()? {
            let bytes = std::fs::read(&path)?;
            changes.push(serde_json::from_slice(&bytes)?);
        }
        Ok(changes)
    }

    fn clear(&self) -> Result<()> {
        for path in self.entries()? {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
