//! Key records: which key id signs which role for which GUN.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::{KeyAlgorithm, PublicKey, RoleName};
use crate::error::{Result, TufError};
use crate::signer::Signer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    pub role: RoleName,
    pub gun: String,
    /// Identifier of the backing key inside a remote signing service, when
    /// the key does not live locally.
    pub remote_id: Option<String>,
}

/// Maps key ids to their records, backed by a signer for key creation.
///
/// Reads go through an in-memory cache that only grows; records are added
/// lazily as callers register or generate keys. Writes take the writer
/// lock, reads proceed in parallel.
pub struct KeyStore {
    signer: Arc<dyn Signer>,
    records: RwLock<HashMap<String, KeyRecord>>,
}

impl KeyStore {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        KeyStore { signer, records: RwLock::new(HashMap::new()) }
    }

    pub fn signer(&self) -> &Arc<dyn Signer> {
        &self.signer
    }

    /// Register a record for an existing key. Idempotent by key id: a
    /// second registration of the same id leaves the first record in place.
    pub fn add_key(&self, key_id: &str, record: KeyRecord) {
        self.records.write().entry(key_id.to_string()).or_insert(record);
    }

    /// Bulk-populate records, e.g. from scanning a key directory.
    pub fn hydrate<I: IntoIterator<Item = (String, KeyRecord)>>(&self, entries: I) {
        let mut records = self.records.write();
        for (key_id, record) in entries {
            records.entry(key_id).or_insert(record);
        }
    }

    /// Create key material through the signer and record it.
    ///
    /// Only root and targets keys are created at this layer; snapshot and
    /// timestamp keys are provisioned by the server side.
    pub async fn generate_key(
        &self,
        role: RoleName,
        gun: &str,
        algorithm: KeyAlgorithm,
    ) -> Result<(String, PublicKey)> {
        if !matches!(role, RoleName::Root | RoleName::Targets) {
            return Err(TufError::InvalidOperation {
                msg: format!("cannot generate local key for role {}", role),
            });
        }
        let (key_id, public) = self.signer.generate(role, algorithm).await?;
        self.add_key(&key_id, KeyRecord { role, gun: gun.to_string(), remote_id: None });
        Ok((key_id, public))
    }

    pub fn record(&self, key_id: &str) -> Result<KeyRecord> {
        self.records
            .read()
            .get(key_id)
            .cloned()
            .ok_or_else(|| TufError::UnknownKey(key_id.to_string()))
    }

    /// Key ids recorded for `role` under `gun`, sorted for determinism.
    pub fn keys_for_role(&self, gun: &str, role: RoleName) -> Vec<String> {
        let records = self.records.read();
        let mut ids: Vec<String> = records
            .iter()
            .filter(|(_, r)| r.role == role && r.gun == gun)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn remove(&self, key_id: &str) -> Result<()> {
        self.signer.remove(key_id).await?;
        self.records.write().remove(key_id);
        Ok(())
    }
}
