//! Role metadata bodies and their signed wrappers.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::{sha256, sha512, to_canonical_json};
use crate::data::{PublicKey, RoleName, Signature, Signed};
use crate::error::{Result, TufError};

/// Window before root expiry inside which publish re-signs root.
pub fn root_near_expiry_window() -> Duration {
    Duration::weeks(26)
}

/// Default expiry for freshly signed metadata, per role.
pub fn default_expires(role: RoleName) -> DateTime<Utc> {
    let days = match role {
        RoleName::Root => 3650,
        RoleName::Targets => 1095,
        RoleName::Snapshot => 1095,
        RoleName::Timestamp => 14,
    };
    Utc::now() + Duration::days(days)
}

/// Length and digests of a metadata or target blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub length: u64,
    pub hashes: BTreeMap<String, HexBytes>,
}

/// Byte strings hex-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexBytes(#[serde(with = "hex::serde")] pub Vec<u8>);

impl FileMeta {
    /// Compute length, sha256 and sha512 of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert("sha256".to_string(), HexBytes(sha256(bytes).to_vec()));
        hashes.insert("sha512".to_string(), HexBytes(sha512(bytes).to_vec()));
        FileMeta { length: bytes.len() as u64, hashes }
    }

    pub fn sha256(&self) -> Option<&[u8]> {
        self.hashes.get("sha256").map(|h| h.0.as_slice())
    }

    /// Check `bytes` against the declared length and every declared hash.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        if bytes.len() as u64 != self.length {
            return false;
        }
        if self.hashes.is_empty() {
            return false;
        }
        self.hashes.iter().all(|(algo, digest)| match algo.as_str() {
            "sha256" => sha256(bytes).as_slice() == digest.0,
            "sha512" => sha512(bytes).as_slice() == digest.0,
            // Unknown algorithms cannot be confirmed; treat as mismatch.
            _ => false,
        })
    }
}

/// A role entry inside root: the key ids that may sign and how many must.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRole {
    #[serde(rename = "keyids")]
    pub key_ids: Vec<String>,
    pub threshold: u32,
}

/// Delegation hooks carried in targets metadata.
///
/// Resolution beyond the top-level targets role is not implemented; the
/// structure exists so metadata from implementations that do delegate can
/// be parsed and re-encoded without loss.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegations {
    pub keys: BTreeMap<String, PublicKey>,
    pub roles: Vec<DelegatedRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedRole {
    pub name: String,
    #[serde(rename = "keyids")]
    pub key_ids: Vec<String>,
    pub threshold: u32,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootBody {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub keys: BTreeMap<String, PublicKey>,
    pub roles: BTreeMap<RoleName, RootRole>,
    pub consistent_snapshot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetsBody {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, FileMeta>,
    #[serde(default)]
    pub delegations: Delegations,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotBody {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, FileMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampBody {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub meta: BTreeMap<String, FileMeta>,
}

macro_rules! signed_wrapper {
    ($wrapper:ident, $body:ty, $role:expr) => {
        /// Parsed body plus the signatures that covered its canonical bytes,
        /// and a dirty flag tracking unsigned local edits.
        #[derive(Debug, Clone)]
        pub struct $wrapper {
            pub signed: $body,
            pub signatures: Vec<Signature>,
            pub dirty: bool,
        }

        impl $wrapper {
            pub fn from_signed(s: &Signed) -> Result<Self> {
                let body: $body = serde_json::from_value(s.signed.clone())?;
                if body.type_ != $role.body_type() {
                    return Err(TufError::WrongType { role: $role, actual: body.type_.clone() });
                }
                Ok(Self { signed: body, signatures: s.signatures.clone(), dirty: false })
            }

            pub fn to_signed(&self) -> Result<Signed> {
                Ok(Signed {
                    signed: serde_json::to_value(&self.signed)
                        .map_err(|e| TufError::Encode(e.to_string()))?,
                    signatures: self.signatures.clone(),
                })
            }

            /// Canonical bytes of the body alone (the signature pre-image).
            pub fn canonical_body(&self) -> Result<Vec<u8>> {
                to_canonical_json(&self.signed)
            }
        }
    };
}

signed_wrapper!(Root, RootBody, RoleName::Root);
signed_wrapper!(Targets, TargetsBody, RoleName::Targets);
signed_wrapper!(Snapshot, SnapshotBody, RoleName::Snapshot);
signed_wrapper!(Timestamp, TimestampBody, RoleName::Timestamp);

impl Root {
    /// Build a version-1 root over the given per-role key sets.
    pub fn build(
        role_keys: &BTreeMap<RoleName, Vec<PublicKey>>,
        consistent_snapshot: bool,
    ) -> Result<Self> {
        let mut keys = BTreeMap::new();
        let mut roles = BTreeMap::new();
        for role in RoleName::all() {
            let role_set = role_keys
                .get(&role)
                .filter(|ks| !ks.is_empty())
                .ok_or(TufError::InsufficientKeys { role })?;
            let mut key_ids = Vec::with_capacity(role_set.len());
            for key in role_set {
                let id = key.key_id();
                keys.insert(id.clone(), key.clone());
                key_ids.push(id);
            }
            roles.insert(role, RootRole { key_ids, threshold: 1 });
        }
        Ok(Root {
            signed: RootBody {
                type_: RoleName::Root.body_type().to_string(),
                version: 1,
                expires: default_expires(RoleName::Root),
                keys,
                roles,
                consistent_snapshot,
            },
            signatures: vec![],
            dirty: false,
        })
    }

    /// Whether root should be re-signed at publish time.
    pub fn near_expiry(&self) -> bool {
        self.signed.expires < Utc::now() + root_near_expiry_window()
    }

    /// The keys bound to `role` by this root, keyed by key id.
    pub fn keys_for_role(&self, role: RoleName) -> BTreeMap<String, PublicKey> {
        let mut out = BTreeMap::new();
        if let Some(entry) = self.signed.roles.get(&role) {
            for kid in &entry.key_ids {
                // Key ids without a matching key entry could never have
                // produced a checkable signature; skip them.
                if let Some(key) = self.signed.keys.get(kid) {
                    out.insert(kid.clone(), key.clone());
                }
            }
        }
        out
    }
}

impl Targets {
    pub fn empty() -> Self {
        Targets {
            signed: TargetsBody {
                type_: RoleName::Targets.body_type().to_string(),
                version: 0,
                expires: default_expires(RoleName::Targets),
                targets: BTreeMap::new(),
                delegations: Delegations::default(),
            },
            signatures: vec![],
            dirty: true,
        }
    }
}

impl Snapshot {
    /// Snapshot seeded with meta entries for the given role blobs.
    pub fn build(entries: &[(RoleName, &[u8])]) -> Self {
        let mut meta = BTreeMap::new();
        for (role, bytes) in entries {
            meta.insert(role.to_string(), FileMeta::from_bytes(bytes));
        }
        Snapshot {
            signed: SnapshotBody {
                type_: RoleName::Snapshot.body_type().to_string(),
                version: 0,
                expires: default_expires(RoleName::Snapshot),
                meta,
            },
            signatures: vec![],
            dirty: true,
        }
    }
}

impl Timestamp {
    /// Timestamp pointing at the given snapshot bytes.
    pub fn build(snapshot_bytes: &[u8]) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert(RoleName::Snapshot.to_string(), FileMeta::from_bytes(snapshot_bytes));
        Timestamp {
            signed: TimestampBody {
                type_: RoleName::Timestamp.body_type().to_string(),
                version: 0,
                expires: default_expires(RoleName::Timestamp),
                meta,
            },
            signatures: vec![],
            dirty: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::KeyAlgorithm;

    fn key(n: u8) -> PublicKey {
        PublicKey::new(KeyAlgorithm::Ed25519, vec![n; 32])
    }

    fn all_role_keys() -> BTreeMap<RoleName, Vec<PublicKey>> {
        RoleName::all().iter().enumerate().map(|(i, r)| (*r, vec![key(i as u8 + 1)])).collect()
    }

    #[test]
    fn file_meta_matches_bytes() {
        let meta = FileMeta::from_bytes(b"hello");
        assert_eq!(meta.length, 5);
        assert_eq!(
            hex::encode(meta.sha256().unwrap()),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(meta.matches(b"hello"));
        assert!(!meta.matches(b"hell"));
        assert!(!meta.matches(b"jello"));
    }

    #[test]
    fn file_meta_with_unknown_hash_never_matches() {
        let mut meta = FileMeta::from_bytes(b"data");
        meta.hashes.insert("md5".to_string(), HexBytes(vec![0u8; 16]));
        assert!(!meta.matches(b"data"));
    }

    #[test]
    fn root_build_requires_all_roles() {
        let mut role_keys = all_role_keys();
        role_keys.remove(&RoleName::Snapshot);
        let err = Root::build(&role_keys, false).unwrap_err();
        assert!(matches!(err, TufError::InsufficientKeys { role: RoleName::Snapshot }));
    }

    #[test]
    fn root_build_registers_all_keys() {
        let root = Root::build(&all_role_keys(), true).unwrap();
        assert_eq!(root.signed.version, 1);
        assert_eq!(root.signed.keys.len(), 4);
        assert!(root.signed.consistent_snapshot);
        for role in RoleName::all() {
            let entry = &root.signed.roles[&role];
            assert_eq!(entry.threshold, 1);
            assert!(entry.key_ids.iter().all(|k| root.signed.keys.contains_key(k)));
        }
    }

    #[test]
    fn keys_for_role_skips_dangling_ids() {
        let mut root = Root::build(&all_role_keys(), false).unwrap();
        root.signed
            .roles
            .get_mut(&RoleName::Targets)
            .unwrap()
            .key_ids
            .push("not-a-real-key-id".to_string());
        let keys = root.keys_for_role(RoleName::Targets);
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn wrapper_round_trips_through_signed() {
        let root = Root::build(&all_role_keys(), false).unwrap();
        let signed = root.to_signed().unwrap();
        let parsed = Root::from_signed(&signed).unwrap();
        assert_eq!(parsed.signed, root.signed);
        assert_eq!(parsed.canonical_body().unwrap(), root.canonical_body().unwrap());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let root = Root::build(&all_role_keys(), false).unwrap();
        let signed = root.to_signed().unwrap();
        let err = Snapshot::from_signed(&signed).unwrap_err();
        assert!(matches!(err, TufError::WrongType { role: RoleName::Snapshot, .. }));
    }

    #[test]
    fn snapshot_build_seeds_meta() {
        let snap = Snapshot::build(&[(RoleName::Root, b"root-bytes"), (RoleName::Targets, b"t")]);
        assert_eq!(snap.signed.meta.len(), 2);
        assert!(snap.signed.meta["root"].matches(b"root-bytes"));
        assert!(snap.signed.meta["targets"].matches(b"t"));
    }

    #[test]
    fn timestamp_build_points_at_snapshot() {
        let ts = Timestamp::build(b"snapshot-bytes");
        assert!(ts.signed.meta["snapshot"].matches(b"snapshot-bytes"));
    }
}
