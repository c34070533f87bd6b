//! In-memory data model for the four canonical TUF roles.

mod keys;
mod roles;

pub use keys::{KeyAlgorithm, PublicKey, SigMethod, Signature};
pub use roles::{
    default_expires, root_near_expiry_window, DelegatedRole, Delegations, FileMeta, HexBytes,
    Root, RootBody, RootRole, Snapshot, SnapshotBody, Targets, TargetsBody, Timestamp,
    TimestampBody,
};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::canonical::to_canonical_json;
use crate::error::{Result, TufError};

/// The four canonical role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleName {
    Root,
    Targets,
    Snapshot,
    Timestamp,
}

impl RoleName {
    pub fn all() -> [RoleName; 4] {
        [RoleName::Root, RoleName::Targets, RoleName::Snapshot, RoleName::Timestamp]
    }

    /// The `_type` tag the role's body must carry.
    pub fn body_type(&self) -> &'static str {
        match self {
            RoleName::Root => "Root",
            RoleName::Targets => "Targets",
            RoleName::Snapshot => "Snapshot",
            RoleName::Timestamp => "Timestamp",
        }
    }
}

impl fmt::Display for RoleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleName::Root => "root",
            RoleName::Targets => "targets",
            RoleName::Snapshot => "snapshot",
            RoleName::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

impl FromStr for RoleName {
    type Err = TufError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "root" => Ok(RoleName::Root),
            "targets" => Ok(RoleName::Targets),
            "snapshot" => Ok(RoleName::Snapshot),
            "timestamp" => Ok(RoleName::Timestamp),
            other => Err(TufError::InvalidOperation { msg: format!("unknown role: {}", other) }),
        }
    }
}

/// The wire envelope: a signed body plus the signatures over its canonical
/// encoding.
///
/// The body is held as a parsed `Value`; canonicalization is deterministic,
/// so re-encoding a parsed body reproduces the exact byte sequence the
/// signatures cover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signed {
    pub signed: serde_json::Value,
    pub signatures: Vec<Signature>,
}

impl Signed {
    /// The canonical bytes signatures are computed over.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        to_canonical_json(&self.signed)
    }

    /// Canonical bytes of the whole envelope, as stored and transported.
    pub fn envelope_bytes(&self) -> Result<Vec<u8>> {
        to_canonical_json(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
