use thiserror::Error;

use crate::data::RoleName;

/// Error type shared across the trust pipeline.
///
/// Verification failures (`InsufficientSignatures`, `Expired`, `Rollback`,
/// `WrongType` and the rotation-gate variants) are terminal: callers must
/// never retry them or fall back to stale data. Transport failures may fall
/// back to a cache, but only when the cached data still validates against a
/// pinned root.
#[derive(Error, Debug)]
pub enum TufError {
    // Role-blob structural/signature failures.
    #[error("could not validate root: {0}")]
    BadRoot(String),

    #[error("could not validate targets: {0}")]
    BadTargets(String),

    #[error("could not validate snapshot: {0}")]
    BadSnapshot(String),

    // Verification failures.
    #[error("valid signatures did not meet threshold for {role}")]
    InsufficientSignatures { role: RoleName },

    #[error("{role} metadata expired at {expires}")]
    Expired { role: RoleName, expires: String },

    #[error("{role} version {new} is older than current version {current}")]
    Rollback { role: RoleName, new: u64, current: u64 },

    #[error("metadata for {role} declared wrong type: {actual}")]
    WrongType { role: RoleName, actual: String },

    // Root-rotation gate failures.
    #[error("rotation detected and new root was not signed with at least {threshold} old keys")]
    RotationUnsigned { threshold: u32 },

    #[error("none of the timestamp keys in the new root are held by the server")]
    OrphanedTimestampKey,

    #[error("no snapshot was included in update and server does not hold current snapshot key")]
    InvalidHierarchy,

    // Server write race.
    #[error("update conflict: a newer version of {role} was already committed")]
    Conflict { role: RoleName },

    // Remote lookups.
    #[error("no trust data for repository {0}")]
    RepositoryNotFound(String),

    #[error("metadata for {0} not found on remote")]
    MetaNotFound(String),

    #[error("remote served more bytes than declared for {0}")]
    Malicious(String),

    // Transport.
    #[error("no remote transport configured; operating offline")]
    Offline,

    #[error("request deadline exceeded: {0}")]
    Timeout(String),

    #[error("trust server unavailable: HTTP {code}")]
    ServerUnavailable { code: u16 },

    #[error("trust server rejected operation: {msg}")]
    InvalidOperation { msg: String },

    // Signer.
    #[error("signer does not know key {0}")]
    UnknownKey(String),

    #[error("signing service unavailable: {0}")]
    SignerUnavailable(String),

    #[error("signing service returned a signature that does not verify for key {0}")]
    SignerMisbehaving(String),

    #[error("private key material is not accessible through this signer")]
    PrivateInaccessible,

    // Local preconditions.
    #[error("repository has not been initialized")]
    RepoNotInitialized,

    #[error("no signing keys available for role {role}")]
    InsufficientKeys { role: RoleName },

    #[error("passphrase could not decrypt key {0}")]
    PassphraseInvalid(String),

    // Encoding and lookup.
    #[error("canonical encoding failed: {0}")]
    Encode(String),

    #[error("no trust data for {0}")]
    NotFound(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TufError {
    /// Whether this error came out of signature/consistency verification.
    /// Such errors must never be retried or satisfied from a cache.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            TufError::BadRoot(_)
                | TufError::BadTargets(_)
                | TufError::BadSnapshot(_)
                | TufError::InsufficientSignatures { .. }
                | TufError::Expired { .. }
                | TufError::Rollback { .. }
                | TufError::WrongType { .. }
                | TufError::RotationUnsigned { .. }
                | TufError::OrphanedTimestampKey
                | TufError::InvalidHierarchy
                | TufError::Malicious(_)
                | TufError::SignerMisbehaving(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TufError>;
