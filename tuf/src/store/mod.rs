//! Metadata transport and cache contracts.
//!
//! A store holds role blobs addressed by role name for one GUN. The same
//! contract covers the remote HTTP transport, the on-disk client cache and
//! the in-memory store used by tests and the server.

mod filesystem;
mod http;
mod memory;

pub use filesystem::FilesystemStore;
pub use http::{HttpStore, HttpStoreConfig};
pub use memory::MemoryStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::data::{PublicKey, RoleName, Signed};
use crate::error::Result;

/// Hard cap on any metadata download. There is no "infinite" sentinel:
/// callers that do not know a tighter role-specific bound use this.
pub const MAX_DOWNLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Cap for root metadata fetched before any size is known.
pub const MAX_ROOT_BYTES: u64 = 5 * 1024 * 1024;

/// Cap for timestamp metadata, which is always small.
pub const MAX_TIMESTAMP_BYTES: u64 = 1024 * 1024;

/// Error payload carried inside the HTTP error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

/// Fetch/store role blobs for a single GUN.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch the blob for `role`, reading at most `max_size` bytes.
    /// A store that would serve more than `max_size` fails with
    /// `Malicious` rather than truncating.
    async fn get_meta(&self, role: RoleName, max_size: u64) -> Result<Vec<u8>>;

    /// Store a single role blob.
    async fn set_meta(&self, role: RoleName, bytes: Vec<u8>) -> Result<()>;

    /// Store several role blobs in one atomic operation: all are accepted
    /// or none are.
    async fn set_multi(&self, updates: BTreeMap<RoleName, Vec<u8>>) -> Result<()>;

    /// Fetch the current public key for `role` (server-managed roles).
    async fn get_key(&self, role: RoleName) -> Result<PublicKey>;

    /// Ask the store to rotate `role`'s key. The request body is a
    /// short-lived root-signed statement proving rotation capability.
    async fn rotate_key(&self, role: RoleName, request: Signed) -> Result<PublicKey>;

    /// Drop all metadata for the GUN. Remote stores reject this.
    async fn remove_all(&self) -> Result<()>;
}
