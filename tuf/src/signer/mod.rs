//! The signing capability.
//!
//! Everything that needs a signature goes through the [`Signer`] trait.
//! There is deliberately no operation to read private key material: local
//! and remote signers are interchangeable, and a remote signer physically
//! cannot produce it. Callers that used to expect a private-key accessor
//! get [`crate::error::TufError::PrivateInaccessible`].

mod local;
mod memory;

pub use local::{LocalSigner, PassphraseRetriever, StaticPassphrase};
pub use memory::MemorySigner;

use std::time::Duration;

use async_trait::async_trait;

use crate::data::{KeyAlgorithm, PublicKey, RoleName, Signature};
use crate::error::Result;

/// Default deadline for blocking signer calls.
pub const SIGNER_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for establishing a signer connection.
pub const SIGNER_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Health report from a signer backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerHealth {
    Ok,
    Unhealthy(String),
    Unreachable(String),
}

/// A service that produces signatures for key ids it holds.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `message` with the key identified by `key_id`.
    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature>;

    /// The public half of `key_id`.
    async fn public_key(&self, key_id: &str) -> Result<PublicKey>;

    /// Create key material for `role`, returning only the public half.
    async fn generate(&self, role: RoleName, algorithm: KeyAlgorithm)
        -> Result<(String, PublicKey)>;

    /// Delete the key. Removing an unknown key id is an error.
    async fn remove(&self, key_id: &str) -> Result<()>;

    /// All key ids this signer holds.
    async fn list(&self) -> Result<Vec<String>>;

    /// Probe the backend within `timeout`.
    async fn health(&self, timeout: Duration) -> SignerHealth;
}
