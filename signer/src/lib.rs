//! Remote signing for Provenant.
//!
//! Three pieces: the JSON wire [`protocol`], the [`client::RemoteSigner`]
//! that speaks it (and re-verifies everything the service returns), and
//! the embedded [`service`] that exposes any local `Signer` backend over
//! the same protocol.

pub mod client;
pub mod protocol;
pub mod service;

pub use client::{RemoteSigner, SignerTlsConfig};
pub use service::build_router;
