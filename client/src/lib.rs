//! Provenant client: publisher and consumer of trusted collections.
//!
//! The [`collection::TrustedCollection`] handle owns the on-disk trust
//! layout and drives init / stage / publish on the publishing side and
//! bootstrap / lookup / verify on the consuming side. Bootstrap logic
//! lives in [`bootstrap`] and is shared by the library API and the CLI.

pub mod bootstrap;
pub mod collection;
pub mod passphrase;

pub use collection::TrustedCollection;
pub use passphrase::EnvPassphrase;
