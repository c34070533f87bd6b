//! Provenant trust server.
//!
//! Validates proposed metadata updates (rotation gates, thresholds,
//! snapshot consistency), generates snapshots for publishers that
//! delegated the role, mints timestamps on demand, and persists accepted
//! bundles atomically per GUN.

pub mod app;
pub mod keys;
pub mod storage;
pub mod timestamp;
pub mod validation;

pub use app::build_router;
pub use keys::KeyService;
pub use storage::{FileBackend, MemoryBackend, MetaUpdate, ServerStorage};
