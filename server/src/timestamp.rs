//! Timestamp metadata is minted by the server.
//!
//! Publishers never hold timestamp keys. On every fetch the server checks
//! whether the stored timestamp is still fresh and still points at the
//! current snapshot; if not, it signs a new one with the GUN's
//! server-held timestamp key and persists it.

use chrono::Utc;
use tracing::debug;

use provenant_tuf::data::{default_expires, RoleName, Signed, Timestamp};
use provenant_tuf::error::{Result, TufError};

use crate::keys::KeyService;
use crate::storage::{MetaUpdate, ServerStorage};

/// Serve the current timestamp for `gun`, regenerating it when stale.
pub async fn current_timestamp(
    gun: &str,
    storage: &dyn ServerStorage,
    keys: &KeyService,
) -> Result<Vec<u8>> {
    let Some((_, snapshot_bytes)) = storage.current(gun, RoleName::Snapshot).await? else {
        return Err(TufError::MetaNotFound(format!("snapshot for {}", gun)));
    };

    let stored = storage.current(gun, RoleName::Timestamp).await?;
    if let Some((_, ts_bytes)) = &stored {
        if let Ok(ts) = Signed::from_bytes(ts_bytes).and_then(|s| Timestamp::from_signed(&s)) {
            let fresh = ts.signed.expires > Utc::now();
            let current = ts
                .signed
                .meta
                .get(&RoleName::Snapshot.to_string())
                .map(|meta| meta.matches(&snapshot_bytes))
                .unwrap_or(false);
            if fresh && current {
                return Ok(ts_bytes.clone());
            }
        }
    }

    // Stale, missing or pointing at an old snapshot: sign a new one.
    let key = keys.get_or_create(gun, RoleName::Timestamp).await?;
    let key_id = keys
        .key_id(gun, RoleName::Timestamp)
        .ok_or_else(|| TufError::MetaNotFound(format!("timestamp key for {}", gun)))?;
    debug_assert_eq!(key.key_id(), key_id);

    let mut timestamp = Timestamp::build(&snapshot_bytes);
    timestamp.signed.version = stored.as_ref().map(|(v, _)| v + 1).unwrap_or(1);
    timestamp.signed.expires = default_expires(RoleName::Timestamp);
    timestamp.dirty = false;

    let body = timestamp.canonical_body()?;
    let signature = keys.signer().sign(&key_id, &body).await?;
    timestamp.signatures = vec![signature];

    let bytes = timestamp.to_signed()?.envelope_bytes()?;
    storage
        .apply(
            gun,
            &[MetaUpdate {
                role: RoleName::Timestamp,
                version: timestamp.signed.version,
                data: bytes.clone(),
            }],
        )
        .await?;
    debug!(gun, version = timestamp.signed.version, "signed fresh timestamp");
    Ok(bytes)
}
