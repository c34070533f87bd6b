//! Client bootstrap and update.
//!
//! One implementation serves both the library API and the CLI: pin-root
//! validation against the certificate store, then the timestamp →
//! snapshot → targets chain with size caps, hash witnessing and rollback
//! checks. Verification failures are terminal; only transport failures
//! may fall back to the local cache, and whatever comes out of the cache
//! still has to validate against the pinned root.

use chrono::Utc;
use tracing::{debug, warn};

use provenant_tuf::certstore::CertStore;
use provenant_tuf::data::{Root, RoleName, Signed, Snapshot, Targets, Timestamp};
use provenant_tuf::error::{Result, TufError};
use provenant_tuf::repo::{Repository, TOP_LEVEL_TARGETS};
use provenant_tuf::signer::Signer;
use provenant_tuf::store::{MetadataStore, MAX_DOWNLOAD_BYTES, MAX_ROOT_BYTES, MAX_TIMESTAMP_BYTES};
use provenant_tuf::verify::{verify_signed, SignedCommon};

use std::sync::Arc;

pub struct Bootstrapper<'a> {
    pub gun: &'a str,
    pub remote: Option<&'a dyn MetadataStore>,
    pub cache: &'a dyn MetadataStore,
    pub certs: &'a CertStore,
    /// Signer handle for the repository the update produces; reads never
    /// sign, so a signer without keys is fine here.
    pub signer: Arc<dyn Signer>,
}

impl Bootstrapper<'_> {
    /// Run the full update: returns a repository whose root, targets and
    /// snapshot all validated against the pinned trust anchors.
    pub async fn update(&self) -> Result<Repository> {
        let (root_signed, root, root_from_remote) = self.fetch_and_pin_root().await?;
        if root_from_remote {
            self.cache
                .set_meta(RoleName::Root, root_signed.envelope_bytes()?)
                .await
                .unwrap_or_else(|e| warn!(error = %e, "could not cache validated root"));
        }

        let mut repo = Repository::new(self.gun, self.signer.clone());
        repo.set_root(&root_signed)?;

        // Timestamp: small, fetched fresh on every update.
        let (ts_bytes, ts_remote) = self.fetch_role(RoleName::Timestamp, MAX_TIMESTAMP_BYTES).await?;
        let ts_signed = Signed::from_bytes(&ts_bytes)?;
        self.verify_role(RoleName::Timestamp, &ts_signed, &root)?;
        self.check_rollback(RoleName::Timestamp, &ts_signed).await?;
        let timestamp = Timestamp::from_signed(&ts_signed)?;

        // Snapshot: bounded and witnessed by the timestamp.
        let snapshot_entry = timestamp
            .signed
            .meta
            .get(&RoleName::Snapshot.to_string())
            .ok_or_else(|| TufError::BadSnapshot("timestamp has no snapshot entry".into()))?;
        let cap = snapshot_entry.length.min(MAX_DOWNLOAD_BYTES);
        let (snap_bytes, _) = self.fetch_role(RoleName::Snapshot, cap).await?;
        if !snapshot_entry.matches(&snap_bytes) {
            return Err(TufError::BadSnapshot(
                "snapshot does not match timestamp witness".into(),
            ));
        }
        let snap_signed = Signed::from_bytes(&snap_bytes)?;
        self.verify_role(RoleName::Snapshot, &snap_signed, &root)?;
        self.check_rollback(RoleName::Snapshot, &snap_signed).await?;
        let snapshot = Snapshot::from_signed(&snap_signed)?;

        // Targets: bounded and witnessed by the snapshot.
        let targets_entry = snapshot
            .signed
            .meta
            .get(TOP_LEVEL_TARGETS)
            .ok_or_else(|| TufError::BadSnapshot("snapshot has no targets entry".into()))?;
        let cap = targets_entry.length.min(MAX_DOWNLOAD_BYTES);
        let (targets_bytes, _) = self.fetch_role(RoleName::Targets, cap).await?;
        if !targets_entry.matches(&targets_bytes) {
            return Err(TufError::BadTargets(
                "targets do not match snapshot witness".into(),
            ));
        }
        let targets_signed = Signed::from_bytes(&targets_bytes)?;
        self.verify_role(RoleName::Targets, &targets_signed, &root)?;
        self.check_rollback(RoleName::Targets, &targets_signed).await?;
        Targets::from_signed(&targets_signed)?;

        // Everything validated: refresh the cache.
        if ts_remote {
            for (role, bytes) in [
                (RoleName::Timestamp, &ts_bytes),
                (RoleName::Snapshot, &snap_bytes),
                (RoleName::Targets, &targets_bytes),
            ] {
                self.cache
                    .set_meta(role, bytes.clone())
                    .await
                    .unwrap_or_else(|e| warn!(%role, error = %e, "could not cache metadata"));
            }
        }

        repo.set_timestamp(&ts_signed)?;
        repo.set_snapshot(&snap_signed)?;
        repo.set_targets(TOP_LEVEL_TARGETS, &targets_signed)?;
        Ok(repo)
    }

    /// Fetch root, preferring a remote copy that validates against the
    /// pinned certificates, otherwise a validating cached copy.
    async fn fetch_and_pin_root(&self) -> Result<(Signed, Root, bool)> {
        let remote_result = match self.remote {
            Some(remote) => Some(remote.get_meta(RoleName::Root, MAX_ROOT_BYTES).await),
            None => None,
        };

        let remote_error = match remote_result {
            Some(Ok(bytes)) => match self.pin_validate_root(&bytes) {
                Ok((signed, root)) => return Ok((signed, root, true)),
                Err(e) if e.is_verification_failure() => {
                    warn!(gun = self.gun, error = %e, "remote root failed pinned validation; trying cache");
                    Some(e)
                }
                Err(e) => Some(e),
            },
            Some(Err(e)) => {
                debug!(gun = self.gun, error = %e, "remote root unavailable; trying cache");
                Some(e)
            }
            None => None,
        };

        match self.cache.get_meta(RoleName::Root, MAX_ROOT_BYTES).await {
            Ok(bytes) => {
                let (signed, root) = self.pin_validate_root(&bytes)?;
                if remote_error.is_some() {
                    warn!(gun = self.gun, "using cached root instead of remote");
                }
                Ok((signed, root, false))
            }
            Err(_) => match remote_error {
                Some(e) => Err(e),
                None => Err(TufError::RepositoryNotFound(self.gun.to_string())),
            },
        }
    }

    /// Validate a root blob without trusting any key binding inside it:
    /// only x509 root keys whose certificates pin or chain for this GUN
    /// count toward the root threshold.
    fn pin_validate_root(&self, bytes: &[u8]) -> Result<(Signed, Root)> {
        let signed = Signed::from_bytes(bytes)?;
        let root = Root::from_signed(&signed)?;
        let entry = root
            .signed
            .roles
            .get(&RoleName::Root)
            .ok_or_else(|| TufError::BadRoot("root missing entry for root".into()))?;

        let mut accepted = std::collections::BTreeMap::new();
        for kid in &entry.key_ids {
            let Some(key) = root.signed.keys.get(kid) else { continue };
            if !key.algorithm.is_x509() {
                debug!(key_id = %kid, "skipping non-certificate root key");
                continue;
            }
            match self.certs.verify_leaf(self.gun, &key.public, &[]) {
                Ok(()) => {
                    accepted.insert(kid.clone(), key.clone());
                }
                Err(e) => {
                    debug!(key_id = %kid, error = %e, "root key certificate not trusted");
                }
            }
        }

        verify_signed(RoleName::Root, &signed, &accepted, entry.threshold, Some(Utc::now()))
            .map_err(|e| match e {
                TufError::InsufficientSignatures { .. } => {
                    TufError::BadRoot("root is not signed by enough pinned keys".into())
                }
                other => other,
            })?;
        Ok((signed, root))
    }

    fn verify_role(&self, role: RoleName, signed: &Signed, root: &Root) -> Result<()> {
        let entry = root
            .signed
            .roles
            .get(&role)
            .ok_or_else(|| TufError::BadRoot(format!("root missing entry for {}", role)))?;
        verify_signed(role, signed, &root.keys_for_role(role), entry.threshold, Some(Utc::now()))
    }

    /// Reject a fetched role whose version regressed below the cache.
    async fn check_rollback(&self, role: RoleName, signed: &Signed) -> Result<()> {
        let common: SignedCommon = serde_json::from_value(signed.signed.clone())?;
        let Some(cached) = self.cached_version(role).await else {
            return Ok(());
        };
        if common.version < cached {
            return Err(TufError::Rollback { role, new: common.version, current: cached });
        }
        Ok(())
    }

    async fn cached_version(&self, role: RoleName) -> Option<u64> {
        let bytes = self.cache.get_meta(role, MAX_DOWNLOAD_BYTES).await.ok()?;
        let signed = Signed::from_bytes(&bytes).ok()?;
        serde_json::from_value::<SignedCommon>(signed.signed).ok().map(|c| c.version)
    }

    /// Fetch a role blob, falling back to cache only on transport
    /// failures. Verification-class failures (including an oversize body)
    /// are never satisfied from the cache.
    async fn fetch_role(&self, role: RoleName, cap: u64) -> Result<(Vec<u8>, bool)> {
        let Some(remote) = self.remote else {
            return Ok((self.cache.get_meta(role, cap).await?, false));
        };
        match remote.get_meta(role, cap).await {
            Ok(bytes) => Ok((bytes, true)),
            Err(e) if e.is_verification_failure() => Err(e),
            Err(e) => {
                debug!(%role, error = %e, "remote fetch failed; trying cache");
                match self.cache.get_meta(role, cap).await {
                    Ok(bytes) => {
                        warn!(%role, "serving metadata from local cache");
                        Ok((bytes, false))
                    }
                    Err(_) => Err(e),
                }
            }
        }
    }
}
