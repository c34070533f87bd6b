//! The in-memory TUF repository engine.
//!
//! A `Repository` owns the role bodies for one GUN and is the only thing
//! allowed to mutate them. Collaborators (signer, stores, changelist) come
//! in as narrow handles; none of them hold a pointer back. One logical
//! operation (publish, update) holds the repository exclusively for its
//! duration; separate GUNs use separate instances.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::changelist::{Action, Change, Changelist, RoleKeyChange, Scope};
use crate::data::{
    default_expires, FileMeta, PublicKey, RoleName, Root, Signature, Signed, Snapshot, Targets,
    Timestamp,
};
use crate::error::{Result, TufError};
use crate::signer::Signer;
use crate::store::{MetadataStore, MAX_DOWNLOAD_BYTES, MAX_ROOT_BYTES};
use crate::verify::verify_signed;

/// Name of the top-level targets role inside the targets map.
pub const TOP_LEVEL_TARGETS: &str = "targets";

pub struct Repository {
    gun: String,
    signer: Arc<dyn Signer>,
    pub root: Option<Root>,
    pub targets: BTreeMap<String, Targets>,
    pub snapshot: Option<Snapshot>,
    pub timestamp: Option<Timestamp>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("gun", &self.gun)
            .field("root", &self.root)
            .field("targets", &self.targets)
            .field("snapshot", &self.snapshot)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl Repository {
    pub fn new(gun: impl Into<String>, signer: Arc<dyn Signer>) -> Self {
        Repository {
            gun: gun.into(),
            signer,
            root: None,
            targets: BTreeMap::new(),
            snapshot: None,
            timestamp: None,
        }
    }

    pub fn gun(&self) -> &str {
        &self.gun
    }

    fn root_ref(&self) -> Result<&Root> {
        self.root.as_ref().ok_or(TufError::RepoNotInitialized)
    }

    fn top_targets(&self) -> Result<&Targets> {
        self.targets.get(TOP_LEVEL_TARGETS).ok_or(TufError::RepoNotInitialized)
    }

    /// Build the four canonical roles at version 1 and sign them.
    ///
    /// `role_keys` must contain at least one public key per canonical role;
    /// the signer must hold the private halves for root, targets and
    /// snapshot. The timestamp body is created but left unsigned when the
    /// signer does not hold a timestamp key (the publisher never does; the
    /// server signs timestamps on its own).
    pub async fn initialize(
        &mut self,
        role_keys: &BTreeMap<RoleName, Vec<PublicKey>>,
        consistent_snapshot: bool,
    ) -> Result<()> {
        self.root = Some(Root::build(role_keys, consistent_snapshot)?);
        self.targets.insert(TOP_LEVEL_TARGETS.to_string(), Targets::empty());

        let signed_root = self.sign_role(RoleName::Root, default_expires(RoleName::Root)).await?;
        let signed_targets =
            self.sign_role(RoleName::Targets, default_expires(RoleName::Targets)).await?;

        let root_bytes = signed_root.envelope_bytes()?;
        let targets_bytes = signed_targets.envelope_bytes()?;
        self.snapshot = Some(Snapshot::build(&[
            (RoleName::Root, root_bytes.as_slice()),
            (RoleName::Targets, targets_bytes.as_slice()),
        ]));
        let signed_snapshot =
            self.sign_role(RoleName::Snapshot, default_expires(RoleName::Snapshot)).await?;

        let snapshot_bytes = signed_snapshot.envelope_bytes()?;
        self.timestamp = Some(Timestamp::build(&snapshot_bytes));
        match self.sign_role(RoleName::Timestamp, default_expires(RoleName::Timestamp)).await {
            Ok(_) => {}
            Err(TufError::InsufficientSignatures { .. }) => {
                // Normal for publishers: the timestamp key lives on the
                // server, which will sign its own timestamps.
                debug!(gun = %self.gun, "timestamp left unsigned; key is server-held");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    pub fn set_root(&mut self, signed: &Signed) -> Result<()> {
        self.root = Some(Root::from_signed(signed)?);
        Ok(())
    }

    pub fn set_targets(&mut self, role: &str, signed: &Signed) -> Result<()> {
        self.targets.insert(role.to_string(), Targets::from_signed(signed)?);
        Ok(())
    }

    pub fn set_snapshot(&mut self, signed: &Signed) -> Result<()> {
        self.snapshot = Some(Snapshot::from_signed(signed)?);
        Ok(())
    }

    pub fn set_timestamp(&mut self, signed: &Signed) -> Result<()> {
        self.timestamp = Some(Timestamp::from_signed(signed)?);
        Ok(())
    }

    /// Look up a target in the top-level targets role.
    pub fn target_meta(&self, name: &str) -> Result<FileMeta> {
        self.top_targets()?
            .signed
            .targets
            .get(name)
            .cloned()
            .ok_or_else(|| TufError::NotFound(name.to_string()))
    }

    pub fn list_targets(&self) -> Result<Vec<(String, FileMeta)>> {
        Ok(self
            .top_targets()?
            .signed
            .targets
            .iter()
            .map(|(name, meta)| (name.clone(), meta.clone()))
            .collect())
    }

    /// Replay staged edits onto the in-memory bodies, in insertion order.
    ///
    /// Target creates overwrite, deletes of absent names are no-ops and a
    /// create followed by a delete cancels out. Root-scoped entries replace
    /// a base role's key set.
    pub fn apply_changes(&mut self, changes: &[Change]) -> Result<()> {
        for change in changes {
            match change.scope {
                Scope::Targets => self.apply_target_change(change)?,
                Scope::Root => self.apply_root_change(change)?,
            }
        }
        Ok(())
    }

    fn apply_target_change(&mut self, change: &Change) -> Result<()> {
        let targets = self
            .targets
            .get_mut(TOP_LEVEL_TARGETS)
            .ok_or(TufError::RepoNotInitialized)?;
        match change.action {
            Action::Create => {
                let meta: FileMeta = serde_json::from_value(change.content.clone())?;
                let prior = targets.signed.targets.insert(change.path.clone(), meta.clone());
                if prior.as_ref() != Some(&meta) {
                    targets.dirty = true;
                }
            }
            Action::Delete => {
                if targets.signed.targets.remove(&change.path).is_some() {
                    targets.dirty = true;
                }
            }
        }
        Ok(())
    }

    fn apply_root_change(&mut self, change: &Change) -> Result<()> {
        if change.content_type != "role" {
            return Err(TufError::InvalidOperation {
                msg: format!("unsupported root change type {}", change.content_type),
            });
        }
        let key_change: RoleKeyChange = serde_json::from_value(change.content.clone())?;
        self.replace_role_keys(key_change.role, &key_change.keys)
    }

    /// Swap out the key set backing a base role in root.
    ///
    /// Keys no longer referenced by any role are dropped from `root.keys`.
    pub fn replace_role_keys(&mut self, role: RoleName, keys: &[PublicKey]) -> Result<()> {
        if keys.is_empty() {
            return Err(TufError::InsufficientKeys { role });
        }
        let root = self.root.as_mut().ok_or(TufError::RepoNotInitialized)?;

        let mut new_ids = Vec::with_capacity(keys.len());
        for key in keys {
            let id = key.key_id();
            root.signed.keys.insert(id.clone(), key.clone());
            new_ids.push(id);
        }
        root.signed
            .roles
            .get_mut(&role)
            .ok_or(TufError::BadRoot(format!("root missing entry for {}", role)))?
            .key_ids = new_ids;

        let in_use: BTreeSet<&String> =
            root.signed.roles.values().flat_map(|r| r.key_ids.iter()).collect();
        root.signed.keys.retain(|id, _| in_use.contains(id));
        root.dirty = true;
        Ok(())
    }

    async fn collect_signatures(
        &self,
        role: RoleName,
        keys: &BTreeMap<String, PublicKey>,
        threshold: u32,
        message: &[u8],
    ) -> Result<Vec<Signature>> {
        let mut signatures = Vec::new();
        for key_id in keys.keys() {
            if signatures.len() as u32 >= threshold {
                break;
            }
            match self.signer.sign(key_id, message).await {
                Ok(sig) => signatures.push(sig),
                Err(TufError::UnknownKey(_)) | Err(TufError::PassphraseInvalid(_)) => {
                    debug!(%role, key_id, "skipping key the signer cannot use");
                }
                Err(e) => return Err(e),
            }
        }
        if (signatures.len() as u32) < threshold {
            return Err(TufError::InsufficientSignatures { role });
        }
        Ok(signatures)
    }

    /// Sign `role`'s body, bumping its version first when it has unsigned
    /// edits, and setting the new expiry. Signing stops once the role's
    /// threshold is met.
    pub async fn sign_role(&mut self, role: RoleName, expires: DateTime<Utc>) -> Result<Signed> {
        let (keys, threshold) = {
            let root = self.root_ref()?;
            let entry = root
                .signed
                .roles
                .get(&role)
                .ok_or_else(|| TufError::BadRoot(format!("root missing entry for {}", role)))?;
            (root.keys_for_role(role), entry.threshold)
        };

        macro_rules! sign_body {
            ($wrapper:expr) => {{
                let wrapper = $wrapper;
                if wrapper.dirty {
                    wrapper.signed.version += 1;
                    wrapper.dirty = false;
                }
                wrapper.signed.expires = expires;
                let message = wrapper.canonical_body()?;
                message
            }};
        }

        let message = match role {
            RoleName::Root => {
                let root = self.root.as_mut().ok_or(TufError::RepoNotInitialized)?;
                sign_body!(root)
            }
            RoleName::Targets => {
                let targets = self
                    .targets
                    .get_mut(TOP_LEVEL_TARGETS)
                    .ok_or(TufError::RepoNotInitialized)?;
                sign_body!(targets)
            }
            RoleName::Snapshot => {
                let snapshot = self.snapshot.as_mut().ok_or(TufError::RepoNotInitialized)?;
                sign_body!(snapshot)
            }
            RoleName::Timestamp => {
                let timestamp = self.timestamp.as_mut().ok_or(TufError::RepoNotInitialized)?;
                sign_body!(timestamp)
            }
        };

        let signatures = self.collect_signatures(role, &keys, threshold, &message).await?;

        match role {
            RoleName::Root => {
                let root = self.root.as_mut().expect("checked above");
                root.signatures = signatures;
                root.to_signed()
            }
            RoleName::Targets => {
                let targets = self.targets.get_mut(TOP_LEVEL_TARGETS).expect("checked above");
                targets.signatures = signatures;
                targets.to_signed()
            }
            RoleName::Snapshot => {
                let snapshot = self.snapshot.as_mut().expect("checked above");
                snapshot.signatures = signatures;
                snapshot.to_signed()
            }
            RoleName::Timestamp => {
                let timestamp = self.timestamp.as_mut().expect("checked above");
                timestamp.signatures = signatures;
                timestamp.to_signed()
            }
        }
    }

    /// Record `bytes` as the current blob for `role` in snapshot meta.
    pub fn update_snapshot_entry(&mut self, role: RoleName, bytes: &[u8]) -> Result<()> {
        let snapshot = self.snapshot.as_mut().ok_or(TufError::RepoNotInitialized)?;
        let meta = FileMeta::from_bytes(bytes);
        let prior = snapshot.signed.meta.insert(role.to_string(), meta.clone());
        if prior.as_ref() != Some(&meta) {
            snapshot.dirty = true;
        }
        Ok(())
    }

    /// Record `bytes` as the current snapshot blob in timestamp meta.
    pub fn update_timestamp_entry(&mut self, snapshot_bytes: &[u8]) -> Result<()> {
        let timestamp = self.timestamp.as_mut().ok_or(TufError::RepoNotInitialized)?;
        let meta = FileMeta::from_bytes(snapshot_bytes);
        let prior = timestamp.signed.meta.insert(RoleName::Snapshot.to_string(), meta.clone());
        if prior.as_ref() != Some(&meta) {
            timestamp.dirty = true;
        }
        Ok(())
    }

    /// Pull current root, targets and snapshot from a store, verifying each
    /// against the fetched root's key bindings.
    pub async fn pull_from_remote(&mut self, remote: &dyn MetadataStore) -> Result<()> {
        let root_bytes = remote.get_meta(RoleName::Root, MAX_ROOT_BYTES).await?;
        let root_signed = Signed::from_bytes(&root_bytes)?;
        let root = Root::from_signed(&root_signed)?;
        let root_entry = root
            .signed
            .roles
            .get(&RoleName::Root)
            .ok_or_else(|| TufError::BadRoot("root missing entry for root".into()))?;
        verify_signed(
            RoleName::Root,
            &root_signed,
            &root.keys_for_role(RoleName::Root),
            root_entry.threshold,
            Some(Utc::now()),
        )?;

        for role in [RoleName::Targets, RoleName::Snapshot] {
            let bytes = remote.get_meta(role, MAX_DOWNLOAD_BYTES).await?;
            let signed = Signed::from_bytes(&bytes)?;
            let entry = root
                .signed
                .roles
                .get(&role)
                .ok_or_else(|| TufError::BadRoot(format!("root missing entry for {}", role)))?;
            verify_signed(role, &signed, &root.keys_for_role(role), entry.threshold, Some(Utc::now()))?;
            match role {
                RoleName::Targets => self.set_targets(TOP_LEVEL_TARGETS, &signed)?,
                RoleName::Snapshot => self.set_snapshot(&signed)?,
                _ => unreachable!(),
            }
        }
        self.root = Some(root);
        Ok(())
    }

    /// Load previously saved metadata from the local cache, without
    /// signature verification: the cache is this publisher's own state.
    pub async fn load_from_cache(&mut self, cache: &dyn MetadataStore) -> Result<()> {
        let root_bytes = cache.get_meta(RoleName::Root, MAX_ROOT_BYTES).await?;
        self.set_root(&Signed::from_bytes(&root_bytes)?)?;
        let targets_bytes = cache.get_meta(RoleName::Targets, MAX_DOWNLOAD_BYTES).await?;
        self.set_targets(TOP_LEVEL_TARGETS, &Signed::from_bytes(&targets_bytes)?)?;
        let snapshot_bytes = cache.get_meta(RoleName::Snapshot, MAX_DOWNLOAD_BYTES).await?;
        self.set_snapshot(&Signed::from_bytes(&snapshot_bytes)?)?;
        Ok(())
    }

    /// Persist the current signed roles to the local cache.
    pub async fn save_to_cache(&self, cache: &dyn MetadataStore) -> Result<()> {
        let root = self.root_ref()?;
        cache.set_meta(RoleName::Root, root.to_signed()?.envelope_bytes()?).await?;
        cache
            .set_meta(RoleName::Targets, self.top_targets()?.to_signed()?.envelope_bytes()?)
            .await?;
        if let Some(snapshot) = &self.snapshot {
            cache.set_meta(RoleName::Snapshot, snapshot.to_signed()?.envelope_bytes()?).await?;
        }
        if let Some(timestamp) = &self.timestamp {
            if !timestamp.signatures.is_empty() {
                cache
                    .set_meta(RoleName::Timestamp, timestamp.to_signed()?.envelope_bytes()?)
                    .await?;
            }
        }
        Ok(())
    }

    /// Publish staged changes: rebase on the remote state, replay the
    /// changelist, re-sign what changed and upload the set atomically.
    ///
    /// A publish with nothing staged and no role needing a re-sign leaves
    /// the remote untouched. `Conflict` and `Expired` from the server are
    /// surfaced as-is; retrying is the caller's policy.
    pub async fn publish(
        &mut self,
        remote: &dyn MetadataStore,
        cache: Option<&dyn MetadataStore>,
        changelist: &dyn Changelist,
    ) -> Result<()> {
        let mut first_publish = false;
        match self.pull_from_remote(remote).await {
            Ok(()) => {}
            Err(TufError::MetaNotFound(_)) => {
                // The server has never seen this GUN. Work from the local
                // cache written at initialization time.
                let cache = cache.ok_or(TufError::RepoNotInitialized)?;
                self.load_from_cache(cache).await.map_err(|e| {
                    debug!(gun = %self.gun, error = %e, "no local trust data");
                    TufError::RepoNotInitialized
                })?;
                first_publish = true;
            }
            Err(e) => return Err(e),
        }

        let changes = changelist.list()?;
        self.apply_changes(&changes)?;

        let root_needs_resign = {
            let root = self.root_ref()?;
            root.dirty || root.near_expiry()
        };
        let targets_dirty = self.top_targets()?.dirty;
        if !first_publish && !root_needs_resign && !targets_dirty && changes.is_empty() {
            debug!(gun = %self.gun, "nothing staged; publish is a no-op");
            return Ok(());
        }

        let mut updates: BTreeMap<RoleName, Vec<u8>> = BTreeMap::new();

        if root_needs_resign || first_publish {
            let signed_root = if root_needs_resign {
                self.sign_role(RoleName::Root, default_expires(RoleName::Root)).await?
            } else {
                self.root_ref()?.to_signed()?
            };
            let root_bytes = signed_root.envelope_bytes()?;
            self.update_snapshot_entry(RoleName::Root, &root_bytes)?;
            updates.insert(RoleName::Root, root_bytes);
        }

        let signed_targets =
            self.sign_role(RoleName::Targets, default_expires(RoleName::Targets)).await?;
        let targets_bytes = signed_targets.envelope_bytes()?;
        self.update_snapshot_entry(RoleName::Targets, &targets_bytes)?;
        updates.insert(RoleName::Targets, targets_bytes);

        let signed_snapshot =
            self.sign_role(RoleName::Snapshot, default_expires(RoleName::Snapshot)).await?;
        updates.insert(RoleName::Snapshot, signed_snapshot.envelope_bytes()?);

        remote.set_multi(updates).await?;

        if let Err(e) = changelist.clear() {
            // Not fatal for a single publisher, but stale entries will be
            // replayed on the next publish.
            warn!(gun = %self.gun, error = %e, "could not clear changelist after publish");
        }
        Ok(())
    }
}
