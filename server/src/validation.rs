//! Update-bundle validation.
//!
//! The gate every proposed publish passes through: root rotation
//! integrity, per-role threshold verification, snapshot-of-everything
//! consistency, and server-side snapshot generation when the publisher
//! delegated that role. Either the whole bundle is accepted or none of it
//! is; every rejection is a typed error.

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{debug, warn};

use provenant_tuf::data::{PublicKey, Root, RoleName, Signed, Snapshot, Targets};
use provenant_tuf::error::{Result, TufError};
use provenant_tuf::repo::{Repository, TOP_LEVEL_TARGETS};
use provenant_tuf::verify::{verify_signed, SignedCommon};

use crate::keys::KeyService;
use crate::storage::{MetaUpdate, ServerStorage};

/// Validate a proposed update set for `gun` and return the set to persist,
/// which may include a server-generated snapshot.
pub async fn validate_update(
    gun: &str,
    updates: BTreeMap<RoleName, Vec<u8>>,
    storage: &dyn ServerStorage,
    keys: &KeyService,
) -> Result<Vec<MetaUpdate>> {
    if updates.contains_key(&RoleName::Timestamp) {
        return Err(TufError::InvalidOperation {
            msg: "timestamp metadata is generated by the server".to_string(),
        });
    }

    let stored_root = storage.current(gun, RoleName::Root).await?;

    // Step 1: root handling. The effective root for the rest of the
    // validation is the proposed one when present, the stored one otherwise.
    let root = if let Some(new_root_bytes) = updates.get(&RoleName::Root) {
        let timestamp_key = keys
            .public_key(gun, RoleName::Timestamp)
            .await
            .map_err(|_| TufError::BadRoot(format!("no timestamp key for {}", gun)))?;
        let root = validate_root(
            gun,
            stored_root.as_ref().map(|(_, bytes)| bytes.as_slice()),
            new_root_bytes,
            &timestamp_key,
        )?;
        debug!(gun, version = root.signed.version, "validated proposed root");
        root
    } else {
        let Some((_, stored_bytes)) = stored_root else {
            return Err(TufError::InvalidOperation {
                msg: "no pre-existing root and no root provided in update".to_string(),
            });
        };
        let signed = Signed::from_bytes(&stored_bytes).map_err(|_| {
            TufError::InvalidOperation {
                msg: "pre-existing root is corrupted and no root provided in update".to_string(),
            }
        })?;
        Root::from_signed(&signed).map_err(|_| TufError::InvalidOperation {
            msg: "pre-existing root is corrupted and no root provided in update".to_string(),
        })?
    };

    // Step 2: targets.
    if let Some(targets_bytes) = updates.get(&RoleName::Targets) {
        validate_role_blob(RoleName::Targets, targets_bytes, &root)
            .map_err(|e| match e {
                expired @ TufError::Expired { .. } => expired,
                other => TufError::BadTargets(other.to_string()),
            })?;
        debug!(gun, "validated proposed targets");
    }

    // Steps 3 and 4: snapshot, proposed or regenerated.
    let mut accepted: Vec<MetaUpdate> = Vec::new();
    if let Some(snapshot_bytes) = updates.get(&RoleName::Snapshot) {
        let signed = validate_role_blob(RoleName::Snapshot, snapshot_bytes, &root)
            .map_err(|e| match e {
                expired @ TufError::Expired { .. } => expired,
                other => TufError::BadSnapshot(other.to_string()),
            })?;
        let snapshot = Snapshot::from_signed(&signed)
            .map_err(|e| TufError::BadSnapshot(e.to_string()))?;
        check_snapshot_entries(gun, &snapshot, &updates, storage).await?;
        debug!(gun, "validated proposed snapshot");
    } else {
        let generated = generate_snapshot(gun, &root, &updates, storage, keys).await?;
        debug!(gun, version = generated.version, "generated snapshot server-side");
        accepted.push(generated);
    }

    // Step 5 half: parse versions here; the storage layer enforces
    // monotonicity atomically at commit time so races resolve to Conflict.
    for (role, bytes) in &updates {
        let signed = Signed::from_bytes(bytes)?;
        let common: SignedCommon = serde_json::from_value(signed.signed)?;
        accepted.push(MetaUpdate { role: *role, version: common.version, data: bytes.clone() });
    }
    accepted.sort_by_key(|u| u.role);
    Ok(accepted)
}

/// Verify a role blob's signatures against the effective root.
fn validate_role_blob(role: RoleName, bytes: &[u8], root: &Root) -> Result<Signed> {
    let signed = Signed::from_bytes(bytes)?;
    let entry = root
        .signed
        .roles
        .get(&role)
        .ok_or_else(|| TufError::BadRoot(format!("root missing entry for {}", role)))?;
    verify_signed(role, &signed, &root.keys_for_role(role), entry.threshold, Some(Utc::now()))?;
    Ok(signed)
}

/// Root-rotation gate, mirroring the four checks in order: rotation
/// detection, old-key quorum on rotation, self-quorum always, then role
/// table sanity and timestamp-key possession.
pub fn validate_root(
    gun: &str,
    old_root_bytes: Option<&[u8]>,
    new_root_bytes: &[u8],
    timestamp_key: &PublicKey,
) -> Result<Root> {
    let new_signed =
        Signed::from_bytes(new_root_bytes).map_err(|e| TufError::BadRoot(e.to_string()))?;
    let new_root = Root::from_signed(&new_signed).map_err(|e| TufError::BadRoot(e.to_string()))?;

    let old_root = match old_root_bytes {
        Some(bytes) => match Signed::from_bytes(bytes).and_then(|s| Root::from_signed(&s)) {
            Ok(root) => Some(root),
            Err(_) => {
                warn!(gun, "stored root could not be parsed; validating new root standalone");
                None
            }
        },
        None => None,
    };

    let new_entry = new_root
        .signed
        .roles
        .get(&RoleName::Root)
        .ok_or_else(|| TufError::BadRoot("new root is missing role entry for root".into()))?;

    if let Some(old_root) = &old_root {
        let old_entry = old_root
            .signed
            .roles
            .get(&RoleName::Root)
            .ok_or_else(|| TufError::BadRoot("stored root is missing role entry for root".into()))?;
        let old_keys = old_root.keys_for_role(RoleName::Root);

        let rotation = old_keys.len() != new_entry.key_ids.len()
            || new_entry.key_ids.iter().any(|kid| !old_keys.contains_key(kid));
        if rotation {
            // The previous quorum must have blessed the new key set. Expiry
            // of the old root is irrelevant here, so no `now` is passed.
            verify_signed(RoleName::Root, &new_signed, &old_keys, old_entry.threshold, None)
                .map_err(|_| TufError::RotationUnsigned { threshold: old_entry.threshold })?;
        }
    }

    // Always: the new root must satisfy its own declared quorum.
    verify_signed(
        RoleName::Root,
        &new_signed,
        &new_root.keys_for_role(RoleName::Root),
        new_entry.threshold,
        Some(Utc::now()),
    )
    .map_err(|e| match e {
        expired @ TufError::Expired { .. } => expired,
        other => TufError::BadRoot(other.to_string()),
    })?;

    // Role table sanity. The server creates every timestamp, and there is
    // only ever one, so a timestamp threshold above one could never be met.
    let mut timestamp_key_ids: &[String] = &[];
    for role in RoleName::all() {
        let entry = new_root
            .signed
            .roles
            .get(&role)
            .ok_or_else(|| TufError::BadRoot(format!("missing required {} role from root", role)))?;
        let bad_threshold =
            entry.threshold < 1 || (role == RoleName::Timestamp && entry.threshold != 1);
        if bad_threshold {
            return Err(TufError::BadRoot(format!("{} role has invalid threshold", role)));
        }
        if (entry.key_ids.len() as u32) < entry.threshold {
            return Err(TufError::BadRoot(format!(
                "{} role has insufficient number of keys",
                role
            )));
        }
        if role == RoleName::Timestamp {
            timestamp_key_ids = &entry.key_ids;
        }
    }

    let server_key_id = timestamp_key.key_id();
    if !timestamp_key_ids.iter().any(|kid| *kid == server_key_id) {
        return Err(TufError::OrphanedTimestampKey);
    }

    Ok(new_root)
}

/// Every role being updated or already stored (other than snapshot and
/// timestamp) must be witnessed by the snapshot with matching length and
/// hashes.
async fn check_snapshot_entries(
    gun: &str,
    snapshot: &Snapshot,
    updates: &BTreeMap<RoleName, Vec<u8>>,
    storage: &dyn ServerStorage,
) -> Result<()> {
    for role in [RoleName::Root, RoleName::Targets] {
        let bytes = match updates.get(&role) {
            Some(bytes) => Some(bytes.clone()),
            None => storage.current(gun, role).await?.map(|(_, bytes)| bytes),
        };
        let Some(bytes) = bytes else { continue };
        let entry = snapshot
            .signed
            .meta
            .get(&role.to_string())
            .ok_or_else(|| TufError::BadSnapshot(format!("snapshot missing metadata for {}", role)))?;
        if !entry.matches(&bytes) {
            return Err(TufError::BadSnapshot(format!(
                "snapshot has incorrect hashes for {}",
                role
            )));
        }
    }
    Ok(())
}

/// Build and sign a snapshot on the publisher's behalf.
///
/// Requires the server to hold a snapshot key that the effective root
/// actually lists for the snapshot role; otherwise the hierarchy cannot be
/// completed and the update is rejected.
async fn generate_snapshot(
    gun: &str,
    root: &Root,
    updates: &BTreeMap<RoleName, Vec<u8>>,
    storage: &dyn ServerStorage,
    keys: &KeyService,
) -> Result<MetaUpdate> {
    let entry = root
        .signed
        .roles
        .get(&RoleName::Snapshot)
        .ok_or_else(|| TufError::BadRoot("root did not include snapshot role".into()))?;

    let held = keys.public_key(gun, RoleName::Snapshot).await.map_err(|_| TufError::InvalidHierarchy)?;
    if !entry.key_ids.iter().any(|kid| *kid == held.key_id()) {
        return Err(TufError::InvalidHierarchy);
    }

    let mut repo = Repository::new(gun, keys.signer());
    repo.set_root(&root.to_signed()?)?;

    // Current targets: proposed bytes win over stored ones.
    let targets_bytes = match updates.get(&RoleName::Targets) {
        Some(bytes) => bytes.clone(),
        None => storage
            .current(gun, RoleName::Targets)
            .await?
            .map(|(_, bytes)| bytes)
            .ok_or_else(|| TufError::BadTargets("no targets available for snapshot".into()))?,
    };
    let targets_signed = Signed::from_bytes(&targets_bytes)?;
    Targets::from_signed(&targets_signed)?;
    repo.set_targets(TOP_LEVEL_TARGETS, &targets_signed)?;

    // Previous snapshot, when one exists, seeds version continuity.
    if let Some((_, stored_bytes)) = storage.current(gun, RoleName::Snapshot).await? {
        let signed = Signed::from_bytes(&stored_bytes)?;
        repo.set_snapshot(&signed)?;
    } else {
        repo.set_snapshot(&Snapshot::build(&[]).to_signed()?)?;
    }

    let root_bytes = match updates.get(&RoleName::Root) {
        Some(bytes) => bytes.clone(),
        None => storage
            .current(gun, RoleName::Root)
            .await?
            .map(|(_, bytes)| bytes)
            .unwrap_or(root.to_signed()?.envelope_bytes()?),
    };
    repo.update_snapshot_entry(RoleName::Root, &root_bytes)?;
    repo.update_snapshot_entry(RoleName::Targets, &targets_bytes)?;

    // A regenerated snapshot is always a new version, even if the meta
    // entries happen to coincide with the previous ones.
    if let Some(snapshot) = repo.snapshot.as_mut() {
        snapshot.dirty = true;
    }
    let signed = repo
        .sign_role(RoleName::Snapshot, provenant_tuf::data::default_expires(RoleName::Snapshot))
        .await?;
    let version = repo.snapshot.as_ref().map(|s| s.signed.version).unwrap_or(1);
    Ok(MetaUpdate { role: RoleName::Snapshot, version, data: signed.envelope_bytes()? })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use provenant_tuf::changelist::Change;
    use provenant_tuf::data::{default_expires, FileMeta, KeyAlgorithm};
    use provenant_tuf::signer::{MemorySigner, Signer};
    use std::sync::Arc;

    struct Publisher {
        repo: Repository,
        signer: Arc<MemorySigner>,
    }

    /// A publisher plus a server key service with the GUN's timestamp key
    /// provisioned, as the init flow would leave them.
    async fn setup(with_snapshot_key: bool) -> (Publisher, KeyService) {
        let keys = KeyService::new();
        let ts_key = keys.get_or_create("gun", RoleName::Timestamp).await.unwrap();

        let signer = Arc::new(MemorySigner::new());
        let mut role_keys = BTreeMap::new();
        for role in [RoleName::Root, RoleName::Targets] {
            let (_, public) = signer.generate(role, KeyAlgorithm::Ecdsa).await.unwrap();
            role_keys.insert(role, vec![public]);
        }
        let snapshot_key = if with_snapshot_key {
            let (_, public) = signer.generate(RoleName::Snapshot, KeyAlgorithm::Ecdsa).await.unwrap();
            public
        } else {
            keys.get_or_create("gun", RoleName::Snapshot).await.unwrap()
        };
        role_keys.insert(RoleName::Snapshot, vec![snapshot_key]);
        role_keys.insert(RoleName::Timestamp, vec![ts_key]);

        let mut repo = Repository::new("gun", signer.clone());
        repo.initialize(&role_keys, false).await.unwrap();
        (Publisher { repo, signer }, keys)
    }

    /// Sign targets and snapshot (and root, when requested) into an update
    /// set the way a publish would. Root rides along only on first publish
    /// or when it changed; re-sending an unchanged root version would trip
    /// the monotonicity check.
    async fn build_update(
        publisher: &mut Publisher,
        include_root: bool,
    ) -> BTreeMap<RoleName, Vec<u8>> {
        let mut updates = BTreeMap::new();
        let root_bytes =
            publisher.repo.root.as_ref().unwrap().to_signed().unwrap().envelope_bytes().unwrap();
        publisher.repo.update_snapshot_entry(RoleName::Root, &root_bytes).unwrap();
        if include_root {
            updates.insert(RoleName::Root, root_bytes);
        }

        let targets = publisher
            .repo
            .sign_role(RoleName::Targets, default_expires(RoleName::Targets))
            .await
            .unwrap();
        let targets_bytes = targets.envelope_bytes().unwrap();
        publisher.repo.update_snapshot_entry(RoleName::Targets, &targets_bytes).unwrap();
        updates.insert(RoleName::Targets, targets_bytes);

        let snapshot = publisher
            .repo
            .sign_role(RoleName::Snapshot, default_expires(RoleName::Snapshot))
            .await
            .unwrap();
        updates.insert(RoleName::Snapshot, snapshot.envelope_bytes().unwrap());
        updates
    }

    #[tokio::test]
    async fn full_first_update_is_accepted() {
        let (mut publisher, keys) = setup(true).await;
        let storage = MemoryBackend::new();
        let updates = build_update(&mut publisher, true).await;

        let accepted = validate_update("gun", updates, &storage, &keys).await.unwrap();
        assert_eq!(accepted.len(), 3);
        storage.apply("gun", &accepted).await.unwrap();
    }

    #[tokio::test]
    async fn update_without_root_requires_stored_root() {
        let (mut publisher, keys) = setup(true).await;
        let storage = MemoryBackend::new();
        let mut updates = build_update(&mut publisher, true).await;
        updates.remove(&RoleName::Root);

        let err = validate_update("gun", updates, &storage, &keys).await.unwrap_err();
        assert!(matches!(err, TufError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn snapshot_hash_mismatch_is_rejected() {
        let (mut publisher, keys) = setup(true).await;
        let storage = MemoryBackend::new();
        let mut updates = build_update(&mut publisher, true).await;

        // Swap in different targets bytes after the snapshot was computed.
        let changes =
            vec![Change::add_target("sneaky", &FileMeta::from_bytes(b"oops")).unwrap()];
        publisher.repo.apply_changes(&changes).unwrap();
        let tampered = publisher
            .repo
            .sign_role(RoleName::Targets, default_expires(RoleName::Targets))
            .await
            .unwrap();
        updates.insert(RoleName::Targets, tampered.envelope_bytes().unwrap());

        let err = validate_update("gun", updates, &storage, &keys).await.unwrap_err();
        match err {
            TufError::BadSnapshot(msg) => assert!(msg.contains("incorrect hashes for targets")),
            other => panic!("expected BadSnapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn snapshot_is_generated_when_server_holds_the_key() {
        let (mut publisher, keys) = setup(false).await;
        let storage = MemoryBackend::new();
        let mut updates = build_update(&mut publisher, true).await;
        // Publisher cannot sign snapshot: it delegated that role.
        updates.remove(&RoleName::Snapshot);

        let accepted = validate_update("gun", updates.clone(), &storage, &keys).await.unwrap();
        let generated = accepted.iter().find(|u| u.role == RoleName::Snapshot).unwrap();
        let snapshot =
            Snapshot::from_signed(&Signed::from_bytes(&generated.data).unwrap()).unwrap();
        assert!(snapshot.signed.meta["targets"].matches(&updates[&RoleName::Targets]));
        assert!(snapshot.signed.meta["root"].matches(&updates[&RoleName::Root]));
        assert!(!snapshot.signatures.is_empty());
        storage.apply("gun", &accepted).await.unwrap();
    }

    #[tokio::test]
    async fn missing_snapshot_without_server_key_is_invalid_hierarchy() {
        let (mut publisher, keys) = setup(true).await;
        let storage = MemoryBackend::new();
        let mut updates = build_update(&mut publisher, true).await;
        updates.remove(&RoleName::Snapshot);

        // The publisher kept the snapshot key, so the server has none.
        let err = validate_update("gun", updates, &storage, &keys).await.unwrap_err();
        assert!(matches!(err, TufError::InvalidHierarchy));
    }

    #[tokio::test]
    async fn rotation_without_old_signatures_is_rejected() {
        let (mut publisher, keys) = setup(true).await;
        let storage = MemoryBackend::new();
        let updates = build_update(&mut publisher, true).await;
        let accepted = validate_update("gun", updates, &storage, &keys).await.unwrap();
        storage.apply("gun", &accepted).await.unwrap();

        // Fresh root key set, signed only by the new key.
        let new_signer = Arc::new(MemorySigner::new());
        let (_, new_root_key) =
            new_signer.generate(RoleName::Root, KeyAlgorithm::Ecdsa).await.unwrap();
        let mut rotated = publisher.repo.root.as_ref().unwrap().clone();
        rotated.signed.version += 1;
        let old_ids = rotated.signed.roles[&RoleName::Root].key_ids.clone();
        let new_id = new_root_key.key_id();
        rotated.signed.keys.insert(new_id.clone(), new_root_key.clone());
        for old in &old_ids {
            rotated.signed.keys.remove(old);
        }
        rotated.signed.roles.get_mut(&RoleName::Root).unwrap().key_ids = vec![new_id.clone()];

        let body = rotated.canonical_body().unwrap();
        let sig = new_signer.sign(&new_id, &body).await.unwrap();
        rotated.signatures = vec![sig];

        let mut updates = BTreeMap::new();
        updates.insert(RoleName::Root, rotated.to_signed().unwrap().envelope_bytes().unwrap());
        let err = validate_update("gun", updates, &storage, &keys).await.unwrap_err();
        assert!(matches!(err, TufError::RotationUnsigned { threshold: 1 }));
    }

    #[tokio::test]
    async fn rotation_with_both_quorums_is_accepted() {
        let (mut publisher, keys) = setup(true).await;
        let storage = MemoryBackend::new();
        let updates = build_update(&mut publisher, true).await;
        let accepted = validate_update("gun", updates, &storage, &keys).await.unwrap();
        storage.apply("gun", &accepted).await.unwrap();

        let (new_id, new_root_key) =
            publisher.signer.generate(RoleName::Root, KeyAlgorithm::Ecdsa).await.unwrap();
        let mut rotated = publisher.repo.root.as_ref().unwrap().clone();
        rotated.signed.version += 1;
        let old_ids = rotated.signed.roles[&RoleName::Root].key_ids.clone();
        rotated.signed.keys.insert(new_id.clone(), new_root_key);
        for old in &old_ids {
            rotated.signed.keys.remove(old);
        }
        rotated.signed.roles.get_mut(&RoleName::Root).unwrap().key_ids = vec![new_id.clone()];

        // Signed by the old quorum and the new key.
        let body = rotated.canonical_body().unwrap();
        let mut signatures = vec![publisher.signer.sign(&new_id, &body).await.unwrap()];
        for old in &old_ids {
            signatures.push(publisher.signer.sign(old, &body).await.unwrap());
        }
        rotated.signatures = signatures;

        // Publish the rotated root together with re-signed targets and a
        // snapshot that witnesses the new root bytes.
        publisher.repo.root = Some(rotated);
        publisher
            .repo
            .apply_changes(&[Change::add_target("post-rotation", &FileMeta::from_bytes(b"x"))
                .unwrap()])
            .unwrap();
        let updates = build_update(&mut publisher, true).await;
        let accepted = validate_update("gun", updates, &storage, &keys).await.unwrap();
        assert_eq!(accepted.iter().filter(|u| u.role == RoleName::Root).count(), 1);
        storage.apply("gun", &accepted).await.unwrap();
        assert_eq!(storage.current("gun", RoleName::Root).await.unwrap().unwrap().0, 2);
    }

    #[tokio::test]
    async fn root_without_server_timestamp_key_is_orphaned() {
        let keys = KeyService::new();
        keys.get_or_create("gun", RoleName::Timestamp).await.unwrap();

        // The publisher baked in a timestamp key the server never held.
        let signer = Arc::new(MemorySigner::new());
        let mut role_keys = BTreeMap::new();
        for role in RoleName::all() {
            let (_, public) = signer.generate(role, KeyAlgorithm::Ecdsa).await.unwrap();
            role_keys.insert(role, vec![public]);
        }
        let mut repo = Repository::new("gun", signer);
        repo.initialize(&role_keys, false).await.unwrap();

        let storage = MemoryBackend::new();
        let mut publisher = Publisher { repo, signer: Arc::new(MemorySigner::new()) };
        let updates = build_update(&mut publisher, true).await;
        let err = validate_update("gun", updates, &storage, &keys).await.unwrap_err();
        assert!(matches!(err, TufError::OrphanedTimestampKey));
    }

    #[tokio::test]
    async fn timestamp_updates_from_clients_are_refused() {
        let (_, keys) = setup(true).await;
        let storage = MemoryBackend::new();
        let mut updates = BTreeMap::new();
        updates.insert(RoleName::Timestamp, b"{}".to_vec());
        let err = validate_update("gun", updates, &storage, &keys).await.unwrap_err();
        assert!(matches!(err, TufError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn racing_publishes_resolve_to_conflict() {
        let (mut publisher, keys) = setup(true).await;
        let storage = MemoryBackend::new();
        let updates = build_update(&mut publisher, true).await;
        let accepted = validate_update("gun", updates, &storage, &keys).await.unwrap();
        storage.apply("gun", &accepted).await.unwrap();

        // Two publishers rebase on the same state and both pass validation.
        let change = Change::add_target("a", &FileMeta::from_bytes(b"1")).unwrap();
        publisher.repo.apply_changes(&[change]).unwrap();
        let first = build_update(&mut publisher, false).await;
        let first_accepted = validate_update("gun", first, &storage, &keys).await.unwrap();

        let mut second_repo = Repository::new("gun", publisher.signer.clone());
        second_repo
            .set_root(&Signed::from_bytes(&storage.current("gun", RoleName::Root).await.unwrap().unwrap().1).unwrap())
            .unwrap();
        second_repo
            .set_targets(
                TOP_LEVEL_TARGETS,
                &Signed::from_bytes(
                    &storage.current("gun", RoleName::Targets).await.unwrap().unwrap().1,
                )
                .unwrap(),
            )
            .unwrap();
        second_repo
            .set_snapshot(
                &Signed::from_bytes(
                    &storage.current("gun", RoleName::Snapshot).await.unwrap().unwrap().1,
                )
                .unwrap(),
            )
            .unwrap();
        second_repo
            .apply_changes(&[Change::add_target("b", &FileMeta::from_bytes(b"2")).unwrap()])
            .unwrap();
        let mut second_publisher = Publisher { repo: second_repo, signer: publisher.signer.clone() };
        let second = build_update(&mut second_publisher, false).await;
        let second_accepted = validate_update("gun", second, &storage, &keys).await.unwrap();

        // First commit wins; second hits the version race at the store.
        storage.apply("gun", &first_accepted).await.unwrap();
        let err = storage.apply("gun", &second_accepted).await.unwrap_err();
        assert!(matches!(err, TufError::Conflict { .. }));
    }
}
