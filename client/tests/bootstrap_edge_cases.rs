//! Adversarial and degraded-path behavior of the client bootstrap.
//!
//! These drive the bootstrap directly against in-memory stores so the
//! remote can be made malicious, stale or unreachable at will.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use provenant_client::bootstrap::Bootstrapper;
use provenant_tuf::certstore::CertStore;
use provenant_tuf::crypto::PrivateKey;
use provenant_tuf::data::{
    default_expires, FileMeta, HexBytes, KeyAlgorithm, PublicKey, RoleName, Signed,
};
use provenant_tuf::error::{Result, TufError};
use provenant_tuf::repo::Repository;
use provenant_tuf::signer::{MemorySigner, Signer};
use provenant_tuf::store::{MemoryStore, MetadataStore};

const GUN: &str = "example.com/app";

struct Scenario {
    signer: Arc<MemorySigner>,
    repo: Repository,
    certs: CertStore,
}

/// A publisher whose root key is certified for the GUN and pinned, and
/// whose signer also holds the timestamp key so tests can mint their own
/// timestamps.
async fn scenario() -> Scenario {
    let signer = Arc::new(MemorySigner::new());

    let root_private = PrivateKey::generate(KeyAlgorithm::Ecdsa).unwrap();
    let key_pair = rcgen::KeyPair::try_from(root_private.to_pkcs8_der().unwrap().as_slice())
        .unwrap();
    let mut params = rcgen::CertificateParams::new(vec![]).unwrap();
    params.distinguished_name.push(rcgen::DnType::CommonName, GUN);
    let cert_pem = params.self_signed(&key_pair).unwrap().pem().into_bytes();

    let root_public = PublicKey::new(KeyAlgorithm::EcdsaX509, cert_pem.clone());
    signer.add_key_with_id(&root_public.key_id(), RoleName::Root, root_private).unwrap();

    let mut role_keys = BTreeMap::new();
    role_keys.insert(RoleName::Root, vec![root_public]);
    for role in [RoleName::Targets, RoleName::Snapshot, RoleName::Timestamp] {
        let (_, public) = signer.generate(role, KeyAlgorithm::Ecdsa).await.unwrap();
        role_keys.insert(role, vec![public]);
    }

    let mut repo = Repository::new(GUN, signer.clone());
    repo.initialize(&role_keys, false).await.unwrap();

    let certs = CertStore::new();
    certs.add_pinned(&cert_pem).unwrap();

    Scenario { signer, repo, certs }
}

fn publish_target(scenario: &mut Scenario, name: &str, content: &[u8]) {
    use provenant_tuf::changelist::Change;
    let changes = vec![Change::add_target(name, &FileMeta::from_bytes(content)).unwrap()];
    scenario.repo.apply_changes(&changes).unwrap();
}

/// Sign every role and store the four blobs into `store`.
async fn publish_all(scenario: &mut Scenario, store: &MemoryStore) {
    let repo = &mut scenario.repo;
    let root = repo.sign_role(RoleName::Root, default_expires(RoleName::Root)).await.unwrap();
    let root_bytes = root.envelope_bytes().unwrap();
    repo.update_snapshot_entry(RoleName::Root, &root_bytes).unwrap();

    let targets =
        repo.sign_role(RoleName::Targets, default_expires(RoleName::Targets)).await.unwrap();
    let targets_bytes = targets.envelope_bytes().unwrap();
    repo.update_snapshot_entry(RoleName::Targets, &targets_bytes).unwrap();

    let snapshot =
        repo.sign_role(RoleName::Snapshot, default_expires(RoleName::Snapshot)).await.unwrap();
    let snapshot_bytes = snapshot.envelope_bytes().unwrap();
    repo.update_timestamp_entry(&snapshot_bytes).unwrap();

    let timestamp =
        repo.sign_role(RoleName::Timestamp, default_expires(RoleName::Timestamp)).await.unwrap();

    store.set_meta(RoleName::Root, root_bytes).await.unwrap();
    store.set_meta(RoleName::Targets, targets_bytes).await.unwrap();
    store.set_meta(RoleName::Snapshot, snapshot_bytes).await.unwrap();
    store.set_meta(RoleName::Timestamp, timestamp.envelope_bytes().unwrap()).await.unwrap();
}

fn bootstrapper<'a>(
    scenario: &'a Scenario,
    remote: Option<&'a dyn MetadataStore>,
    cache: &'a MemoryStore,
) -> Bootstrapper<'a> {
    Bootstrapper {
        gun: GUN,
        remote,
        cache,
        certs: &scenario.certs,
        signer: scenario.signer.clone() as Arc<dyn Signer>,
    }
}

#[tokio::test]
async fn valid_chain_bootstraps_and_fills_cache() {
    let mut scenario = scenario().await;
    publish_target(&mut scenario, "v1", b"hello");
    let remote = MemoryStore::new();
    publish_all(&mut scenario, &remote).await;

    let cache = MemoryStore::new();
    let repo = bootstrapper(&scenario, Some(&remote), &cache).update().await.unwrap();
    assert!(repo.target_meta("v1").unwrap().matches(b"hello"));

    // The cache now holds everything needed for a later offline read.
    let offline = bootstrapper(&scenario, None, &cache).update().await.unwrap();
    assert!(offline.target_meta("v1").unwrap().matches(b"hello"));
}

#[tokio::test]
async fn expired_timestamp_is_fatal_with_no_cache_fallback() {
    let mut scenario = scenario().await;
    publish_target(&mut scenario, "v1", b"hello");

    // A consumer synced while everything was fresh.
    let remote = MemoryStore::new();
    publish_all(&mut scenario, &remote).await;
    let cache = MemoryStore::new();
    bootstrapper(&scenario, Some(&remote), &cache).update().await.unwrap();

    // The server's timestamp then lapses.
    let expired = scenario
        .repo
        .sign_role(RoleName::Timestamp, Utc::now() - Duration::hours(1))
        .await
        .unwrap();
    remote.set_meta(RoleName::Timestamp, expired.envelope_bytes().unwrap()).await.unwrap();

    let err = bootstrapper(&scenario, Some(&remote), &cache).update().await.unwrap_err();
    assert!(matches!(err, TufError::Expired { role: RoleName::Timestamp, .. }));
}

#[tokio::test]
async fn oversize_targets_fail_before_parsing() {
    let mut scenario = scenario().await;
    publish_target(&mut scenario, "v1", b"hello");
    let remote = MemoryStore::new();
    publish_all(&mut scenario, &remote).await;

    // The snapshot now claims targets are 100 bytes while the server
    // serves ten megabytes of junk for them.
    {
        let snapshot = scenario.repo.snapshot.as_mut().unwrap();
        let entry = snapshot.signed.meta.get_mut("targets").unwrap();
        entry.length = 100;
        entry.hashes.insert("sha256".into(), HexBytes(vec![0u8; 32]));
        snapshot.dirty = true;
    }
    let snapshot = scenario
        .repo
        .sign_role(RoleName::Snapshot, default_expires(RoleName::Snapshot))
        .await
        .unwrap();
    let snapshot_bytes = snapshot.envelope_bytes().unwrap();
    scenario.repo.update_timestamp_entry(&snapshot_bytes).unwrap();
    let timestamp = scenario
        .repo
        .sign_role(RoleName::Timestamp, default_expires(RoleName::Timestamp))
        .await
        .unwrap();
    remote.set_meta(RoleName::Snapshot, snapshot_bytes).await.unwrap();
    remote.set_meta(RoleName::Timestamp, timestamp.envelope_bytes().unwrap()).await.unwrap();
    remote.set_meta(RoleName::Targets, vec![0x7b; 10 * 1024 * 1024]).await.unwrap();

    let cache = MemoryStore::new();
    let err = bootstrapper(&scenario, Some(&remote), &cache).update().await.unwrap_err();
    assert!(matches!(err, TufError::Malicious(_)));
}

#[tokio::test]
async fn version_regression_is_rejected_as_rollback() {
    let mut scenario = scenario().await;
    publish_target(&mut scenario, "v1", b"hello");
    let remote = MemoryStore::new();
    publish_all(&mut scenario, &remote).await;

    // Cache already saw a much newer timestamp.
    let cache = MemoryStore::new();
    bootstrapper(&scenario, Some(&remote), &cache).update().await.unwrap();
    {
        let timestamp = scenario.repo.timestamp.as_mut().unwrap();
        timestamp.signed.version = 40;
        timestamp.dirty = false;
    }
    let newer = scenario
        .repo
        .sign_role(RoleName::Timestamp, default_expires(RoleName::Timestamp))
        .await
        .unwrap();
    cache.set_meta(RoleName::Timestamp, newer.envelope_bytes().unwrap()).await.unwrap();

    let err = bootstrapper(&scenario, Some(&remote), &cache).update().await.unwrap_err();
    assert!(matches!(err, TufError::Rollback { role: RoleName::Timestamp, .. }));
}

/// A remote that serves root but drops the connection for everything else.
struct FlakyStore {
    inner: MemoryStore,
}

#[async_trait]
impl MetadataStore for FlakyStore {
    async fn get_meta(&self, role: RoleName, max_size: u64) -> Result<Vec<u8>> {
        if role == RoleName::Root {
            self.inner.get_meta(role, max_size).await
        } else {
            Err(TufError::ServerUnavailable { code: 503 })
        }
    }
    async fn set_meta(&self, role: RoleName, bytes: Vec<u8>) -> Result<()> {
        self.inner.set_meta(role, bytes).await
    }
    async fn set_multi(&self, updates: BTreeMap<RoleName, Vec<u8>>) -> Result<()> {
        self.inner.set_multi(updates).await
    }
    async fn get_key(&self, role: RoleName) -> Result<PublicKey> {
        self.inner.get_key(role).await
    }
    async fn rotate_key(&self, role: RoleName, request: Signed) -> Result<PublicKey> {
        self.inner.rotate_key(role, request).await
    }
    async fn remove_all(&self) -> Result<()> {
        self.inner.remove_all().await
    }
}

#[tokio::test]
async fn transport_failures_fall_back_to_a_validating_cache() {
    let mut scenario = scenario().await;
    publish_target(&mut scenario, "v1", b"hello");
    let remote = MemoryStore::new();
    publish_all(&mut scenario, &remote).await;

    // Prime the cache while the remote is healthy.
    let cache = MemoryStore::new();
    bootstrapper(&scenario, Some(&remote), &cache).update().await.unwrap();

    // The remote degrades; reads keep working from the validated cache.
    let flaky = FlakyStore { inner: remote };
    let repo = bootstrapper(&scenario, Some(&flaky), &cache).update().await.unwrap();
    assert!(repo.target_meta("v1").unwrap().matches(b"hello"));
}

#[tokio::test]
async fn no_remote_and_no_cache_is_repository_not_found() {
    let scenario = scenario().await;
    let cache = MemoryStore::new();
    let err = bootstrapper(&scenario, None, &cache).update().await.unwrap_err();
    assert!(matches!(err, TufError::RepositoryNotFound(_)));
}
