//! A trusted collection: the publisher/consumer handle for one GUN.
//!
//! Owns the on-disk trust layout (`<trust_dir>/private` for encrypted
//! keys, `<trust_dir>/<gun>/metadata` for the cache, `<trust_dir>/<gun>/
//! changelist` for staged edits, `<trust_dir>/trusted_certificates` and
//! `<trust_dir>/root_cas` for the pinned and CA partitions) and wires the
//! engine, signer, stores and bootstrap together.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};

use provenant_tuf::certstore::CertStore;
use provenant_tuf::changelist::{Change, Changelist, FileChangelist};
use provenant_tuf::crypto::PrivateKey;
use provenant_tuf::data::{FileMeta, KeyAlgorithm, PublicKey, RoleName};
use provenant_tuf::error::{Result, TufError};
use provenant_tuf::keystore::{KeyRecord, KeyStore};
use provenant_tuf::repo::Repository;
use provenant_tuf::signer::{LocalSigner, PassphraseRetriever, Signer};
use provenant_tuf::store::{FilesystemStore, HttpStore, HttpStoreConfig, MetadataStore};

use crate::bootstrap::Bootstrapper;

/// Root certificates issued at init are good for ten years.
fn root_cert_validity() -> Duration {
    Duration::days(10 * 365)
}

pub struct TrustedCollection {
    gun: String,
    trust_dir: PathBuf,
    server_url: Option<String>,
    signer: Arc<LocalSigner>,
    keys: KeyStore,
    certs: CertStore,
    cache: FilesystemStore,
    changelist: FileChangelist,
}

impl TrustedCollection {
    /// Open (creating directories as needed) the collection state under
    /// `trust_dir`.
    pub async fn open(
        trust_dir: impl Into<PathBuf>,
        gun: &str,
        server_url: Option<String>,
        retriever: Box<dyn PassphraseRetriever>,
    ) -> Result<Self> {
        let trust_dir = trust_dir.into();
        let signer = Arc::new(LocalSigner::new(trust_dir.join("private"), gun, retriever)?);
        let keys = KeyStore::new(signer.clone());

        // Records for keys already on disk, so signing works across runs.
        let mut records = Vec::new();
        for key_id in signer.list().await? {
            if let Ok(role) = signer.key_role(&key_id) {
                records.push((key_id, KeyRecord { role, gun: gun.to_string(), remote_id: None }));
            }
        }
        keys.hydrate(records);

        let certs = CertStore::new();
        certs.load_dir(&trust_dir.join("trusted_certificates"), true)?;
        certs.load_dir(&trust_dir.join("root_cas"), false)?;

        let cache = FilesystemStore::new(&trust_dir, gun)?;
        let changelist = FileChangelist::new(trust_dir.join(gun).join("changelist"))?;

        Ok(TrustedCollection {
            gun: gun.to_string(),
            trust_dir,
            server_url,
            signer,
            keys,
            certs,
            cache,
            changelist,
        })
    }

    pub fn gun(&self) -> &str {
        &self.gun
    }

    fn remote(&self) -> Result<HttpStore> {
        let url = self.server_url.as_deref().ok_or(TufError::Offline)?;
        HttpStore::new(HttpStoreConfig::new(url, &self.gun))
    }

    /// Initialize the collection: provision the four role keys, build the
    /// version-1 metadata and persist it locally. The timestamp key comes
    /// from the server; root, targets and snapshot keys are local.
    pub async fn init(&self) -> Result<()> {
        let remote = self.remote()?;

        // The root key is published as an x509 certificate binding the key
        // to this GUN; the certificate is pinned locally as the trust
        // anchor for future bootstraps.
        let root_private = PrivateKey::generate(KeyAlgorithm::Ecdsa)?;
        let (root_public, cert_pem) = self.certify_root_key(&root_private)?;
        let root_key_id = root_public.key_id();
        self.signer.add_key_with_id(&root_key_id, RoleName::Root, &root_private)?;
        self.keys.add_key(
            &root_key_id,
            KeyRecord { role: RoleName::Root, gun: self.gun.clone(), remote_id: None },
        );
        self.pin_certificate(&cert_pem)?;

        let timestamp_key = remote.get_key(RoleName::Timestamp).await?;
        debug!(gun = %self.gun, key_id = %timestamp_key.key_id(), "fetched server timestamp key");

        let (_, targets_key) =
            self.keys.generate_key(RoleName::Targets, &self.gun, KeyAlgorithm::Ecdsa).await?;
        // The key store only creates root and targets keys; the snapshot
        // key is provisioned at the signer layer.
        let (snapshot_key_id, snapshot_key) =
            self.signer.generate(RoleName::Snapshot, KeyAlgorithm::Ecdsa).await?;
        self.keys.add_key(
            &snapshot_key_id,
            KeyRecord { role: RoleName::Snapshot, gun: self.gun.clone(), remote_id: None },
        );

        let mut role_keys: BTreeMap<RoleName, Vec<PublicKey>> = BTreeMap::new();
        role_keys.insert(RoleName::Root, vec![root_public]);
        role_keys.insert(RoleName::Targets, vec![targets_key]);
        role_keys.insert(RoleName::Snapshot, vec![snapshot_key]);
        role_keys.insert(RoleName::Timestamp, vec![timestamp_key]);

        let mut repo = Repository::new(self.gun.clone(), self.signer.clone() as Arc<dyn Signer>);
        repo.initialize(&role_keys, false).await?;
        repo.save_to_cache(&self.cache).await?;
        info!(gun = %self.gun, "initialized trusted collection");
        Ok(())
    }

    /// Issue the self-signed certificate that carries the root key.
    fn certify_root_key(&self, private: &PrivateKey) -> Result<(PublicKey, Vec<u8>)> {
        let der = private.to_pkcs8_der()?;
        let key_pair = rcgen::KeyPair::try_from(der.as_slice())
            .map_err(|e| TufError::Certificate(e.to_string()))?;

        let mut params = rcgen::CertificateParams::new(vec![])
            .map_err(|e| TufError::Certificate(e.to_string()))?;
        params.distinguished_name.push(rcgen::DnType::CommonName, &self.gun);
        use chrono::Datelike;
        let now = Utc::now();
        let expiry = now + root_cert_validity();
        params.not_before = rcgen::date_time_ymd(now.year(), now.month() as u8, now.day() as u8);
        params.not_after =
            rcgen::date_time_ymd(expiry.year(), expiry.month() as u8, expiry.day() as u8);

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| TufError::Certificate(e.to_string()))?;
        let pem = cert.pem().into_bytes();
        Ok((PublicKey::new(KeyAlgorithm::EcdsaX509, pem.clone()), pem))
    }

    /// Pin a certificate in memory and on disk.
    fn pin_certificate(&self, pem: &[u8]) -> Result<()> {
        let fingerprint = self.certs.add_pinned(pem)?;
        let dir = self.trust_dir.join("trusted_certificates");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(format!("{}.pem", fingerprint)), pem)?;
        Ok(())
    }

    /// Stage adding `name` with the content of `payload`.
    pub fn stage_add_target(&self, name: &str, payload: &[u8]) -> Result<()> {
        let meta = FileMeta::from_bytes(payload);
        debug!(gun = %self.gun, name, length = meta.length, "staging target addition");
        self.changelist.add(Change::add_target(name, &meta)?)
    }

    /// Stage removing `name`.
    pub fn stage_remove_target(&self, name: &str) -> Result<()> {
        debug!(gun = %self.gun, name, "staging target removal");
        self.changelist.add(Change::remove_target(name))
    }

    /// Staged, unpublished edits in replay order.
    pub fn staged_changes(&self) -> Result<Vec<Change>> {
        self.changelist.list()
    }

    /// Replace the local key for targets or snapshot, staged through the
    /// changelist and effective at the next publish.
    pub async fn rotate_key(&self, role: RoleName) -> Result<PublicKey> {
        if !matches!(role, RoleName::Targets | RoleName::Snapshot) {
            return Err(TufError::InvalidOperation {
                msg: format!("cannot rotate {} key locally", role),
            });
        }
        let private = PrivateKey::generate(KeyAlgorithm::Ecdsa)?;
        let public = private.public_key()?;
        let key_id = self.signer.add_key(role, &private)?;
        self.keys
            .add_key(&key_id, KeyRecord { role, gun: self.gun.clone(), remote_id: None });
        self.changelist.add(Change::rotate_role_keys(role, &[public.clone()])?)?;
        info!(gun = %self.gun, %role, key_id, "staged key rotation");
        Ok(public)
    }

    /// Ask the server to rotate a key it holds (timestamp, or snapshot
    /// when snapshot signing was delegated). The request is a short-lived
    /// statement signed with the root key, proving rotation capability.
    pub async fn rotate_server_key(&self, role: RoleName) -> Result<PublicKey> {
        let remote = self.remote()?;
        let root_ids = self.keys.keys_for_role(&self.gun, RoleName::Root);
        let key_id = root_ids
            .first()
            .ok_or(TufError::InsufficientKeys { role: RoleName::Root })?;

        let body = serde_json::json!({
            "_type": role.body_type(),
            "version": 0,
            "expires": Utc::now() + Duration::minutes(5),
        });
        let message = provenant_tuf::canonical::to_canonical_json(&body)?;
        let signature = self.signer.sign(key_id, &message).await?;
        let request = provenant_tuf::data::Signed { signed: body, signatures: vec![signature] };

        let key = remote.rotate_key(role, request).await?;
        info!(gun = %self.gun, %role, key_id = %key.key_id(), "server rotated key");
        Ok(key)
    }

    /// Publish staged changes to the server.
    pub async fn publish(&self) -> Result<()> {
        let remote = self.remote()?;
        let mut repo = Repository::new(self.gun.clone(), self.signer.clone() as Arc<dyn Signer>);
        repo.publish(&remote, Some(&self.cache), &self.changelist).await?;
        repo.save_to_cache(&self.cache).await?;
        info!(gun = %self.gun, "published");
        Ok(())
    }

    /// Fetch and validate the collection, returning the verified repo.
    pub async fn update(&self) -> Result<Repository> {
        let remote = match self.remote() {
            Ok(remote) => Some(remote),
            Err(TufError::Offline) => None,
            Err(e) => return Err(e),
        };
        let bootstrapper = Bootstrapper {
            gun: &self.gun,
            remote: remote.as_ref().map(|r| r as &dyn MetadataStore),
            cache: &self.cache,
            certs: &self.certs,
            signer: self.signer.clone(),
        };
        bootstrapper.update().await
    }

    /// All trusted targets.
    pub async fn list_targets(&self) -> Result<Vec<(String, FileMeta)>> {
        self.update().await?.list_targets()
    }

    /// Trust data for one target.
    pub async fn lookup(&self, name: &str) -> Result<FileMeta> {
        self.update().await?.target_meta(name)
    }

    /// Check `payload` against the trusted hashes for `name`.
    pub async fn verify_payload(&self, name: &str, payload: &[u8]) -> Result<FileMeta> {
        let meta = self.lookup(name).await?;
        if !meta.matches(payload) {
            return Err(TufError::InvalidOperation {
                msg: format!("payload does not match trust data for {}", name),
            });
        }
        Ok(meta)
    }

    /// Trust directory helper, mostly for diagnostics.
    pub fn trust_dir(&self) -> &Path {
        &self.trust_dir
    }
}
