//! HTTP metadata transport.
//!
//! Role endpoints live under `<base>/v2/<gun>/_trust/tuf/`:
//! `GET <role>.json` fetches a blob, `POST /` with multipart `files`
//! fields uploads several roles atomically, `GET/POST <role>.key` reads
//! or rotates a server-managed key. Non-2xx responses carry the error
//! envelope `{"errors": [{"detail": {code, message}}]}`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::data::{PublicKey, RoleName, Signed};
use crate::error::{Result, TufError};
use crate::store::{MetadataStore, WireError};

/// Connection settings for the remote transport.
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub gun: String,
    /// Per-request deadline.
    pub timeout: Duration,
    /// TCP connect deadline.
    pub connect_timeout: Duration,
}

impl HttpStoreConfig {
    pub fn new(base_url: &str, gun: &str) -> Self {
        HttpStoreConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            gun: gun.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct HttpStore {
    config: HttpStoreConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    detail: Option<WireError>,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TufError::InvalidOperation { msg: format!("http client: {}", e) })?;
        Ok(HttpStore { config, client })
    }

    fn meta_url(&self, name: &str) -> String {
        format!("{}/v2/{}/_trust/tuf/{}", self.config.base_url, self.config.gun, name)
    }

    fn translate_send_error(e: reqwest::Error) -> TufError {
        if e.is_timeout() {
            TufError::Timeout(e.to_string())
        } else if e.is_connect() {
            TufError::Offline
        } else {
            TufError::ServerUnavailable { code: 0 }
        }
    }

    /// Map a non-2xx response to a typed error, decoding the envelope when
    /// the server sent one.
    async fn translate_status(resp: reqwest::Response, resource: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        match status {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(TufError::MetaNotFound(resource.to_string())),
            StatusCode::UNAUTHORIZED => Err(TufError::ServerUnavailable { code: 401 }),
            StatusCode::TOO_MANY_REQUESTS => {
                Err(TufError::InvalidOperation { msg: format!("{} rate limited", resource) })
            }
            StatusCode::CONFLICT | StatusCode::BAD_REQUEST => {
                let fallback = TufError::InvalidOperation { msg: resource.to_string() };
                let Ok(body) = resp.bytes().await else { return Err(fallback) };
                let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(&body) else {
                    return Err(fallback);
                };
                let Some(detail) = envelope.errors.into_iter().find_map(|e| e.detail) else {
                    return Err(fallback);
                };
                Err(wire_error_to_tuf(detail))
            }
            s => Err(TufError::ServerUnavailable { code: s.as_u16() }),
        }
    }

    /// Read a body while enforcing the size cap, both from the declared
    /// Content-Length and from the bytes actually received.
    async fn read_capped(resp: reqwest::Response, cap: u64, resource: &str) -> Result<Vec<u8>> {
        if let Some(declared) = resp.content_length() {
            if declared > cap {
                return Err(TufError::Malicious(resource.to_string()));
            }
        }
        let mut body: Vec<u8> = Vec::new();
        let mut resp = resp;
        while let Some(chunk) =
            resp.chunk().await.map_err(|e| TufError::Timeout(e.to_string()))?
        {
            if body.len() as u64 + chunk.len() as u64 > cap {
                return Err(TufError::Malicious(resource.to_string()));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Decode an envelope error back into the typed error it came from.
fn wire_error_to_tuf(err: WireError) -> TufError {
    match err.code.as_str() {
        "conflict" => {
            let role = err.message.parse().unwrap_or(RoleName::Root);
            TufError::Conflict { role }
        }
        "expired" => TufError::Expired { role: RoleName::Timestamp, expires: err.message },
        "bad_root" | "rotation_unsigned" => TufError::BadRoot(err.message),
        "bad_targets" => TufError::BadTargets(err.message),
        "bad_snapshot" => TufError::BadSnapshot(err.message),
        "invalid_hierarchy" => TufError::InvalidHierarchy,
        "orphaned_timestamp_key" => TufError::OrphanedTimestampKey,
        _ => TufError::InvalidOperation { msg: err.message },
    }
}

#[async_trait]
impl MetadataStore for HttpStore {
    async fn get_meta(&self, role: RoleName, max_size: u64) -> Result<Vec<u8>> {
        let resource = format!("{}.json", role);
        let resp = self
            .client
            .get(self.meta_url(&resource))
            .send()
            .await
            .map_err(Self::translate_send_error)?;
        let resp = Self::translate_status(resp, &resource).await?;
        Self::read_capped(resp, max_size, &resource).await
    }

    async fn set_meta(&self, role: RoleName, bytes: Vec<u8>) -> Result<()> {
        let mut updates = BTreeMap::new();
        updates.insert(role, bytes);
        self.set_multi(updates).await
    }

    async fn set_multi(&self, updates: BTreeMap<RoleName, Vec<u8>>) -> Result<()> {
        let mut form = reqwest::multipart::Form::new();
        for (role, bytes) in updates {
            let part = reqwest::multipart::Part::bytes(bytes)
                .file_name(format!("{}.json", role))
                .mime_str("application/json")
                .map_err(|e| TufError::InvalidOperation { msg: e.to_string() })?;
            form = form.part("files", part);
        }
        let resp = self
            .client
            .post(self.meta_url(""))
            .multipart(form)
            .send()
            .await
            .map_err(Self::translate_send_error)?;
        Self::translate_status(resp, "metadata upload").await?;
        Ok(())
    }

    async fn get_key(&self, role: RoleName) -> Result<PublicKey> {
        let resource = format!("{}.key", role);
        let resp = self
            .client
            .get(self.meta_url(&resource))
            .send()
            .await
            .map_err(Self::translate_send_error)?;
        let resp = Self::translate_status(resp, &resource).await?;
        let body = Self::read_capped(resp, super::MAX_TIMESTAMP_BYTES, &resource).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn rotate_key(&self, role: RoleName, request: Signed) -> Result<PublicKey> {
        let resource = format!("{} key rotation", role);
        let resp = self
            .client
            .post(self.meta_url(&format!("{}.key", role)))
            .json(&request)
            .send()
            .await
            .map_err(Self::translate_send_error)?;
        let resp = Self::translate_status(resp, &resource).await?;
        let body = Self::read_capped(resp, super::MAX_TIMESTAMP_BYTES, &resource).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn remove_all(&self) -> Result<()> {
        Err(TufError::InvalidOperation { msg: "cannot delete remote metadata".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_per_gun() {
        let store =
            HttpStore::new(HttpStoreConfig::new("https://trust.example.com/", "example.com/app"))
                .unwrap();
        assert_eq!(
            store.meta_url("root.json"),
            "https://trust.example.com/v2/example.com/app/_trust/tuf/root.json"
        );
    }

    #[test]
    fn wire_errors_map_back_to_kinds() {
        let err = wire_error_to_tuf(WireError { code: "conflict".into(), message: "targets".into() });
        assert!(matches!(err, TufError::Conflict { role: RoleName::Targets }));

        let err = wire_error_to_tuf(WireError { code: "invalid_hierarchy".into(), message: String::new() });
        assert!(matches!(err, TufError::InvalidHierarchy));

        let err = wire_error_to_tuf(WireError { code: "whatever".into(), message: "m".into() });
        assert!(matches!(err, TufError::InvalidOperation { .. }));
    }
}
