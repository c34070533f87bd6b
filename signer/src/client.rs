//! RPC client for a remote signing service.
//!
//! The remote holds private key material and never surrenders it; this
//! client only asks it to sign. Every response signature is re-verified
//! locally against the known public key before being returned; a signer
//! that produces an unverifiable signature is misbehaving and the request
//! fails hard.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::RwLock;
use reqwest::StatusCode;

use provenant_tuf::crypto::{normalize_ecdsa_signature, verify_signature};
use provenant_tuf::data::{KeyAlgorithm, PublicKey, RoleName, SigMethod, Signature};
use provenant_tuf::error::{Result, TufError};
use provenant_tuf::signer::{Signer, SignerHealth, SIGNER_DIAL_TIMEOUT, SIGNER_OP_TIMEOUT};

use crate::protocol::{
    ErrorBody, GenerateRequest, HealthResponse, KeyResponse, ListResponse, SignRequest,
    SignResponse,
};

/// Mutual-TLS material for the signer channel.
///
/// Either the client presents a certificate and key and pins the service
/// CA, or none of the three are set. Anything in between is a
/// configuration error.
#[derive(Debug, Clone, Default)]
pub struct SignerTlsConfig {
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
}

impl SignerTlsConfig {
    fn validate(&self) -> Result<()> {
        let set = [&self.client_cert, &self.client_key, &self.ca_cert];
        let present = set.iter().filter(|o| o.is_some()).count();
        if present != 0 && present != 3 {
            return Err(TufError::InvalidOperation {
                msg: "signer TLS requires client cert, client key and CA together, or none"
                    .to_string(),
            });
        }
        Ok(())
    }
}

pub struct RemoteSigner {
    base_url: String,
    client: reqwest::Client,
    /// Public keys fetched from the service, kept for response
    /// re-verification.
    known_keys: RwLock<HashMap<String, PublicKey>>,
}

impl RemoteSigner {
    pub fn new(base_url: &str, tls: SignerTlsConfig) -> Result<Self> {
        Self::with_timeouts(base_url, tls, SIGNER_OP_TIMEOUT, SIGNER_DIAL_TIMEOUT)
    }

    pub fn with_timeouts(
        base_url: &str,
        tls: SignerTlsConfig,
        op_timeout: Duration,
        dial_timeout: Duration,
    ) -> Result<Self> {
        tls.validate()?;
        let mut builder = reqwest::Client::builder()
            .timeout(op_timeout)
            .connect_timeout(dial_timeout);

        if let (Some(cert), Some(key), Some(ca)) = (&tls.client_cert, &tls.client_key, &tls.ca_cert)
        {
            let mut identity_pem = std::fs::read(cert)?;
            identity_pem.extend_from_slice(&std::fs::read(key)?);
            let identity = reqwest::Identity::from_pem(&identity_pem)
                .map_err(|e| TufError::InvalidOperation { msg: format!("client identity: {}", e) })?;
            let ca = reqwest::Certificate::from_pem(&std::fs::read(ca)?)
                .map_err(|e| TufError::InvalidOperation { msg: format!("signer CA: {}", e) })?;
            builder = builder
                .identity(identity)
                .add_root_certificate(ca)
                .tls_built_in_root_certs(false);
        }

        let client = builder
            .build()
            .map_err(|e| TufError::InvalidOperation { msg: format!("signer client: {}", e) })?;
        Ok(RemoteSigner {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            known_keys: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn translate_send_error(e: reqwest::Error) -> TufError {
        if e.is_timeout() {
            TufError::Timeout(e.to_string())
        } else {
            TufError::SignerUnavailable(e.to_string())
        }
    }

    async fn translate_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            let body = resp.bytes().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_slice::<ErrorBody>(&body) {
                if err.code == "unknown_key" {
                    return Err(TufError::UnknownKey(err.message));
                }
            }
            return Err(TufError::UnknownKey(String::new()));
        }
        let body = resp.bytes().await.unwrap_or_default();
        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => Err(TufError::SignerUnavailable(format!("{}: {}", err.code, err.message))),
            Err(_) => Err(TufError::SignerUnavailable(format!("signer returned {}", status))),
        }
    }

    async fn known_key(&self, key_id: &str) -> Result<PublicKey> {
        if let Some(key) = self.known_keys.read().get(key_id) {
            return Ok(key.clone());
        }
        let key = self.fetch_key(key_id).await?;
        self.known_keys.write().insert(key_id.to_string(), key.clone());
        Ok(key)
    }

    async fn fetch_key(&self, key_id: &str) -> Result<PublicKey> {
        let resp = self
            .client
            .get(self.url(&format!("/v1/keys/{}", key_id)))
            .send()
            .await
            .map_err(Self::translate_send_error)?;
        let resp = Self::translate_status(resp).await?;
        let body: KeyResponse =
            resp.json().await.map_err(|e| TufError::SignerUnavailable(e.to_string()))?;
        Ok(body.public_key)
    }

    /// Bring a signature from the service into the wire form, enforcing the
    /// per-algorithm encoding rules.
    fn normalize(method: SigMethod, key_id: &str, raw: Vec<u8>) -> Result<Vec<u8>> {
        match method {
            SigMethod::Ecdsa => normalize_ecdsa_signature(&raw)
                .map_err(|_| TufError::SignerMisbehaving(key_id.to_string())),
            SigMethod::Ed25519 => {
                if raw.len() != 64 {
                    return Err(TufError::SignerMisbehaving(key_id.to_string()));
                }
                Ok(raw)
            }
            SigMethod::RsaPkcs1v15 => Ok(raw),
        }
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    async fn sign(&self, key_id: &str, message: &[u8]) -> Result<Signature> {
        let public = self.known_key(key_id).await?;
        let request = SignRequest { key_id: key_id.to_string(), content: BASE64.encode(message) };
        let resp = self
            .client
            .post(self.url("/v1/sign"))
            .json(&request)
            .send()
            .await
            .map_err(Self::translate_send_error)?;
        let resp = Self::translate_status(resp).await?;
        let body: SignResponse =
            resp.json().await.map_err(|e| TufError::SignerUnavailable(e.to_string()))?;

        if body.key_id != key_id {
            return Err(TufError::SignerMisbehaving(key_id.to_string()));
        }
        let raw = BASE64
            .decode(&body.signature)
            .map_err(|_| TufError::SignerMisbehaving(key_id.to_string()))?;
        let sig = Self::normalize(body.method, key_id, raw)?;

        // The service's word is not enough: check the signature against the
        // public key we already know before handing it to anyone.
        if !verify_signature(&public, body.method, message, &sig)? {
            return Err(TufError::SignerMisbehaving(key_id.to_string()));
        }

        Ok(Signature { key_id: key_id.to_string(), method: body.method, sig })
    }

    async fn public_key(&self, key_id: &str) -> Result<PublicKey> {
        self.known_key(key_id).await
    }

    async fn generate(
        &self,
        role: RoleName,
        algorithm: KeyAlgorithm,
    ) -> Result<(String, PublicKey)> {
        let request = GenerateRequest { role, algorithm };
        let resp = self
            .client
            .post(self.url("/v1/keys"))
            .json(&request)
            .send()
            .await
            .map_err(Self::translate_send_error)?;
        let resp = Self::translate_status(resp).await?;
        let body: KeyResponse =
            resp.json().await.map_err(|e| TufError::SignerUnavailable(e.to_string()))?;
        self.known_keys.write().insert(body.key_id.clone(), body.public_key.clone());
        Ok((body.key_id, body.public_key))
    }

    async fn remove(&self, key_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/v1/keys/{}", key_id)))
            .send()
            .await
            .map_err(Self::translate_send_error)?;
        Self::translate_status(resp).await?;
        self.known_keys.write().remove(key_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(self.url("/v1/keys"))
            .send()
            .await
            .map_err(Self::translate_send_error)?;
        let resp = Self::translate_status(resp).await?;
        let body: ListResponse =
            resp.json().await.map_err(|e| TufError::SignerUnavailable(e.to_string()))?;
        Ok(body.key_ids)
    }

    async fn health(&self, timeout: Duration) -> SignerHealth {
        let result = self
            .client
            .get(self.url("/v1/health"))
            .timeout(timeout)
            .send()
            .await;
        let resp = match result {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return SignerHealth::Unreachable("deadline exceeded".into()),
            Err(e) => return SignerHealth::Unreachable(e.to_string()),
        };
        if !resp.status().is_success() {
            return SignerHealth::Unhealthy(format!("signer returned {}", resp.status()));
        }
        match resp.json::<HealthResponse>().await {
            Ok(health) if health.status == "ok" => SignerHealth::Ok,
            Ok(health) => SignerHealth::Unhealthy(health.status),
            Err(e) => SignerHealth::Unhealthy(e.to_string()),
        }
    }
}
