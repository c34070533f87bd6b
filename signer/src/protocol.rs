//! Wire types for the signing service RPC.
//!
//! The channel is JSON over mutually-authenticated HTTPS. The byte layout
//! is deliberately simple; what matters to the rest of the system is the
//! contract: a signer never returns private key material, and every
//! response is attributable to a key id.

use serde::{Deserialize, Serialize};

use provenant_tuf::data::{KeyAlgorithm, PublicKey, RoleName, SigMethod};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub key_id: String,
    /// Base64 of the bytes to sign.
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignResponse {
    pub key_id: String,
    pub method: SigMethod,
    /// Base64 signature bytes. ECDSA may be DER or raw `r || s`; the
    /// client normalizes. Ed25519 must be raw; RSA is PKCS#1 v1.5.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub role: RoleName,
    pub algorithm: KeyAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyResponse {
    pub key_id: String,
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub key_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_request_round_trips() {
        let req = SignRequest { key_id: "ab".repeat(32), content: "aGVsbG8=".into() };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: SignRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.key_id, req.key_id);
        assert_eq!(parsed.content, "aGVsbG8=");
    }

    #[test]
    fn generate_request_uses_wire_names() {
        let req = GenerateRequest { role: RoleName::Targets, algorithm: KeyAlgorithm::EcdsaX509 };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"targets\""));
        assert!(json.contains("\"ecdsa-x509\""));
    }
}
