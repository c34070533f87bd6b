//! Embedded signing service.
//!
//! Exposes the signer RPC over HTTP for any `Signer` backend, normally a
//! passphrase-protected `LocalSigner`. TLS termination and client
//! authentication sit in front of this service; its own process model is
//! deliberately out of scope.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tower_http::trace::TraceLayer;

use provenant_tuf::error::TufError;
use provenant_tuf::signer::{Signer, SignerHealth, SIGNER_OP_TIMEOUT};

use crate::protocol::{
    ErrorBody, GenerateRequest, HealthResponse, KeyResponse, ListResponse, SignRequest,
    SignResponse,
};

#[derive(Clone)]
pub struct ServiceState {
    signer: Arc<dyn Signer>,
}

pub fn build_router(signer: Arc<dyn Signer>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/sign", post(sign))
        .route("/v1/keys", post(generate).get(list))
        .route("/v1/keys/:key_id", get(key_info).delete(remove))
        .layer(TraceLayer::new_for_http())
        .with_state(ServiceState { signer })
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn to_api_error(err: TufError) -> ApiError {
    let (status, code) = match &err {
        TufError::UnknownKey(_) => (StatusCode::NOT_FOUND, "unknown_key"),
        TufError::PassphraseInvalid(_) => (StatusCode::INTERNAL_SERVER_ERROR, "passphrase_invalid"),
        TufError::InvalidOperation { .. } => (StatusCode::BAD_REQUEST, "invalid_operation"),
        TufError::InvalidKey(_) => (StatusCode::BAD_REQUEST, "invalid_key"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    (status, Json(ErrorBody { code: code.to_string(), message: err.to_string() }))
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    let status = match state.signer.health(SIGNER_OP_TIMEOUT).await {
        SignerHealth::Ok => "ok".to_string(),
        SignerHealth::Unhealthy(msg) => format!("unhealthy: {}", msg),
        SignerHealth::Unreachable(msg) => format!("unreachable: {}", msg),
    };
    Json(HealthResponse { status })
}

async fn sign(
    State(state): State<ServiceState>,
    Json(request): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    let message = BASE64.decode(&request.content).map_err(|e| {
        to_api_error(TufError::InvalidOperation { msg: format!("content is not base64: {}", e) })
    })?;
    let signature = state.signer.sign(&request.key_id, &message).await.map_err(to_api_error)?;
    Ok(Json(SignResponse {
        key_id: signature.key_id,
        method: signature.method,
        signature: BASE64.encode(signature.sig),
    }))
}

async fn generate(
    State(state): State<ServiceState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<KeyResponse>, ApiError> {
    let (key_id, public_key) = state
        .signer
        .generate(request.role, request.algorithm)
        .await
        .map_err(to_api_error)?;
    Ok(Json(KeyResponse { key_id, public_key }))
}

async fn key_info(
    State(state): State<ServiceState>,
    Path(key_id): Path<String>,
) -> Result<Json<KeyResponse>, ApiError> {
    let public_key = state.signer.public_key(&key_id).await.map_err(to_api_error)?;
    Ok(Json(KeyResponse { key_id, public_key }))
}

async fn remove(
    State(state): State<ServiceState>,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.signer.remove(&key_id).await.map_err(to_api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list(State(state): State<ServiceState>) -> Result<Json<ListResponse>, ApiError> {
    let key_ids = state.signer.list().await.map_err(to_api_error)?;
    Ok(Json(ListResponse { key_ids }))
}
