//! HTTP surface of the trust server.
//!
//! Role endpoints live under `/v2/<gun>/_trust/tuf/`. GUNs contain
//! slashes, so routing goes through a single wildcard and the path is
//! split on the `_trust/tuf` marker. Validation and persistence for one
//! GUN run under a per-GUN lock; different GUNs proceed in parallel.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use parking_lot::Mutex;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use provenant_tuf::data::{Root, RoleName, Signed};
use provenant_tuf::error::TufError;
use provenant_tuf::store::{WireError, MAX_DOWNLOAD_BYTES};
use provenant_tuf::verify::{verify_signed, SignedCommon};

use crate::keys::KeyService;
use crate::storage::ServerStorage;
use crate::timestamp::current_timestamp;
use crate::validation::validate_update;

/// Per-GUN advisory locks serializing validate+persist.
#[derive(Default)]
pub struct GunLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl GunLocks {
    pub fn lock_for(&self, gun: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner.lock().entry(gun.to_string()).or_default().clone()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn ServerStorage>,
    pub keys: Arc<KeyService>,
    pub locks: Arc<GunLocks>,
}

pub fn build_router(storage: Arc<dyn ServerStorage>, keys: Arc<KeyService>) -> Router {
    let state = AppState { storage, keys, locks: Arc::new(GunLocks::default()) };
    Router::new()
        .route("/v2/", get(health))
        .route("/v2/*path", get(get_resource).post(post_resource))
        .layer(RequestBodyLimitLayer::new(MAX_DOWNLOAD_BYTES as usize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

/// Serialize a typed error into the wire envelope
/// `{"errors": [{"detail": {code, message}}]}`.
fn envelope(err: TufError) -> ApiError {
    let (status, code) = match &err {
        TufError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
        TufError::Expired { .. } => (StatusCode::BAD_REQUEST, "expired"),
        TufError::BadRoot(_) => (StatusCode::BAD_REQUEST, "bad_root"),
        TufError::RotationUnsigned { .. } => (StatusCode::BAD_REQUEST, "rotation_unsigned"),
        TufError::BadTargets(_) => (StatusCode::BAD_REQUEST, "bad_targets"),
        TufError::BadSnapshot(_) => (StatusCode::BAD_REQUEST, "bad_snapshot"),
        TufError::InvalidHierarchy => (StatusCode::BAD_REQUEST, "invalid_hierarchy"),
        TufError::OrphanedTimestampKey => (StatusCode::BAD_REQUEST, "orphaned_timestamp_key"),
        TufError::InsufficientSignatures { .. } => (StatusCode::BAD_REQUEST, "validation"),
        TufError::WrongType { .. } => (StatusCode::BAD_REQUEST, "validation"),
        TufError::MetaNotFound(_) | TufError::NotFound(_) | TufError::RepositoryNotFound(_) => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        TufError::InvalidOperation { .. } | TufError::Json(_) => {
            (StatusCode::BAD_REQUEST, "validation")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };
    let message = match &err {
        // The conflict message carries the role so clients can rebase.
        TufError::Conflict { role } => role.to_string(),
        other => other.to_string(),
    };
    let detail = WireError { code: code.to_string(), message };
    (status, Json(serde_json::json!({ "errors": [{ "detail": detail }] })))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Split `<gun>/_trust/tuf/<file>` into its parts.
fn split_trust_path(path: &str) -> Option<(&str, &str)> {
    let marker = "/_trust/tuf/";
    let idx = path.find(marker)?;
    let gun = &path[..idx];
    let file = &path[idx + marker.len()..];
    if gun.is_empty() {
        return None;
    }
    Some((gun, file))
}

async fn get_resource(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let Some((gun, file)) = split_trust_path(&path) else {
        return Err(envelope(TufError::InvalidOperation { msg: format!("bad path {}", path) }));
    };

    if let Some(role) = file.strip_suffix(".json") {
        let role: RoleName = role.parse().map_err(envelope)?;
        let bytes = match role {
            RoleName::Timestamp => current_timestamp(gun, state.storage.as_ref(), &state.keys)
                .await
                .map_err(envelope)?,
            _ => state
                .storage
                .current(gun, role)
                .await
                .map_err(envelope)?
                .map(|(_, bytes)| bytes)
                .ok_or_else(|| envelope(TufError::MetaNotFound(format!("{} for {}", role, gun))))?,
        };
        debug!(gun, %role, bytes = bytes.len(), "served metadata");
        return Ok(([("content-type", "application/json")], Bytes::from(bytes)).into_response());
    }

    if let Some(role) = file.strip_suffix(".key") {
        let role: RoleName = role.parse().map_err(envelope)?;
        let key = state.keys.get_or_create(gun, role).await.map_err(envelope)?;
        return Ok(Json(key).into_response());
    }

    Err(envelope(TufError::InvalidOperation { msg: format!("unknown resource {}", file) }))
}

async fn post_resource(
    State(state): State<AppState>,
    Path(path): Path<String>,
    multipart_or_body: axum::extract::Request,
) -> Result<Response, ApiError> {
    let Some((gun, file)) = split_trust_path(&path) else {
        return Err(envelope(TufError::InvalidOperation { msg: format!("bad path {}", path) }));
    };
    let gun = gun.to_string();

    if file.is_empty() {
        // Atomic multi-role upload.
        let multipart = Multipart::from_request(multipart_or_body, &state)
            .await
            .map_err(|e| envelope(TufError::InvalidOperation { msg: e.to_string() }))?;
        return handle_update(state, &gun, multipart).await;
    }

    if let Some(role) = file.strip_suffix(".key") {
        let role: RoleName = role.parse().map_err(envelope)?;
        let body = Bytes::from_request(multipart_or_body, &state)
            .await
            .map_err(|e| envelope(TufError::InvalidOperation { msg: e.to_string() }))?;
        return handle_key_rotation(state, &gun, role, &body).await;
    }

    Err(envelope(TufError::InvalidOperation { msg: format!("unknown resource {}", file) }))
}

async fn handle_update(
    state: AppState,
    gun: &str,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut updates: BTreeMap<RoleName, Vec<u8>> = BTreeMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| envelope(TufError::InvalidOperation { msg: e.to_string() }))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let Some(file_name) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };
        let Some(role) = file_name.strip_suffix(".json") else {
            return Err(envelope(TufError::InvalidOperation {
                msg: format!("unexpected upload {}", file_name),
            }));
        };
        let role: RoleName = role.parse().map_err(envelope)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| envelope(TufError::InvalidOperation { msg: e.to_string() }))?;
        updates.insert(role, bytes.to_vec());
    }
    if updates.is_empty() {
        return Err(envelope(TufError::InvalidOperation { msg: "empty update".to_string() }));
    }

    // Critical section per GUN: validate against current state and persist
    // without interleaving with another writer.
    let lock = state.locks.lock_for(gun);
    let _guard = lock.lock().await;

    let accepted = validate_update(gun, updates, state.storage.as_ref(), &state.keys)
        .await
        .map_err(envelope)?;
    state.storage.apply(gun, &accepted).await.map_err(envelope)?;
    info!(gun, roles = accepted.len(), "accepted metadata update");
    Ok(StatusCode::OK.into_response())
}

/// Rotate a server-managed key. The request body must be a short-lived
/// statement for the role, signed by at least one current root key.
async fn handle_key_rotation(
    state: AppState,
    gun: &str,
    role: RoleName,
    body: &[u8],
) -> Result<Response, ApiError> {
    let signed = Signed::from_bytes(body)
        .map_err(|e| envelope(TufError::InvalidOperation { msg: e.to_string() }))?;

    let common: SignedCommon = serde_json::from_value(signed.signed.clone())
        .map_err(|e| envelope(TufError::InvalidOperation { msg: e.to_string() }))?;
    if common.type_ != role.body_type() {
        return Err(envelope(TufError::WrongType { role, actual: common.type_ }));
    }
    if common.expires <= Utc::now() {
        return Err(envelope(TufError::Expired { role, expires: common.expires.to_rfc3339() }));
    }

    let Some((_, root_bytes)) = state
        .storage
        .current(gun, RoleName::Root)
        .await
        .map_err(envelope)?
    else {
        return Err(envelope(TufError::RepositoryNotFound(gun.to_string())));
    };
    let root = Root::from_signed(&Signed::from_bytes(&root_bytes).map_err(envelope)?)
        .map_err(envelope)?;
    // Possession of any single root key proves rotation capability.
    verify_signed(role, &signed, &root.keys_for_role(RoleName::Root), 1, None)
        .map_err(envelope)?;

    let key = state.keys.rotate(gun, role).await.map_err(envelope)?;
    info!(gun, %role, key_id = %key.key_id(), "rotated server-held key");
    Ok(Json(key).into_response())
}
