use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Utc;
use loam_core::models::{EntityKind, RecordKey, SyncRecord};
use loam_core::store::{
    FormAction, FormEnvelope, KeysEnvelope, MemoryRemoteStore, RecordsEnvelope, RemoteStore,
};
use loam_core::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::auth::{authorize, extract_bearer_token};
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<MemoryRemoteStore>,
}

impl AppState {
    /// Fresh in-memory store that assigns server keys to `local-` records
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self::with_store(config, Arc::new(MemoryRemoteStore::new().with_server_keys()))
    }

    pub const fn with_store(config: Arc<AppConfig>, store: Arc<MemoryRemoteStore>) -> Self {
        Self { config, store }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync/{entity}", get(list_changes).post(upsert_records))
        .route("/sync/{entity}/one", post(upsert_one))
        .route("/sync/{entity}/delete", post(delete_records))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/legacy/sync", post(legacy_sync))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    conflicts: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        conflicts: state.store.conflicts(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    authorize(&state.config, token)?;
    Ok(next.run(request).await)
}

fn parse_entity(raw: &str) -> Result<EntityKind, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("unknown entity '{raw}'")))
}

fn parse_since(raw: Option<&str>) -> Result<Option<Timestamp>, AppError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Ok(Some(Timestamp::parse(value)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    since: Option<String>,
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    accepted: usize,
}

#[derive(Debug, Serialize)]
struct DeletedResponse {
    deleted: usize,
}

async fn list_changes(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<RecordsEnvelope>, AppError> {
    let entity = parse_entity(&entity)?;
    let since = parse_since(query.since.as_deref())?;
    let records = state.store.fetch_changed_since(entity, since).await?;
    tracing::debug!(entity = %entity, count = records.len(), "Served changes");
    Ok(Json(RecordsEnvelope { records }))
}

async fn upsert_records(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(body): Json<RecordsEnvelope>,
) -> Result<Json<AcceptedResponse>, AppError> {
    let entity = parse_entity(&entity)?;
    if !state.store.upsert(entity, &body.records).await? {
        return Err(AppError::rejected("batch contains a rejected record"));
    }
    tracing::info!(entity = %entity, count = body.records.len(), "Accepted upsert");
    Ok(Json(AcceptedResponse {
        accepted: body.records.len(),
    }))
}

async fn upsert_one(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(record): Json<SyncRecord>,
) -> Result<Json<SyncRecord>, AppError> {
    let entity = parse_entity(&entity)?;
    let stored = state.store.upsert_one(entity, &record).await?;
    if stored.key != record.key {
        tracing::info!(entity = %entity, from = %record.key, to = %stored.key, "Assigned server key");
    }
    Ok(Json(stored))
}

async fn delete_records(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(body): Json<KeysEnvelope>,
) -> Result<Json<DeletedResponse>, AppError> {
    let entity = parse_entity(&entity)?;
    if !state.store.delete(entity, &body.keys).await? {
        return Err(AppError::rejected("delete refused"));
    }
    tracing::info!(entity = %entity, count = body.keys.len(), "Deleted records");
    Ok(Json(DeletedResponse {
        deleted: body.keys.len(),
    }))
}

/// Fields of the single legacy endpoint; payloads arrive as JSON text
#[derive(Debug, Deserialize)]
struct LegacyForm {
    action: FormAction,
    entity: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    since: Option<String>,
    #[serde(default)]
    records: Option<String>,
    #[serde(default)]
    record: Option<String>,
    #[serde(default)]
    keys: Option<String>,
}

async fn legacy_sync(
    State(state): State<AppState>,
    Form(form): Form<LegacyForm>,
) -> (StatusCode, Json<FormEnvelope<Value>>) {
    let action = form.action;
    match handle_legacy(&state, form).await {
        Ok(data) => (StatusCode::OK, Json(FormEnvelope::ok(data))),
        Err(error) => {
            tracing::warn!(action = action.as_str(), "Legacy request failed: {error}");
            (error.status(), Json(FormEnvelope::failure(error.to_string())))
        }
    }
}

async fn handle_legacy(state: &AppState, form: LegacyForm) -> Result<Value, AppError> {
    authorize(&state.config, form.token.as_deref().unwrap_or_default())?;
    let entity = parse_entity(&form.entity)?;

    match form.action {
        FormAction::Changes => {
            let since = parse_since(form.since.as_deref())?;
            let records = state.store.fetch_changed_since(entity, since).await?;
            records
                .iter()
                .map(legacy_record)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        FormAction::Upsert => {
            let records: Vec<SyncRecord> = parse_field(form.records, "records")?;
            if !state.store.upsert(entity, &records).await? {
                return Err(AppError::rejected("batch contains a rejected record"));
            }
            Ok(serde_json::json!({ "accepted": records.len() }))
        }
        FormAction::UpsertOne => {
            let record: SyncRecord = parse_field(form.record, "record")?;
            let stored = state.store.upsert_one(entity, &record).await?;
            legacy_record(&stored)
        }
        FormAction::Delete => {
            let keys: Vec<RecordKey> = parse_field(form.keys, "keys")?;
            if !state.store.delete(entity, &keys).await? {
                return Err(AppError::rejected("delete refused"));
            }
            Ok(serde_json::json!({ "deleted": keys.len() }))
        }
    }
}

fn parse_field<T: DeserializeOwned>(raw: Option<String>, name: &str) -> Result<T, AppError> {
    let raw = raw.ok_or_else(|| AppError::bad_request(format!("missing '{name}' field")))?;
    serde_json::from_str(&raw)
        .map_err(|error| AppError::bad_request(format!("malformed '{name}' field: {error}")))
}

/// Legacy clients receive `updatedAt` as an RFC 3339 string
fn legacy_record(record: &SyncRecord) -> Result<Value, AppError> {
    let mut value =
        serde_json::to_value(record).map_err(|error| AppError::Internal(error.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "updatedAt".to_string(),
            Value::String(record.updated_at.to_rfc3339()),
        );
    }
    Ok(value)
}
