use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snag_core::db::{Database, LibSqlRecordStore, RecordStore};
use snag_core::models::{
    reserved_payload_key, EntityKind, RecordId, RemoteChange, SyncScopeKey, Timestamp,
};
use snag_core::sync::{DeleteRequest, Resolution};
use snag_core::VersionedRecord;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub(crate) store: Arc<LibSqlRecordStore>,
    _db: Arc<Database>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: Database) -> Self {
        Self {
            store: Arc::new(LibSqlRecordStore::new(db.connection())),
            _db: Arc::new(db),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/{collection}", get(changed_since))
        .route("/{collection}/{id}", put(upsert_record).delete(delete_record))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangedSinceQuery {
    since: Option<Timestamp>,
    parent_id: Option<String>,
}

async fn changed_since(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    query: Result<Query<ChangedSinceQuery>, QueryRejection>,
) -> Result<Json<Vec<RemoteChange>>, AppError> {
    let kind = parse_collection(&collection)?;
    let Query(query) = query.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let parent_id = query.parent_id.as_deref().map(parse_id).transpose()?;
    let scope = SyncScopeKey { kind, parent_id };
    let since = query.since.unwrap_or(0);

    let changes = state
        .store
        .changed_since(&scope, since)
        .await?
        .into_iter()
        .map(RemoteChange::from_record)
        .collect::<Vec<_>>();

    tracing::debug!(%scope, since, count = changes.len(), "Served changes");
    Ok(Json(changes))
}

async fn upsert_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, AppError> {
    let kind = parse_collection(&collection)?;
    let id = parse_id(&id)?;
    let Json(body) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let incoming = parse_record(id, body)?;

    let resolution = state.store.apply_upsert(kind, incoming).await?;
    Ok(resolution_response(kind, id, resolution))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let kind = parse_collection(&collection)?;
    let id = parse_id(&id)?;
    let Json(request) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    match state.store.apply_delete(kind, id, request.deleted_at).await? {
        Resolution::NotFound => Err(AppError::not_found(format!("{kind} {id}"))),
        resolution => Ok(resolution_response(kind, id, resolution)),
    }
}

/// 204 when the write was applied, 200 with the authoritative record when it lost
fn resolution_response(kind: EntityKind, id: RecordId, resolution: Resolution<Value>) -> Response {
    match resolution {
        Resolution::Rejected(existing) => {
            tracing::info!(collection = %kind, record_id = %id, "Rejected stale write");
            (StatusCode::OK, Json(existing)).into_response()
        }
        Resolution::Accepted(_) | Resolution::AlreadyDeleted(_) | Resolution::NotFound => {
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

fn parse_collection(collection: &str) -> Result<EntityKind, AppError> {
    EntityKind::from_collection(collection)
        .ok_or_else(|| AppError::bad_request(format!("Unknown collection: {collection}")))
}

fn parse_id(value: &str) -> Result<RecordId, AppError> {
    value
        .parse()
        .map_err(|_| AppError::bad_request(format!("Invalid record id: {value}")))
}

/// Build the incoming record from a PUT body; the path id is authoritative
fn parse_record(id: RecordId, body: Value) -> Result<VersionedRecord<Value>, AppError> {
    let Value::Object(mut fields) = body else {
        return Err(AppError::bad_request("Body must be a JSON object"));
    };

    match fields.get("id").and_then(Value::as_str) {
        Some(body_id) if parse_id(body_id)? != id => {
            return Err(AppError::bad_request(format!(
                "Body id {body_id} does not match path id {id}"
            )));
        }
        _ => {
            fields.insert("id".to_string(), Value::String(id.to_string()));
        }
    }

    let record: VersionedRecord<Value> = serde_json::from_value(Value::Object(fields))
        .map_err(|error| AppError::bad_request(format!("Malformed record: {error}")))?;
    if let Some(key) = reserved_payload_key(&record.payload) {
        return Err(AppError::bad_request(format!(
            "Payload field `{key}` is reserved"
        )));
    }
    Ok(record)
}
