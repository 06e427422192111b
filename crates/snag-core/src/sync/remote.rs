//! Client for the remote authority's per-collection HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{EntityKind, RecordId, RemoteChange, SyncScopeKey, Timestamp, VersionedRecord};
use crate::util::{compact_text, normalize_base_url};

/// What the remote authority did with a pushed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResponse {
    /// Write applied (or was an idempotent no-op)
    Accepted,
    /// Write rejected; the authoritative record is attached
    Conflict(VersionedRecord<Value>),
    /// The remote has never seen the record
    NotFound,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Remote API error: {0}")]
    Api(String),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// The remote side of synchronization
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Records and tombstones of a scope changed strictly after `since`
    async fn fetch_since(
        &self,
        scope: &SyncScopeKey,
        since: Timestamp,
    ) -> RemoteResult<Vec<RemoteChange>>;

    /// Push a live record
    async fn push_upsert(
        &self,
        kind: EntityKind,
        record: &VersionedRecord<Value>,
    ) -> RemoteResult<PushResponse>;

    /// Push a deletion
    async fn push_delete(
        &self,
        kind: EntityKind,
        id: RecordId,
        deleted_at: Timestamp,
    ) -> RemoteResult<PushResponse>;
}

/// Body of a `DELETE /{collection}/{id}` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub deleted_at: Timestamp,
}

/// `RemoteClient` over HTTP
#[derive(Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new(base_url: &str, timeout: Duration) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url).ok_or_else(|| {
            RemoteError::InvalidConfiguration(format!(
                "API URL must include http:// or https://, got '{base_url}'"
            ))
        })?;

        Ok(Self {
            base_url,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn record_url(&self, kind: EntityKind, id: RecordId) -> String {
        format!("{}/{}/{id}", self.base_url, kind.collection())
    }

    /// Map a push response: 204 accepted, 200 conflict with body, 404 unknown
    async fn push_response(response: reqwest::Response) -> RemoteResult<PushResponse> {
        match response.status() {
            StatusCode::NO_CONTENT => Ok(PushResponse::Accepted),
            StatusCode::OK => {
                let body = response.text().await?;
                serde_json::from_str(&body)
                    .map(PushResponse::Conflict)
                    .map_err(|error| RemoteError::InvalidPayload(error.to_string()))
            }
            StatusCode::NOT_FOUND => Ok(PushResponse::NotFound),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RemoteError::Api(parse_api_error(status, &body)))
            }
        }
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn fetch_since(
        &self,
        scope: &SyncScopeKey,
        since: Timestamp,
    ) -> RemoteResult<Vec<RemoteChange>> {
        let mut query = vec![("since", since.to_string())];
        if let Some(parent_id) = scope.parent_id {
            query.push(("parentId", parent_id.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/{}", self.base_url, scope.kind.collection()))
            .query(&query)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|error| RemoteError::InvalidPayload(error.to_string()))
    }

    async fn push_upsert(
        &self,
        kind: EntityKind,
        record: &VersionedRecord<Value>,
    ) -> RemoteResult<PushResponse> {
        let response = self
            .client
            .put(self.record_url(kind, record.id))
            .json(record)
            .send()
            .await?;
        Self::push_response(response).await
    }

    async fn push_delete(
        &self,
        kind: EntityKind,
        id: RecordId,
        deleted_at: Timestamp,
    ) -> RemoteResult<PushResponse> {
        let response = self
            .client
            .delete(self.record_url(kind, id))
            .json(&DeleteRequest { deleted_at })
            .send()
            .await?;
        Self::push_response(response).await
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}
