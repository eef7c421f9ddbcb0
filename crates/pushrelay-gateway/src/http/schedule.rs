//! Push scheduling endpoints.
//!
//! `POST {prefix}/schedule` queues a one-time push of a message to a callback
//! URL, `GET` lists what is queued and `DELETE {prefix}/schedule/{id}` cancels.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use pushrelay_core::{
    push::{Message, PushEnvelope, SessionInfo},
    RelayError,
};
use pushrelay_scheduler::{EntryId, OneTime, PushToSession};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;

type ApiError = (StatusCode, Json<Value>);

/// Session context echoed back to the callback with every push.
#[derive(Debug, Default, Deserialize)]
pub struct SessionRef {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "groupID")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    /// Callback URL the envelope is POSTed to.
    pub url: String,
    pub message: Message,
    #[serde(default)]
    pub session: SessionRef,
    /// Delivery time; omitted means "as soon as possible".
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct EntryView {
    pub id: EntryId,
    pub next: Option<DateTime<Utc>>,
    pub prev: Option<DateTime<Utc>>,
    pub schedule_type: Option<&'static str>,
    pub job_type: Option<&'static str>,
}

/// POST {prefix}/schedule
pub async fn schedule_push(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScheduleRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if !(req.url.starts_with("http://") || req.url.starts_with("https://")) {
        return Err(error_response(RelayError::InvalidRequest(format!(
            "callback url must be http(s): {}",
            req.url
        ))));
    }

    let session = SessionInfo {
        id: req.session.id,
        group_id: req.session.group_id,
        data: req.session.data,
        hook: req.url,
    };
    let envelope = PushEnvelope::new(session, req.message);
    let job = PushToSession::from_envelope(&envelope).map_err(error_response)?;
    let at = req.at.unwrap_or_else(Utc::now);

    let id = state.scheduler.add_job(job, OneTime::new(at)).await;
    info!(entry_id = id, hook = %envelope.session.hook, %at, "push scheduled");

    Ok((StatusCode::CREATED, Json(json!({ "id": id, "at": at }))))
}

/// GET {prefix}/schedule
pub async fn list_entries(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut entries: Vec<EntryView> = state
        .scheduler
        .entries()
        .await
        .iter()
        .map(|e| EntryView {
            id: e.id,
            next: e.next,
            prev: e.prev,
            schedule_type: e.schedule_type(),
            job_type: e.job_type(),
        })
        .collect();
    entries.sort_by_key(|e| e.id);
    Json(json!({ "entries": entries }))
}

/// DELETE {prefix}/schedule/{id}
pub async fn remove_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
) -> Result<StatusCode, ApiError> {
    let known = state.scheduler.entries().await.iter().any(|e| e.id == id);
    if !known {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no scheduled entry {id}"), "code": "NOT_FOUND"})),
        ));
    }
    state.scheduler.remove(id).await;
    info!(entry_id = id, "push cancelled");
    Ok(StatusCode::NO_CONTENT)
}

fn error_response(err: RelayError) -> ApiError {
    let status = match &err {
        RelayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({"error": err.to_string(), "code": err.code()})),
    )
}
