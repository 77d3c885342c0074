use super::error::{ApiError, ApiResult};
use super::state::ApiState;
use crate::auth::{AuthUser, Role};
use crate::debrief::{self, store, NormalizedTask, ProcessingStatus, SyncReport};

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Header carrying the shared secret for unattended sync triggers.
pub const SYNC_SECRET_HEADER: &str = "x-sync-secret";

// ---------------------------------------------------------------------------
// Query / request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct NotesQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    status: Option<String>,
}

fn default_limit() -> i64 {
    50
}

#[derive(Deserialize, Default)]
pub(super) struct SyncRequest {
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Serialize, sqlx::FromRow)]
pub(super) struct NoteSummary {
    id: String,
    google_doc_id: String,
    title: String,
    owner_email: String,
    doc_url: String,
    modified_time: Option<String>,
    processing_status: String,
    processed_at: Option<String>,
    synced_at: String,
}

#[derive(Serialize)]
pub(super) struct NotesResponse {
    notes: Vec<NoteSummary>,
    total: i64,
}

#[derive(Serialize)]
pub(super) struct NoteDetail {
    id: String,
    google_doc_id: String,
    title: String,
    owner_email: String,
    doc_url: String,
    content: Option<String>,
    modified_time: Option<String>,
    topics: Vec<String>,
    tasks: Vec<NormalizedTask>,
    processing_status: String,
    processing_error: Option<String>,
    processed_at: Option<String>,
    synced_at: String,
    created_at: String,
    updated_at: String,
}

impl From<store::MeetingNote> for NoteDetail {
    fn from(note: store::MeetingNote) -> Self {
        let topics = note.topics();
        let tasks = note.tasks();
        Self {
            id: note.id,
            google_doc_id: note.google_doc_id,
            title: note.title,
            owner_email: note.owner_email,
            doc_url: note.doc_url,
            content: note.content,
            modified_time: note.modified_time,
            topics,
            tasks,
            processing_status: note.processing_status,
            processing_error: note.processing_error,
            processed_at: note.processed_at,
            synced_at: note.synced_at,
            created_at: note.created_at,
            updated_at: note.updated_at,
        }
    }
}

/// Caller allowed to trigger a sync: an admin session or the shared secret.
pub(super) enum SyncCaller {
    User(AuthUser),
    Secret,
}

impl FromRequestParts<Arc<ApiState>> for SyncCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(expected) = state.config.debrief.sync_secret.as_deref() {
            let provided = parts
                .headers
                .get(SYNC_SECRET_HEADER)
                .and_then(|v| v.to_str().ok());
            if let Some(provided) = provided {
                if !expected.is_empty() && secrets_match(provided, expected) {
                    return Ok(SyncCaller::Secret);
                }
                return Err(ApiError::unauthorized());
            }
        }

        let user = AuthUser::from_request_parts(parts, state).await?;
        user.require_role(Role::Admin)?;
        Ok(SyncCaller::User(user))
    }
}

fn secrets_match(provided: &str, expected: &str) -> bool {
    bool::from(provided.as_bytes().ct_eq(expected.as_bytes()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /debrief/notes?limit=&offset=&status=
pub(super) async fn list_notes(
    State(state): State<Arc<ApiState>>,
    _user: AuthUser,
    Query(query): Query<NotesQuery>,
) -> ApiResult<Json<NotesResponse>> {
    let status = query.status.filter(|s| !s.is_empty());
    if let Some(status) = &status {
        if ProcessingStatus::parse(status).is_none() {
            return Err(ApiError::bad_request(format!("unknown status: {status}")));
        }
    }
    let limit = query.limit.clamp(1, 200);
    let offset = query.offset.max(0);

    let where_clause = if status.is_some() {
        "WHERE processing_status = ?"
    } else {
        ""
    };

    let count_sql = format!("SELECT COUNT(*) FROM debrief_meeting_notes {where_clause}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    let select_sql = format!(
        "SELECT id, google_doc_id, title, owner_email, doc_url, modified_time, processing_status, \
                processed_at, synced_at \
         FROM debrief_meeting_notes {where_clause} \
         ORDER BY modified_time DESC, created_at DESC LIMIT ? OFFSET ?"
    );
    let mut select_query = sqlx::query_as::<_, NoteSummary>(&select_sql);

    if let Some(status) = &status {
        count_query = count_query.bind(status);
        select_query = select_query.bind(status);
    }
    select_query = select_query.bind(limit).bind(offset);

    let total = count_query.fetch_one(&state.pool).await?;
    let notes = select_query.fetch_all(&state.pool).await?;

    Ok(Json(NotesResponse { notes, total }))
}

/// GET /debrief/notes/{id}
pub(super) async fn get_note(
    State(state): State<Arc<ApiState>>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<NoteDetail>> {
    let note = store::get_note(&state.pool, &id).await?;
    Ok(Json(note.into()))
}

/// POST /debrief/sync
pub(super) async fn sync_notes(
    State(state): State<Arc<ApiState>>,
    caller: SyncCaller,
    body: Option<Json<SyncRequest>>,
) -> ApiResult<Json<SyncReport>> {
    let request = body.map(|Json(body)| body).unwrap_or_default();
    let triggered_by = match &caller {
        SyncCaller::User(user) => user.email.as_str(),
        SyncCaller::Secret => "sync-secret",
    };
    tracing::info!(triggered_by, limit = ?request.limit, "debrief sync requested");

    let report = debrief::sync_and_queue(
        &state.debrief_sync(),
        &state.pool,
        state.extractor.clone(),
        &state.config.debrief,
        request.limit,
    )
    .await?;

    Ok(Json(report))
}

/// POST /debrief/notes/{id}/process
pub(super) async fn process_note(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    user.require_role(Role::Manager)?;
    // Fail fast on unknown ids; everything after this runs detached.
    store::get_note(&state.pool, &id).await?;

    debrief::spawn_topics_job(
        state.pool.clone(),
        state.extractor.clone(),
        state.config.debrief.clone(),
        id.clone(),
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": true, "note_id": id })),
    ))
}

/// DELETE /debrief/notes/{id}
pub(super) async fn delete_note(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    user.require_role(Role::Admin)?;

    let result = sqlx::query("DELETE FROM debrief_meeting_notes WHERE id = ?")
        .bind(&id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("meeting note"));
    }

    Ok(StatusCode::NO_CONTENT)
}
