use super::error::{ApiError, ApiResult};
use super::state::ApiState;
use crate::auth::{AuthUser, Role};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub(super) struct AssignRequest {
    user_id: String,
    #[serde(default)]
    role_label: Option<String>,
}

#[derive(Serialize, sqlx::FromRow)]
pub(super) struct AssignmentInfo {
    id: String,
    client_id: String,
    user_id: String,
    user_email: String,
    user_name: String,
    role_label: Option<String>,
    created_at: String,
}

#[derive(Serialize)]
pub(super) struct AssignmentsResponse {
    assignments: Vec<AssignmentInfo>,
}

/// GET /clients/{id}/assignments
pub(super) async fn list_assignments(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(client_id): Path<String>,
) -> ApiResult<Json<AssignmentsResponse>> {
    user.require_role(Role::Manager)?;
    user.ensure_client_access(&state.pool, &client_id).await?;

    let assignments = sqlx::query_as::<_, AssignmentInfo>(
        "SELECT a.id, a.client_id, a.user_id, u.email AS user_email, u.name AS user_name, \
                a.role_label, a.created_at \
         FROM client_assignments a JOIN users u ON u.id = a.user_id \
         WHERE a.client_id = ? ORDER BY u.name COLLATE NOCASE ASC",
    )
    .bind(&client_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(AssignmentsResponse { assignments }))
}

/// POST /clients/{id}/assignments
pub(super) async fn assign_user(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(client_id): Path<String>,
    Json(body): Json<AssignRequest>,
) -> ApiResult<(StatusCode, Json<AssignmentInfo>)> {
    user.require_role(Role::Admin)?;
    user.ensure_client_access(&state.pool, &client_id).await?;

    let assignee: Option<(String, String)> =
        sqlx::query_as("SELECT email, name FROM users WHERE id = ?")
            .bind(&body.user_id)
            .fetch_optional(&state.pool)
            .await?;
    let (user_email, user_name) = assignee.ok_or_else(|| ApiError::not_found("user"))?;

    let role_label = body
        .role_label
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty());
    let id = crate::new_id();
    let now = crate::now_timestamp();

    sqlx::query(
        "INSERT INTO client_assignments (id, client_id, user_id, role_label, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&client_id)
    .bind(&body.user_id)
    .bind(&role_label)
    .bind(&now)
    .execute(&state.pool)
    .await
    .map_err(|error| {
        if crate::db::is_unique_violation(&error) {
            ApiError::conflict("user is already assigned to this client")
        } else {
            ApiError::from(error)
        }
    })?;

    tracing::info!(%client_id, user_id = %body.user_id, by = %user.email, "client assignment added");

    Ok((
        StatusCode::CREATED,
        Json(AssignmentInfo {
            id,
            client_id,
            user_id: body.user_id,
            user_email,
            user_name,
            role_label,
            created_at: now,
        }),
    ))
}

/// DELETE /clients/{id}/assignments/{user_id}
pub(super) async fn unassign_user(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path((client_id, user_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    user.require_role(Role::Admin)?;

    let result = sqlx::query("DELETE FROM client_assignments WHERE client_id = ? AND user_id = ?")
        .bind(&client_id)
        .bind(&user_id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("assignment"));
    }

    Ok(StatusCode::NO_CONTENT)
}
