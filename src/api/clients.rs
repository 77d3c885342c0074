use super::error::{ApiError, ApiResult};
use super::state::ApiState;
use crate::auth::{AuthUser, Role};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CLIENT_STATUSES: &[&str] = &["active", "paused", "archived"];

// ---------------------------------------------------------------------------
// Query / request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct ClientsQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct CreateClientRequest {
    name: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct UpdateClientRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Serialize, Clone, sqlx::FromRow)]
pub(super) struct ClientInfo {
    id: String,
    name: String,
    slug: String,
    status: String,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize)]
pub(super) struct ClientsResponse {
    clients: Vec<ClientInfo>,
}

const CLIENT_COLUMNS: &str = "c.id, c.name, c.slug, c.status, c.notes, c.created_at, c.updated_at";

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /clients?status=
pub(super) async fn list_clients(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Query(query): Query<ClientsQuery>,
) -> ApiResult<Json<ClientsResponse>> {
    let status = query.status.filter(|s| !s.is_empty());
    if let Some(status) = &status {
        validate_status(status)?;
    }

    let scoped = user.role < Role::Manager;
    let mut sql = format!("SELECT {CLIENT_COLUMNS} FROM agency_clients c");
    let mut conditions = Vec::new();
    if scoped {
        sql.push_str(" JOIN client_assignments a ON a.client_id = c.id");
        conditions.push("a.user_id = ?");
    }
    if status.is_some() {
        conditions.push("c.status = ?");
    }
    if !conditions.is_empty() {
        sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
    }
    sql.push_str(" ORDER BY c.name COLLATE NOCASE ASC");

    let mut select = sqlx::query_as::<_, ClientInfo>(&sql);
    if scoped {
        select = select.bind(&user.id);
    }
    if let Some(status) = &status {
        select = select.bind(status);
    }

    let clients = select.fetch_all(&state.pool).await?;
    Ok(Json(ClientsResponse { clients }))
}

/// GET /clients/{id}
pub(super) async fn get_client(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ClientInfo>> {
    user.ensure_client_access(&state.pool, &id).await?;
    Ok(Json(fetch_client(&state, &id).await?))
}

/// POST /clients
pub(super) async fn create_client(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Json(body): Json<CreateClientRequest>,
) -> ApiResult<(StatusCode, Json<ClientInfo>)> {
    user.require_role(Role::Admin)?;

    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let slug = match body.slug.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slugify(slug),
        None => slugify(&name),
    };
    if slug.is_empty() {
        return Err(ApiError::bad_request("slug must contain letters or digits"));
    }
    let status = body.status.unwrap_or_else(|| "active".into());
    validate_status(&status)?;

    let id = crate::new_id();
    let now = crate::now_timestamp();

    sqlx::query(
        "INSERT INTO agency_clients (id, name, slug, status, notes, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&name)
    .bind(&slug)
    .bind(&status)
    .bind(&body.notes)
    .bind(&now)
    .bind(&now)
    .execute(&state.pool)
    .await
    .map_err(|error| {
        if crate::db::is_unique_violation(&error) {
            ApiError::conflict(format!("client slug '{slug}' already exists"))
        } else {
            ApiError::from(error)
        }
    })?;

    tracing::info!(client_id = %id, %slug, by = %user.email, "client created");

    Ok((
        StatusCode::CREATED,
        Json(ClientInfo {
            id,
            name,
            slug,
            status,
            notes: body.notes,
            created_at: now.clone(),
            updated_at: now,
        }),
    ))
}

/// PATCH /clients/{id}
pub(super) async fn update_client(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateClientRequest>,
) -> ApiResult<Json<ClientInfo>> {
    user.require_role(Role::Admin)?;

    let name = body.name.as_deref().map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(ApiError::bad_request("name must not be blank"));
    }
    if let Some(status) = &body.status {
        validate_status(status)?;
    }

    // COALESCE keeps the existing value for omitted fields.
    let result = sqlx::query(
        "UPDATE agency_clients \
         SET name = COALESCE(?, name), status = COALESCE(?, status), notes = COALESCE(?, notes), \
             updated_at = ? \
         WHERE id = ?",
    )
    .bind(name)
    .bind(&body.status)
    .bind(&body.notes)
    .bind(crate::now_timestamp())
    .bind(&id)
    .execute(&state.pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("client"));
    }

    Ok(Json(fetch_client(&state, &id).await?))
}

/// DELETE /clients/{id}
pub(super) async fn delete_client(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    user.require_role(Role::Admin)?;

    let result = sqlx::query("DELETE FROM agency_clients WHERE id = ?")
        .bind(&id)
        .execute(&state.pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("client"));
    }

    tracing::info!(client_id = %id, by = %user.email, "client deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn fetch_client(state: &ApiState, id: &str) -> ApiResult<ClientInfo> {
    sqlx::query_as::<_, ClientInfo>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM agency_clients c WHERE c.id = ?"
    ))
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::not_found("client"))
}

fn validate_status(status: &str) -> ApiResult<()> {
    if CLIENT_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "status must be one of {}",
            CLIENT_STATUSES.join(", ")
        )))
    }
}

/// Lowercase ASCII alphanumerics joined by single dashes.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::slugify;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Acme Corp."), "acme-corp");
        assert_eq!(slugify("  --Big   & Bold--  "), "big-bold");
        assert_eq!(slugify("Café 42"), "caf-42");
        assert_eq!(slugify("!!!"), "");
    }
}
