use super::error::{ApiError, ApiResult};
use super::state::ApiState;
use crate::auth::AuthUser;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Deserialize)]
pub(super) struct CreateBrandRequest {
    name: String,
    #[serde(default)]
    website: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct UpdateBrandRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    website: Option<String>,
}

#[derive(Serialize, Clone, sqlx::FromRow)]
pub(super) struct BrandInfo {
    id: String,
    client_id: String,
    name: String,
    website: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize)]
pub(super) struct BrandsResponse {
    brands: Vec<BrandInfo>,
}

/// Resolve the owning client of a brand and check the caller may touch it.
pub(super) async fn authorize_brand(
    pool: &SqlitePool,
    user: &AuthUser,
    brand_id: &str,
) -> ApiResult<String> {
    let client_id: String = sqlx::query_scalar("SELECT client_id FROM brands WHERE id = ?")
        .bind(brand_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("brand"))?;
    user.ensure_client_access(pool, &client_id).await?;
    Ok(client_id)
}

/// GET /clients/{id}/brands
pub(super) async fn list_brands(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(client_id): Path<String>,
) -> ApiResult<Json<BrandsResponse>> {
    user.ensure_client_access(&state.pool, &client_id).await?;

    let brands = sqlx::query_as::<_, BrandInfo>(
        "SELECT id, client_id, name, website, created_at, updated_at FROM brands \
         WHERE client_id = ? ORDER BY name COLLATE NOCASE ASC",
    )
    .bind(&client_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(BrandsResponse { brands }))
}

/// POST /clients/{id}/brands
pub(super) async fn create_brand(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(client_id): Path<String>,
    Json(body): Json<CreateBrandRequest>,
) -> ApiResult<(StatusCode, Json<BrandInfo>)> {
    user.ensure_client_access(&state.pool, &client_id).await?;

    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let website = body
        .website
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty());

    let id = crate::new_id();
    let now = crate::now_timestamp();

    sqlx::query(
        "INSERT INTO brands (id, client_id, name, website, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&client_id)
    .bind(&name)
    .bind(&website)
    .bind(&now)
    .bind(&now)
    .execute(&state.pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(BrandInfo {
            id,
            client_id,
            name,
            website,
            created_at: now.clone(),
            updated_at: now,
        }),
    ))
}

/// PATCH /brands/{id}
pub(super) async fn update_brand(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateBrandRequest>,
) -> ApiResult<Json<BrandInfo>> {
    authorize_brand(&state.pool, &user, &id).await?;

    let name = body.name.as_deref().map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(ApiError::bad_request("name must not be blank"));
    }

    sqlx::query(
        "UPDATE brands SET name = COALESCE(?, name), website = COALESCE(?, website), updated_at = ? \
         WHERE id = ?",
    )
    .bind(name)
    .bind(&body.website)
    .bind(crate::now_timestamp())
    .bind(&id)
    .execute(&state.pool)
    .await?;

    let brand = sqlx::query_as::<_, BrandInfo>(
        "SELECT id, client_id, name, website, created_at, updated_at FROM brands WHERE id = ?",
    )
    .bind(&id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(brand))
}

/// DELETE /brands/{id}
pub(super) async fn delete_brand(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    authorize_brand(&state.pool, &user, &id).await?;

    sqlx::query("DELETE FROM brands WHERE id = ?")
        .bind(&id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
