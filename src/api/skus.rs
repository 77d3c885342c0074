//! Composer SKU variants, flat and grouped by `sku_group`.

use super::brands::authorize_brand;
use super::error::{ApiError, ApiResult};
use super::state::ApiState;
use crate::auth::AuthUser;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct CreateVariantRequest {
    sku_group: String,
    sku: String,
    #[serde(default)]
    variant_label: Option<String>,
    #[serde(default)]
    attributes: Option<serde_json::Value>,
    #[serde(default)]
    position: Option<i64>,
}

#[derive(Deserialize)]
pub(super) struct UpdateVariantRequest {
    #[serde(default)]
    sku_group: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    #[serde(default)]
    variant_label: Option<String>,
    #[serde(default)]
    attributes: Option<serde_json::Value>,
    #[serde(default)]
    position: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: String,
    brand_id: String,
    sku_group: String,
    sku: String,
    variant_label: Option<String>,
    attributes: Option<String>,
    position: i64,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize, Clone, Debug)]
pub(super) struct VariantInfo {
    id: String,
    brand_id: String,
    sku_group: String,
    sku: String,
    variant_label: Option<String>,
    attributes: Option<serde_json::Value>,
    position: i64,
    created_at: String,
    updated_at: String,
}

impl From<VariantRow> for VariantInfo {
    fn from(row: VariantRow) -> Self {
        Self {
            id: row.id,
            brand_id: row.brand_id,
            sku_group: row.sku_group,
            sku: row.sku,
            variant_label: row.variant_label,
            attributes: row.attributes.and_then(|a| serde_json::from_str(&a).ok()),
            position: row.position,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Serialize)]
pub(super) struct VariantsResponse {
    variants: Vec<VariantInfo>,
}

#[derive(Serialize, Debug)]
pub(super) struct SkuGroup {
    sku_group: String,
    variants: Vec<VariantInfo>,
}

#[derive(Serialize)]
pub(super) struct SkuGroupsResponse {
    groups: Vec<SkuGroup>,
}

const VARIANT_COLUMNS: &str =
    "id, brand_id, sku_group, sku, variant_label, attributes, position, created_at, updated_at";

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /brands/{id}/sku-variants
pub(super) async fn list_variants(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(brand_id): Path<String>,
) -> ApiResult<Json<VariantsResponse>> {
    authorize_brand(&state.pool, &user, &brand_id).await?;
    let variants = load_variants(&state, &brand_id).await?;
    Ok(Json(VariantsResponse { variants }))
}

/// GET /brands/{id}/sku-groups
pub(super) async fn list_groups(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(brand_id): Path<String>,
) -> ApiResult<Json<SkuGroupsResponse>> {
    authorize_brand(&state.pool, &user, &brand_id).await?;
    let variants = load_variants(&state, &brand_id).await?;
    Ok(Json(SkuGroupsResponse {
        groups: group_variants(variants),
    }))
}

/// POST /brands/{id}/sku-variants
pub(super) async fn create_variant(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(brand_id): Path<String>,
    Json(body): Json<CreateVariantRequest>,
) -> ApiResult<(StatusCode, Json<VariantInfo>)> {
    authorize_brand(&state.pool, &user, &brand_id).await?;

    let sku_group = required(&body.sku_group, "sku_group")?;
    let sku = required(&body.sku, "sku")?;
    let attributes = attributes_json(body.attributes.as_ref())?;

    let position = match body.position {
        Some(position) => position,
        None => {
            let max: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(position) FROM composer_sku_variants WHERE brand_id = ? AND sku_group = ?",
            )
            .bind(&brand_id)
            .bind(&sku_group)
            .fetch_one(&state.pool)
            .await?;
            max.map_or(0, |max| max + 1)
        }
    };

    let id = crate::new_id();
    let now = crate::now_timestamp();

    sqlx::query(
        "INSERT INTO composer_sku_variants \
             (id, brand_id, sku_group, sku, variant_label, attributes, position, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&brand_id)
    .bind(&sku_group)
    .bind(&sku)
    .bind(&body.variant_label)
    .bind(&attributes)
    .bind(position)
    .bind(&now)
    .bind(&now)
    .execute(&state.pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(VariantInfo {
            id,
            brand_id,
            sku_group,
            sku,
            variant_label: body.variant_label,
            attributes: body.attributes,
            position,
            created_at: now.clone(),
            updated_at: now,
        }),
    ))
}

/// PATCH /sku-variants/{id}
pub(super) async fn update_variant(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateVariantRequest>,
) -> ApiResult<Json<VariantInfo>> {
    let brand_id = variant_brand(&state, &id).await?;
    authorize_brand(&state.pool, &user, &brand_id).await?;

    let sku_group = body
        .sku_group
        .as_deref()
        .map(|g| required(g, "sku_group"))
        .transpose()?;
    let sku = body.sku.as_deref().map(|s| required(s, "sku")).transpose()?;
    let attributes = attributes_json(body.attributes.as_ref())?;

    sqlx::query(
        "UPDATE composer_sku_variants \
         SET sku_group = COALESCE(?, sku_group), sku = COALESCE(?, sku), \
             variant_label = COALESCE(?, variant_label), attributes = COALESCE(?, attributes), \
             position = COALESCE(?, position), updated_at = ? \
         WHERE id = ?",
    )
    .bind(&sku_group)
    .bind(&sku)
    .bind(&body.variant_label)
    .bind(&attributes)
    .bind(body.position)
    .bind(crate::now_timestamp())
    .bind(&id)
    .execute(&state.pool)
    .await?;

    let row = sqlx::query_as::<_, VariantRow>(&format!(
        "SELECT {VARIANT_COLUMNS} FROM composer_sku_variants WHERE id = ?"
    ))
    .bind(&id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Json(row.into()))
}

/// DELETE /sku-variants/{id}
pub(super) async fn delete_variant(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let brand_id = variant_brand(&state, &id).await?;
    authorize_brand(&state.pool, &user, &brand_id).await?;

    sqlx::query("DELETE FROM composer_sku_variants WHERE id = ?")
        .bind(&id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn load_variants(state: &ApiState, brand_id: &str) -> ApiResult<Vec<VariantInfo>> {
    let rows = sqlx::query_as::<_, VariantRow>(&format!(
        "SELECT {VARIANT_COLUMNS} FROM composer_sku_variants WHERE brand_id = ? \
         ORDER BY sku_group ASC, position ASC, created_at ASC"
    ))
    .bind(brand_id)
    .fetch_all(&state.pool)
    .await?;
    Ok(rows.into_iter().map(VariantInfo::from).collect())
}

async fn variant_brand(state: &ApiState, id: &str) -> ApiResult<String> {
    sqlx::query_scalar("SELECT brand_id FROM composer_sku_variants WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("sku variant"))
}

/// Group already-ordered variants by consecutive `sku_group`.
fn group_variants(variants: Vec<VariantInfo>) -> Vec<SkuGroup> {
    let mut groups: Vec<SkuGroup> = Vec::new();
    for variant in variants {
        match groups.last_mut() {
            Some(group) if group.sku_group == variant.sku_group => group.variants.push(variant),
            _ => groups.push(SkuGroup {
                sku_group: variant.sku_group.clone(),
                variants: vec![variant],
            }),
        }
    }
    groups
}

fn required(value: &str, field: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::bad_request(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Serialize optional attributes, accepting only JSON objects.
pub(super) fn attributes_json(attributes: Option<&serde_json::Value>) -> ApiResult<Option<String>> {
    match attributes {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value @ serde_json::Value::Object(_)) => Ok(Some(value.to_string())),
        Some(_) => Err(ApiError::bad_request("attributes must be a JSON object")),
    }
}
