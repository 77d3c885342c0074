//! Scribe: copy-generation projects, their SKUs, generation jobs and the
//! usage ledger.

use super::error::{ApiError, ApiResult};
use super::skus::attributes_json;
use super::state::ApiState;
use crate::auth::{AuthUser, Role};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

const PROJECT_STATUSES: &[&str] = &["draft", "active", "archived"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// queued -> running -> completed | failed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct ProjectsQuery {
    #[serde(default)]
    client_id: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct CreateProjectRequest {
    name: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct UpdateProjectRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Serialize, Clone, sqlx::FromRow)]
pub(super) struct ProjectInfo {
    id: String,
    client_id: Option<String>,
    name: String,
    description: Option<String>,
    status: String,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize)]
pub(super) struct ProjectsResponse {
    projects: Vec<ProjectInfo>,
}

const PROJECT_COLUMNS: &str =
    "p.id, p.client_id, p.name, p.description, p.status, p.created_by, p.created_at, p.updated_at";

/// GET /scribe/projects?client_id=
pub(super) async fn list_projects(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Query(query): Query<ProjectsQuery>,
) -> ApiResult<Json<ProjectsResponse>> {
    let client_id = query.client_id.filter(|c| !c.is_empty());
    if let Some(client_id) = &client_id {
        user.ensure_client_access(&state.pool, client_id).await?;
    }

    // Members see unscoped projects plus those of clients they are assigned to.
    let scoped = user.role < Role::Manager;
    let mut conditions = Vec::new();
    if client_id.is_some() {
        conditions.push("p.client_id = ?");
    }
    if scoped {
        conditions.push(
            "(p.client_id IS NULL OR p.client_id IN \
             (SELECT client_id FROM client_assignments WHERE user_id = ?))",
        );
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT {PROJECT_COLUMNS} FROM scribe_projects p {where_clause} ORDER BY p.updated_at DESC"
    );
    let mut select = sqlx::query_as::<_, ProjectInfo>(&sql);
    if let Some(client_id) = &client_id {
        select = select.bind(client_id);
    }
    if scoped {
        select = select.bind(&user.id);
    }

    let projects = select.fetch_all(&state.pool).await?;
    Ok(Json(ProjectsResponse { projects }))
}

/// GET /scribe/projects/{id}
pub(super) async fn get_project(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectInfo>> {
    Ok(Json(authorize_project(&state.pool, &user, &id).await?))
}

/// POST /scribe/projects
pub(super) async fn create_project(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Json(body): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<ProjectInfo>)> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("name is required"));
    }
    let client_id = body.client_id.filter(|c| !c.is_empty());
    if let Some(client_id) = &client_id {
        user.ensure_client_access(&state.pool, client_id).await?;
    }
    let status = body.status.unwrap_or_else(|| "draft".into());
    validate_project_status(&status)?;

    let id = crate::new_id();
    let now = crate::now_timestamp();

    sqlx::query(
        "INSERT INTO scribe_projects (id, client_id, name, description, status, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&client_id)
    .bind(&name)
    .bind(&body.description)
    .bind(&status)
    .bind(&user.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ProjectInfo {
            id,
            client_id,
            name,
            description: body.description,
            status,
            created_by: Some(user.id),
            created_at: now.clone(),
            updated_at: now,
        }),
    ))
}

/// PATCH /scribe/projects/{id}
pub(super) async fn update_project(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateProjectRequest>,
) -> ApiResult<Json<ProjectInfo>> {
    authorize_project(&state.pool, &user, &id).await?;

    let name = body.name.as_deref().map(str::trim);
    if name.is_some_and(str::is_empty) {
        return Err(ApiError::bad_request("name must not be blank"));
    }
    if let Some(status) = &body.status {
        validate_project_status(status)?;
    }

    sqlx::query(
        "UPDATE scribe_projects \
         SET name = COALESCE(?, name), description = COALESCE(?, description), \
             status = COALESCE(?, status), updated_at = ? \
         WHERE id = ?",
    )
    .bind(name)
    .bind(&body.description)
    .bind(&body.status)
    .bind(crate::now_timestamp())
    .bind(&id)
    .execute(&state.pool)
    .await?;

    Ok(Json(authorize_project(&state.pool, &user, &id).await?))
}

/// DELETE /scribe/projects/{id}
pub(super) async fn delete_project(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    user.require_role(Role::Manager)?;
    authorize_project(&state.pool, &user, &id).await?;

    sqlx::query("DELETE FROM scribe_projects WHERE id = ?")
        .bind(&id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// SKUs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct CreateSkuRequest {
    sku_code: String,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    attributes: Option<serde_json::Value>,
}

#[derive(sqlx::FromRow)]
struct SkuRow {
    id: String,
    project_id: String,
    sku_code: String,
    product_name: Option<String>,
    attributes: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Serialize)]
pub(super) struct SkuInfo {
    id: String,
    project_id: String,
    sku_code: String,
    product_name: Option<String>,
    attributes: Option<serde_json::Value>,
    created_at: String,
    updated_at: String,
}

impl From<SkuRow> for SkuInfo {
    fn from(row: SkuRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            sku_code: row.sku_code,
            product_name: row.product_name,
            attributes: row.attributes.and_then(|a| serde_json::from_str(&a).ok()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Serialize)]
pub(super) struct SkusResponse {
    skus: Vec<SkuInfo>,
}

/// GET /scribe/projects/{id}/skus
pub(super) async fn list_skus(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Json<SkusResponse>> {
    authorize_project(&state.pool, &user, &project_id).await?;

    let rows = sqlx::query_as::<_, SkuRow>(
        "SELECT id, project_id, sku_code, product_name, attributes, created_at, updated_at \
         FROM scribe_skus WHERE project_id = ? ORDER BY sku_code ASC",
    )
    .bind(&project_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(SkusResponse {
        skus: rows.into_iter().map(SkuInfo::from).collect(),
    }))
}

/// POST /scribe/projects/{id}/skus
pub(super) async fn create_sku(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Json(body): Json<CreateSkuRequest>,
) -> ApiResult<(StatusCode, Json<SkuInfo>)> {
    authorize_project(&state.pool, &user, &project_id).await?;

    let sku_code = body.sku_code.trim().to_string();
    if sku_code.is_empty() {
        return Err(ApiError::bad_request("sku_code is required"));
    }
    let attributes = attributes_json(body.attributes.as_ref())?;

    let id = crate::new_id();
    let now = crate::now_timestamp();

    sqlx::query(
        "INSERT INTO scribe_skus (id, project_id, sku_code, product_name, attributes, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&project_id)
    .bind(&sku_code)
    .bind(&body.product_name)
    .bind(&attributes)
    .bind(&now)
    .bind(&now)
    .execute(&state.pool)
    .await
    .map_err(|error| {
        if crate::db::is_unique_violation(&error) {
            ApiError::conflict(format!("sku '{sku_code}' already exists in this project"))
        } else {
            ApiError::from(error)
        }
    })?;

    Ok((
        StatusCode::CREATED,
        Json(SkuInfo {
            id,
            project_id,
            sku_code,
            product_name: body.product_name,
            attributes: body.attributes,
            created_at: now.clone(),
            updated_at: now,
        }),
    ))
}

/// DELETE /scribe/skus/{id}
pub(super) async fn delete_sku(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let project_id: String = sqlx::query_scalar("SELECT project_id FROM scribe_skus WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::not_found("sku"))?;
    authorize_project(&state.pool, &user, &project_id).await?;

    sqlx::query("DELETE FROM scribe_skus WHERE id = ?")
        .bind(&id)
        .execute(&state.pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Generation jobs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct CreateJobRequest {
    #[serde(default)]
    sku_id: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct UpdateJobRequest {
    status: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
    /// Units consumed by a completed generation.
    #[serde(default)]
    units: Option<i64>,
}

#[derive(Serialize, Clone, sqlx::FromRow)]
pub(super) struct JobInfo {
    id: String,
    project_id: String,
    sku_id: Option<String>,
    status: String,
    prompt: Option<String>,
    output: Option<String>,
    error: Option<String>,
    requested_by: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

#[derive(Serialize)]
pub(super) struct JobsResponse {
    jobs: Vec<JobInfo>,
}

const JOB_COLUMNS: &str = "id, project_id, sku_id, status, prompt, output, error, requested_by, \
     created_at, updated_at, completed_at";

/// GET /scribe/projects/{id}/jobs
pub(super) async fn list_jobs(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> ApiResult<Json<JobsResponse>> {
    authorize_project(&state.pool, &user, &project_id).await?;

    let jobs = sqlx::query_as::<_, JobInfo>(&format!(
        "SELECT {JOB_COLUMNS} FROM scribe_generation_jobs WHERE project_id = ? \
         ORDER BY created_at DESC"
    ))
    .bind(&project_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(JobsResponse { jobs }))
}

/// POST /scribe/projects/{id}/jobs
pub(super) async fn create_job(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobInfo>)> {
    authorize_project(&state.pool, &user, &project_id).await?;

    let sku_id = body.sku_id.filter(|s| !s.is_empty());
    if let Some(sku_id) = &sku_id {
        let belongs: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM scribe_skus WHERE id = ? AND project_id = ?")
                .bind(sku_id)
                .bind(&project_id)
                .fetch_optional(&state.pool)
                .await?;
        if belongs.is_none() {
            return Err(ApiError::not_found("sku"));
        }
    }

    let id = crate::new_id();
    let now = crate::now_timestamp();
    let mut transaction = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO scribe_generation_jobs \
             (id, project_id, sku_id, status, prompt, requested_by, created_at, updated_at) \
         VALUES (?, ?, ?, 'queued', ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&project_id)
    .bind(&sku_id)
    .bind(&body.prompt)
    .bind(&user.id)
    .bind(&now)
    .bind(&now)
    .execute(&mut *transaction)
    .await?;

    record_usage(&mut transaction, &user.id, &project_id, &id, "generation_requested", 1).await?;
    transaction.commit().await?;

    tracing::info!(job_id = %id, %project_id, by = %user.email, "generation job queued");

    Ok((
        StatusCode::CREATED,
        Json(JobInfo {
            id,
            project_id,
            sku_id,
            status: JobStatus::Queued.as_str().to_string(),
            prompt: body.prompt,
            output: None,
            error: None,
            requested_by: Some(user.id),
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        }),
    ))
}

/// PATCH /scribe/jobs/{id}
pub(super) async fn update_job(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateJobRequest>,
) -> ApiResult<Json<JobInfo>> {
    let job = fetch_job(&state.pool, &id).await?;
    authorize_project(&state.pool, &user, &job.project_id).await?;

    let next = JobStatus::parse(&body.status)
        .ok_or_else(|| ApiError::bad_request(format!("unknown job status: {}", body.status)))?;
    let current = JobStatus::parse(&job.status).ok_or_else(ApiError::internal)?;
    if !current.can_transition_to(next) {
        return Err(ApiError::conflict(format!(
            "cannot move job from {} to {}",
            current.as_str(),
            next.as_str()
        )));
    }
    let units = body.units.unwrap_or(0);
    if units < 0 {
        return Err(ApiError::bad_request("units must not be negative"));
    }

    let now = crate::now_timestamp();
    let completed_at = next.is_terminal().then(|| now.clone());
    let mut transaction = state.pool.begin().await?;

    // Guard on the observed status so concurrent transitions cannot both win.
    let result = sqlx::query(
        "UPDATE scribe_generation_jobs \
         SET status = ?, output = COALESCE(?, output), error = COALESCE(?, error), \
             completed_at = COALESCE(?, completed_at), updated_at = ? \
         WHERE id = ? AND status = ?",
    )
    .bind(next.as_str())
    .bind(&body.output)
    .bind(&body.error)
    .bind(&completed_at)
    .bind(&now)
    .bind(&id)
    .bind(current.as_str())
    .execute(&mut *transaction)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("job status changed concurrently"));
    }

    if next == JobStatus::Completed {
        record_usage(&mut transaction, &user.id, &job.project_id, &id, "generation_completed", units)
            .await?;
    }
    transaction.commit().await?;

    Ok(Json(fetch_job(&state.pool, &id).await?))
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(super) struct UsageQuery {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Serialize, sqlx::FromRow)]
pub(super) struct UsageInfo {
    id: String,
    user_id: Option<String>,
    project_id: Option<String>,
    job_id: Option<String>,
    action: String,
    units: i64,
    created_at: String,
}

#[derive(Serialize)]
pub(super) struct UsageResponse {
    logs: Vec<UsageInfo>,
    total_units: i64,
}

/// GET /scribe/usage?project_id=&user_id=
pub(super) async fn list_usage(
    State(state): State<Arc<ApiState>>,
    user: AuthUser,
    Query(query): Query<UsageQuery>,
) -> ApiResult<Json<UsageResponse>> {
    user.require_role(Role::Admin)?;

    let mut conditions = Vec::new();
    if query.project_id.is_some() {
        conditions.push("project_id = ?");
    }
    if query.user_id.is_some() {
        conditions.push("user_id = ?");
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let select_sql = format!(
        "SELECT id, user_id, project_id, job_id, action, units, created_at \
         FROM scribe_usage_logs {where_clause} ORDER BY created_at DESC"
    );
    let mut select = sqlx::query_as::<_, UsageInfo>(&select_sql);
    if let Some(project_id) = &query.project_id {
        select = select.bind(project_id);
    }
    if let Some(user_id) = &query.user_id {
        select = select.bind(user_id);
    }

    let logs = select.fetch_all(&state.pool).await?;
    let total_units = logs.iter().map(|log| log.units).sum();

    Ok(Json(UsageResponse { logs, total_units }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load a project and check client access when it belongs to one.
async fn authorize_project(
    pool: &SqlitePool,
    user: &AuthUser,
    project_id: &str,
) -> ApiResult<ProjectInfo> {
    let project = sqlx::query_as::<_, ProjectInfo>(&format!(
        "SELECT {PROJECT_COLUMNS} FROM scribe_projects p WHERE p.id = ?"
    ))
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("project"))?;

    if let Some(client_id) = &project.client_id {
        if !user.can_access_client(pool, client_id).await? {
            return Err(ApiError::forbidden());
        }
    }
    Ok(project)
}

async fn fetch_job(pool: &SqlitePool, id: &str) -> ApiResult<JobInfo> {
    sqlx::query_as::<_, JobInfo>(&format!(
        "SELECT {JOB_COLUMNS} FROM scribe_generation_jobs WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("generation job"))
}

async fn record_usage(
    transaction: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
    project_id: &str,
    job_id: &str,
    action: &str,
    units: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO scribe_usage_logs (id, user_id, project_id, job_id, action, units, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(crate::new_id())
    .bind(user_id)
    .bind(project_id)
    .bind(job_id)
    .bind(action)
    .bind(units)
    .bind(crate::now_timestamp())
    .execute(&mut **transaction)
    .await?;
    Ok(())
}

fn validate_project_status(status: &str) -> ApiResult<()> {
    if PROJECT_STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!(
            "status must be one of {}",
            PROJECT_STATUSES.join(", ")
        )))
    }
}
