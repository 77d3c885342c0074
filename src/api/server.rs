//! HTTP server setup: router, middleware and the small system routes.

use super::state::ApiState;
use super::{assignments, brands, clients, debrief, scribe, skus};
use crate::auth::AuthUser;

use axum::extract::State;
use axum::http::{HeaderValue, Method};
use axum::response::Json;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full application router over `state`.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);

    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/me", get(me))
        .route(
            "/clients",
            get(clients::list_clients).post(clients::create_client),
        )
        .route(
            "/clients/{id}",
            get(clients::get_client)
                .patch(clients::update_client)
                .delete(clients::delete_client),
        )
        .route(
            "/clients/{id}/assignments",
            get(assignments::list_assignments).post(assignments::assign_user),
        )
        .route(
            "/clients/{id}/assignments/{user_id}",
            delete(assignments::unassign_user),
        )
        .route(
            "/clients/{id}/brands",
            get(brands::list_brands).post(brands::create_brand),
        )
        .route(
            "/brands/{id}",
            patch(brands::update_brand).delete(brands::delete_brand),
        )
        .route(
            "/brands/{id}/sku-variants",
            get(skus::list_variants).post(skus::create_variant),
        )
        .route("/brands/{id}/sku-groups", get(skus::list_groups))
        .route(
            "/sku-variants/{id}",
            patch(skus::update_variant).delete(skus::delete_variant),
        )
        .route("/debrief/notes", get(debrief::list_notes))
        .route(
            "/debrief/notes/{id}",
            get(debrief::get_note).delete(debrief::delete_note),
        )
        .route("/debrief/notes/{id}/process", post(debrief::process_note))
        .route("/debrief/sync", post(debrief::sync_notes))
        .route(
            "/scribe/projects",
            get(scribe::list_projects).post(scribe::create_project),
        )
        .route(
            "/scribe/projects/{id}",
            get(scribe::get_project)
                .patch(scribe::update_project)
                .delete(scribe::delete_project),
        )
        .route(
            "/scribe/projects/{id}/skus",
            get(scribe::list_skus).post(scribe::create_sku),
        )
        .route("/scribe/skus/{id}", delete(scribe::delete_sku))
        .route(
            "/scribe/projects/{id}/jobs",
            get(scribe::list_jobs).post(scribe::create_job),
        )
        .route("/scribe/jobs/{id}", patch(scribe::update_job))
        .route("/scribe/usage", get(scribe::list_usage));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the given address.
///
/// Returns a handle that resolves when the server shuts down. The caller
/// passes a `tokio::sync::watch::Receiver<bool>` for graceful shutdown.
pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<ApiState>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        let mut shutdown = shutdown_rx;
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|v| *v).await;
            })
            .await
        {
            tracing::error!(%error, "HTTP server exited with an error");
        }
    });

    Ok(handle)
}

/// Any origin when none are configured, otherwise the listed ones.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

// -- System handlers --

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    let uptime = state.started_at.elapsed();
    Json(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "pid": std::process::id(),
        "uptime_seconds": uptime.as_secs(),
    }))
}

async fn me(user: AuthUser) -> Json<AuthUser> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{create_session, create_user, Role};
    use crate::config::AppConfig;
    use crate::debrief::HeuristicExtractor;
    use crate::google::drive::fake::FakeDrive;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use sqlx::SqlitePool;
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        pool: SqlitePool,
    }

    impl Harness {
        async fn new(drive: FakeDrive) -> Self {
            let pool = crate::db::test_pool().await;
            let mut config = AppConfig::defaults().expect("default config");
            config.google.drive_folder_id = Some("folder-1".into());
            config.debrief.auto_process = false;
            config.debrief.sync_secret = Some("s3cret".into());
            let state = Arc::new(ApiState::new(
                pool.clone(),
                Arc::new(config),
                Arc::new(drive),
                Arc::new(HeuristicExtractor),
            ));
            Self {
                app: router(state),
                pool,
            }
        }

        async fn token(&self, email: &str, role: Role) -> (String, String) {
            let user = create_user(&self.pool, email, "Test User", role)
                .await
                .expect("user");
            let token = create_session(&self.pool, &user.id, chrono::Duration::hours(1))
                .await
                .expect("session");
            (user.id, token)
        }

        async fn call(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("authorization", format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string())),
                None => builder.body(Body::empty()),
            }
            .expect("request");

            let response = self.app.clone().oneshot(request).await.expect("response");
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("body");
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).expect("json body")
            };
            (status, value)
        }
    }

    #[tokio::test]
    async fn health_is_public_and_me_needs_a_session() {
        let harness = Harness::new(FakeDrive::default()).await;
        let (status, body) = harness.call("GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, _) = harness.call("GET", "/api/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, token) = harness.token("ops@example.com", Role::Manager).await;
        let (status, body) = harness.call("GET", "/api/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "ops@example.com");
        assert_eq!(body["role"], "manager");
    }

    #[tokio::test]
    async fn members_only_see_assigned_clients() {
        let harness = Harness::new(FakeDrive::default()).await;
        let (_, admin) = harness.token("admin@example.com", Role::Admin).await;
        let (member_id, member) = harness.token("member@example.com", Role::Member).await;

        let (status, acme) = harness
            .call("POST", "/api/clients", Some(&admin), Some(json!({ "name": "Acme Co" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(acme["slug"], "acme-co");
        let acme_id = acme["id"].as_str().expect("id").to_string();

        let (status, _) = harness
            .call("POST", "/api/clients", Some(&admin), Some(json!({ "name": "Acme Co" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = harness
            .call("POST", "/api/clients", Some(&member), Some(json!({ "name": "Nope" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, listed) = harness.call("GET", "/api/clients", Some(&member), None).await;
        assert_eq!(listed["clients"].as_array().expect("clients").len(), 0);
        let (status, _) = harness
            .call("GET", &format!("/api/clients/{acme_id}"), Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = harness
            .call(
                "POST",
                &format!("/api/clients/{acme_id}/assignments"),
                Some(&admin),
                Some(json!({ "user_id": member_id })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, listed) = harness.call("GET", "/api/clients", Some(&member), None).await;
        assert_eq!(listed["clients"][0]["id"], acme_id.as_str());

        let (status, _) = harness
            .call("GET", "/api/clients/missing", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn brand_variants_group_by_sku_group() {
        let harness = Harness::new(FakeDrive::default()).await;
        let (_, admin) = harness.token("admin@example.com", Role::Admin).await;

        let (_, client) = harness
            .call("POST", "/api/clients", Some(&admin), Some(json!({ "name": "Northwind" })))
            .await;
        let client_id = client["id"].as_str().expect("client id");
        let (status, brand) = harness
            .call(
                "POST",
                &format!("/api/clients/{client_id}/brands"),
                Some(&admin),
                Some(json!({ "name": "Trail" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let brand_id = brand["id"].as_str().expect("brand id");

        for (group, sku) in [("tee", "T-S"), ("hoodie", "H-S"), ("hoodie", "H-M")] {
            let (status, _) = harness
                .call(
                    "POST",
                    &format!("/api/brands/{brand_id}/sku-variants"),
                    Some(&admin),
                    Some(json!({ "sku_group": group, "sku": sku })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = harness
            .call("GET", &format!("/api/brands/{brand_id}/sku-groups"), Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let groups = body["groups"].as_array().expect("groups");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0]["sku_group"], "hoodie");
        assert_eq!(groups[0]["variants"][0]["sku"], "H-S");
        assert_eq!(groups[0]["variants"][1]["position"], 1);
    }

    #[tokio::test]
    async fn sync_accepts_secret_or_admin_only() {
        let drive = FakeDrive::with_docs(vec![
            FakeDrive::doc("doc-1", "Weekly sync", Some("lead@example.com"), "Agenda\n- ship it"),
            FakeDrive::doc("doc-2", "Kickoff", None, "Notes"),
        ]);
        let harness = Harness::new(drive).await;
        let (_, member) = harness.token("member@example.com", Role::Member).await;

        let (status, _) = harness
            .call("POST", "/api/debrief/sync", Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let request = Request::builder()
            .method("POST")
            .uri("/api/debrief/sync")
            .header("x-sync-secret", "wrong")
            .body(Body::empty())
            .expect("request");
        let response = harness.app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("POST")
            .uri("/api/debrief/sync")
            .header("x-sync-secret", "s3cret")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "limit": 1 }).to_string()))
            .expect("request");
        let response = harness.app.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let (_, admin) = harness.token("admin@example.com", Role::Admin).await;
        let (status, report) = harness
            .call("POST", "/api/debrief/sync", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["synced"], 2);

        let (status, notes) = harness
            .call("GET", "/api/debrief/notes?status=pending", Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(notes["total"], 2);

        let (status, _) = harness
            .call("GET", "/api/debrief/notes?status=bogus", Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn process_requires_manager_and_known_note() {
        let harness = Harness::new(FakeDrive::default()).await;
        let (_, member) = harness.token("member@example.com", Role::Member).await;
        let (_, manager) = harness.token("manager@example.com", Role::Manager).await;

        let (status, _) = harness
            .call("POST", "/api/debrief/notes/nope/process", Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = harness
            .call("POST", "/api/debrief/notes/nope/process", Some(&manager), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn scribe_jobs_follow_lifecycle_and_log_usage() {
        let harness = Harness::new(FakeDrive::default()).await;
        let (admin_id, admin) = harness.token("admin@example.com", Role::Admin).await;
        let (_, member) = harness.token("member@example.com", Role::Member).await;

        let (status, project) = harness
            .call(
                "POST",
                "/api/scribe/projects",
                Some(&admin),
                Some(json!({ "name": "Spring catalog" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(project["status"], "draft");
        let project_id = project["id"].as_str().expect("project id");

        let (status, _) = harness
            .call(
                "POST",
                "/api/scribe/projects",
                Some(&admin),
                Some(json!({ "name": "Bad", "status": "paused" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let skus_uri = format!("/api/scribe/projects/{project_id}/skus");
        let (status, sku) = harness
            .call("POST", &skus_uri, Some(&admin), Some(json!({ "sku_code": "SP-01" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = harness
            .call("POST", &skus_uri, Some(&admin), Some(json!({ "sku_code": "SP-01" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = harness
            .call(
                "POST",
                &skus_uri,
                Some(&admin),
                Some(json!({ "sku_code": "SP-02", "attributes": ["red"] })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, job) = harness
            .call(
                "POST",
                &format!("/api/scribe/projects/{project_id}/jobs"),
                Some(&admin),
                Some(json!({ "sku_id": sku["id"], "prompt": "Write a blurb" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(job["status"], "queued");
        let job_uri = format!("/api/scribe/jobs/{}", job["id"].as_str().expect("job id"));

        let (status, _) = harness
            .call("PATCH", &job_uri, Some(&admin), Some(json!({ "status": "completed" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = harness
            .call("PATCH", &job_uri, Some(&admin), Some(json!({ "status": "running" })))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, done) = harness
            .call(
                "PATCH",
                &job_uri,
                Some(&admin),
                Some(json!({ "status": "completed", "output": "Fresh copy", "units": 420 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["output"], "Fresh copy");
        assert!(done["completed_at"].is_string());

        let (status, _) = harness
            .call("GET", "/api/scribe/usage", Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, usage) = harness
            .call(
                "GET",
                &format!("/api/scribe/usage?project_id={project_id}&user_id={admin_id}"),
                Some(&admin),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(usage["logs"].as_array().expect("logs").len(), 2);
        assert_eq!(usage["total_units"], 421);
    }
    #[tokio::test]
    async fn note_detail_carries_topics_and_delete_is_admin_only() {
        let drive = FakeDrive::with_docs(vec![FakeDrive::doc(
            "doc-1",
            "Weekly sync",
            Some("lead@example.com"),
            "# Roadmap\n## Action Items\n- Ship the beta @ana by 2026-11-02\n",
        )]);
        let harness = Harness::new(drive).await;
        let (_, admin) = harness.token("admin@example.com", Role::Admin).await;
        let (_, member) = harness.token("member@example.com", Role::Member).await;

        let (status, _) = harness
            .call("POST", "/api/debrief/sync", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let note_id = crate::debrief::store::get_note_by_doc_id(&harness.pool, "doc-1")
            .await
            .expect("synced note")
            .id;
        let debrief_config = AppConfig::defaults().expect("defaults").debrief;
        crate::debrief::process_topics(&harness.pool, &HeuristicExtractor, &debrief_config, &note_id)
            .await
            .expect("process");

        let uri = format!("/api/debrief/notes/{note_id}");
        let (status, note) = harness.call("GET", &uri, Some(&member), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(note["processing_status"], "processed");
        assert_eq!(note["owner_email"], "lead@example.com");
        assert_eq!(note["topics"], json!(["Roadmap", "Action Items"]));
        assert_eq!(note["tasks"][0]["owner"], "ana");
        assert_eq!(note["tasks"][0]["due_date"], "2026-11-02");

        let (status, _) = harness.call("DELETE", &uri, Some(&member), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = harness.call("DELETE", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = harness.call("DELETE", &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = harness.call("GET", &uri, Some(&member), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn drive_failure_during_sync_is_bad_gateway() {
        let harness = Harness::new(FakeDrive {
            list_error: true,
            ..Default::default()
        })
        .await;
        let (_, admin) = harness.token("admin@example.com", Role::Admin).await;

        let (status, body) = harness
            .call("POST", "/api/debrief/sync", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().is_some_and(|e| e.contains("403")));
    }

    #[tokio::test]
    async fn members_cannot_touch_unassigned_brands() {
        let harness = Harness::new(FakeDrive::default()).await;
        let (_, admin) = harness.token("admin@example.com", Role::Admin).await;
        let (_, member) = harness.token("member@example.com", Role::Member).await;

        let (_, client) = harness
            .call("POST", "/api/clients", Some(&admin), Some(json!({ "name": "Globex" })))
            .await;
        let client_id = client["id"].as_str().expect("client id");
        let (_, brand) = harness
            .call(
                "POST",
                &format!("/api/clients/{client_id}/brands"),
                Some(&admin),
                Some(json!({ "name": "Hank" })),
            )
            .await;
        let brand_id = brand["id"].as_str().expect("brand id");
        let (status, variant) = harness
            .call(
                "POST",
                &format!("/api/brands/{brand_id}/sku-variants"),
                Some(&admin),
                Some(json!({ "sku_group": "cap", "sku": "C-1" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let variant_id = variant["id"].as_str().expect("variant id");

        let brand_uri = format!("/api/brands/{brand_id}");
        let (status, _) = harness
            .call("PATCH", &brand_uri, Some(&member), Some(json!({ "name": "Mine" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = harness.call("DELETE", &brand_uri, Some(&member), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = harness
            .call("GET", &format!("{brand_uri}/sku-variants"), Some(&member), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = harness
            .call(
                "POST",
                &format!("{brand_uri}/sku-variants"),
                Some(&member),
                Some(json!({ "sku_group": "cap", "sku": "C-2" })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let variant_uri = format!("/api/sku-variants/{variant_id}");
        let (status, _) = harness
            .call("PATCH", &variant_uri, Some(&member), Some(json!({ "sku": "C-9" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = harness.call("DELETE", &variant_uri, Some(&member), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, brands) = harness
            .call("GET", &format!("/api/clients/{client_id}/brands"), Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(brands["brands"][0]["name"], "Hank");
    }

    #[tokio::test]
    async fn client_patch_keeps_omitted_fields() {
        let harness = Harness::new(FakeDrive::default()).await;
        let (_, admin) = harness.token("admin@example.com", Role::Admin).await;

        let (_, client) = harness
            .call(
                "POST",
                "/api/clients",
                Some(&admin),
                Some(json!({ "name": "Initech", "notes": "net 30" })),
            )
            .await;
        let uri = format!("/api/clients/{}", client["id"].as_str().expect("client id"));

        let (status, updated) = harness
            .call("PATCH", &uri, Some(&admin), Some(json!({ "status": "paused" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["status"], "paused");
        assert_eq!(updated["name"], "Initech");
        assert_eq!(updated["notes"], "net 30");
        assert_eq!(updated["slug"], "initech");

        let (status, _) = harness
            .call("PATCH", &uri, Some(&admin), Some(json!({ "name": "  " })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
