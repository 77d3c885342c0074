//! Bearer-session authentication and role checks.

use crate::api::{ApiError, ApiState};
use crate::error::{Error, Result};

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Default session lifetime for operator-issued tokens.
pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;

/// Roles in ascending order of privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "member" => Some(Role::Member),
            "manager" => Some(Role::Manager),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The caller behind a valid session token.
#[derive(Debug, Clone, Serialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl AuthUser {
    pub fn require_role(&self, minimum: Role) -> std::result::Result<(), ApiError> {
        if self.role >= minimum {
            Ok(())
        } else {
            Err(ApiError::forbidden())
        }
    }

    /// Admins and managers see every client; members only their assignments.
    pub async fn can_access_client(&self, pool: &SqlitePool, client_id: &str) -> Result<bool> {
        if self.role >= Role::Manager {
            return Ok(true);
        }
        let assigned: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM client_assignments WHERE client_id = ? AND user_id = ?",
        )
        .bind(client_id)
        .bind(&self.id)
        .fetch_optional(pool)
        .await?;
        Ok(assigned.is_some())
    }

    /// 404 when the client does not exist, 403 when the caller may not see it.
    pub async fn ensure_client_access(
        &self,
        pool: &SqlitePool,
        client_id: &str,
    ) -> std::result::Result<(), ApiError> {
        let exists: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM agency_clients WHERE id = ?")
                .bind(client_id)
                .fetch_optional(pool)
                .await?;
        if exists.is_none() {
            return Err(ApiError::not_found("client"));
        }
        if !self.can_access_client(pool, client_id).await? {
            return Err(ApiError::forbidden());
        }
        Ok(())
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve an unexpired session token to its user.
pub async fn lookup_session(pool: &SqlitePool, token: &str) -> Result<Option<AuthUser>> {
    let row: Option<(String, String, String, String)> = sqlx::query_as(
        "SELECT u.id, u.email, u.name, u.role FROM sessions s \
         JOIN users u ON u.id = s.user_id \
         WHERE s.token = ? AND s.expires_at > ?",
    )
    .bind(token)
    .bind(crate::now_timestamp())
    .fetch_optional(pool)
    .await?;

    row.map(|(id, email, name, role)| -> Result<AuthUser> {
        let role = Role::parse(&role).ok_or_else(|| {
            Error::Database(crate::error::DbError::Corrupt {
                column: "users.role",
                message: role.clone(),
            })
        })?;
        Ok(AuthUser {
            id,
            email,
            name,
            role,
        })
    })
    .transpose()
}

/// Insert a user.
pub async fn create_user(pool: &SqlitePool, email: &str, name: &str, role: Role) -> Result<AuthUser> {
    let email = email.trim().to_ascii_lowercase();
    if !email.contains('@') {
        return Err(Error::Invalid(format!("not an email address: {email}")));
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Invalid("name must not be blank".into()));
    }

    let id = crate::new_id();
    sqlx::query("INSERT INTO users (id, email, name, role, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(&email)
        .bind(name)
        .bind(role.as_str())
        .bind(crate::now_timestamp())
        .execute(pool)
        .await?;

    Ok(AuthUser {
        id,
        email,
        name: name.to_string(),
        role,
    })
}

/// Issue a new session token for `user_id`, valid for `ttl`.
pub async fn create_session(pool: &SqlitePool, user_id: &str, ttl: chrono::Duration) -> Result<String> {
    let token = format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    let expires_at = (chrono::Utc::now() + ttl)
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string();

    sqlx::query("INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(&expires_at)
        .bind(crate::now_timestamp())
        .execute(pool)
        .await?;

    Ok(token)
}

impl FromRequestParts<Arc<ApiState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(ApiError::unauthorized)?;
        match lookup_session(&state.pool, token).await? {
            Some(user) => Ok(user),
            None => Err(ApiError::unauthorized()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use axum::http::Request;

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/me");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).expect("request").into_parts().0
    }

    #[test]
    fn role_ordering() {
        assert!(Role::Admin > Role::Manager);
        assert!(Role::Manager > Role::Member);
        assert_eq!(Role::parse(" ADMIN "), Some(Role::Admin));
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn parses_bearer_header() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("bearer  abc "))), Some("abc"));
        assert_eq!(bearer_token(&parts_with(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(None)), None);
    }

    #[tokio::test]
    async fn session_roundtrip_and_expiry() {
        let pool = test_pool().await;
        let user = create_user(&pool, "Ana@Example.com", "Ana", Role::Manager)
            .await
            .expect("user");
        assert_eq!(user.email, "ana@example.com");

        let token = create_session(&pool, &user.id, chrono::Duration::days(1))
            .await
            .expect("session");
        let found = lookup_session(&pool, &token).await.expect("lookup");
        assert_eq!(found.map(|u| u.role), Some(Role::Manager));

        let expired = create_session(&pool, &user.id, chrono::Duration::days(-1))
            .await
            .expect("expired session");
        assert!(lookup_session(&pool, &expired).await.expect("lookup").is_none());
        assert!(lookup_session(&pool, "unknown").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn member_access_follows_assignments() {
        let pool = test_pool().await;
        let member = create_user(&pool, "m@example.com", "M", Role::Member)
            .await
            .expect("member");
        let manager = create_user(&pool, "g@example.com", "G", Role::Manager)
            .await
            .expect("manager");
        let now = crate::now_timestamp();
        sqlx::query("INSERT INTO agency_clients (id, name, slug, status, created_at, updated_at) VALUES ('c1', 'Acme', 'acme', 'active', ?, ?)")
            .bind(&now)
            .bind(&now)
            .execute(&pool)
            .await
            .expect("client");

        assert!(!member.can_access_client(&pool, "c1").await.expect("check"));
        assert!(manager.can_access_client(&pool, "c1").await.expect("check"));

        sqlx::query("INSERT INTO client_assignments (id, client_id, user_id, created_at) VALUES ('a1', 'c1', ?, ?)")
            .bind(&member.id)
            .bind(&now)
            .execute(&pool)
            .await
            .expect("assign");
        assert!(member.can_access_client(&pool, "c1").await.expect("check"));

        assert_eq!(
            member
                .ensure_client_access(&pool, "missing")
                .await
                .expect_err("missing")
                .status,
            axum::http::StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn rejects_invalid_users() {
        let pool = test_pool().await;
        assert!(matches!(
            create_user(&pool, "nope", "N", Role::Member).await,
            Err(Error::Invalid(_))
        ));
        assert!(matches!(
            create_user(&pool, "a@b.c", "  ", Role::Member).await,
            Err(Error::Invalid(_))
        ));
    }
}
