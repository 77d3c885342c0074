//! Access-token resolution for Google APIs.
//!
//! Either a pre-issued access token is used as-is, or a refresh token is
//! exchanged at the token endpoint and the result cached until shortly
//! before it expires.

use super::GoogleApiError;
use crate::config::GoogleConfig;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

/// Refresh this long before the reported expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RefreshCredentials {
    refresh_token: String,
    client_id: String,
    client_secret: Option<String>,
    token_uri: String,
}

#[derive(Debug)]
enum TokenSource {
    Static(String),
    Refresh(RefreshCredentials),
    Missing,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Resolves bearer tokens for Drive requests.
pub struct GoogleAuth {
    source: TokenSource,
    client: reqwest::Client,
    /// Serializes refreshes and holds the current token.
    cached: Mutex<Option<CachedToken>>,
}

impl GoogleAuth {
    pub fn from_config(config: &GoogleConfig, client: reqwest::Client) -> Self {
        let source = match (&config.access_token, &config.refresh_token, &config.client_id) {
            (Some(token), _, _) if !token.trim().is_empty() => TokenSource::Static(token.clone()),
            (_, Some(refresh_token), Some(client_id)) => TokenSource::Refresh(RefreshCredentials {
                refresh_token: refresh_token.clone(),
                client_id: client_id.clone(),
                client_secret: config.client_secret.clone(),
                token_uri: config.token_uri.clone(),
            }),
            _ => TokenSource::Missing,
        };

        Self {
            source,
            client,
            cached: Mutex::new(None),
        }
    }

    /// Whether any credential is configured at all.
    pub fn is_configured(&self) -> bool {
        !matches!(self.source, TokenSource::Missing)
    }

    /// Current access token, refreshing if necessary.
    pub async fn access_token(&self) -> Result<String, GoogleApiError> {
        let credentials = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Missing => return Err(GoogleApiError::MissingCredentials),
            TokenSource::Refresh(credentials) => credentials,
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !is_expired(token.expires_at, Utc::now()) {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.refresh(credentials).await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    async fn refresh(
        &self,
        credentials: &RefreshCredentials,
    ) -> Result<CachedToken, GoogleApiError> {
        let mut form = vec![
            ("client_id", credentials.client_id.as_str()),
            ("refresh_token", credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        if let Some(secret) = credentials.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let response = self
            .client
            .post(&credentials.token_uri)
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            if body.contains("invalid_grant") {
                return Err(GoogleApiError::AuthExpired);
            }
            return Err(GoogleApiError::RefreshFailed(format!("{status}: {body}")));
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        tracing::debug!(expires_in = token.expires_in, "refreshed google access token");

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(token.expires_in),
        })
    }
}

fn is_expired(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at <= now + chrono::Duration::seconds(EXPIRY_SKEW_SECS)
}
