//! Google Drive / Docs client over plain reqwest.
//!
//! Modules:
//! - auth: access-token resolution and refresh
//! - drive: Drive v3 file listing and plain-text export

pub mod auth;
pub mod drive;

pub use auth::GoogleAuth;
pub use drive::{DriveFile, DriveSource, GoogleDrive, GOOGLE_DOC_MIME};

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token expired or revoked")]
    AuthExpired,
    #[error("no Google credentials configured")]
    MissingCredentials,
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

const MAX_JITTER_MS: u64 = 150;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        return Duration::from_secs(secs.min(30));
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    Duration::from_millis(base.saturating_add(jitter_ms()))
}

/// Spread concurrent retries apart.
fn jitter_ms() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    nanos % MAX_JITTER_MS
}

/// Send `request`, retrying throttling, server errors and transient
/// transport failures. The final response is returned whatever its status.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, GoogleApiError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(GoogleApiError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if is_retryable_status(status) && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    tracing::warn!(attempt, attempts, %status, ?delay, "google api retry");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(error) => {
                if (error.is_timeout() || error.is_connect()) && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    tracing::warn!(attempt, attempts, %error, ?delay, "google api retry");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(GoogleApiError::Http(error));
            }
        }
    }

    Err(GoogleApiError::ApiError {
        status: 0,
        message: "request exhausted retries".into(),
    })
}

/// Map a non-success response into an error, consuming the body.
pub(crate) async fn error_for_response(response: reqwest::Response) -> GoogleApiError {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return GoogleApiError::AuthExpired;
    }
    let message = response.text().await.unwrap_or_default();
    GoogleApiError::ApiError {
        status: status.as_u16(),
        message,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    /// Router answering 503 for the first `failures` hits, then 200.
    async fn flaky_server(failures: usize, retry_after: Option<&'static str>) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/flaky",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < failures {
                        match retry_after {
                            Some(secs) => (
                                StatusCode::SERVICE_UNAVAILABLE,
                                [(header::RETRY_AFTER, secs)],
                                "busy",
                            )
                                .into_response(),
                            None => (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response(),
                        }
                    } else {
                        (StatusCode::OK, "done").into_response()
                    }
                }
            }),
        );
        (test_server::spawn(router).await, hits)
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(reqwest::StatusCode::REQUEST_TIMEOUT));
        assert!(!is_retryable_status(reqwest::StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(reqwest::StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn backoff_is_exponential_capped_and_jittered() {
        let policy = RetryPolicy::default();
        let within = |delay: Duration, base: u64| {
            delay >= Duration::from_millis(base) && delay < Duration::from_millis(base + MAX_JITTER_MS)
        };
        assert!(within(retry_delay(1, &policy, None), 250));
        assert!(within(retry_delay(2, &policy, None), 500));
        assert!(within(retry_delay(10, &policy, None), 2_000));
    }

    #[test]
    fn retry_after_header_wins_and_is_capped() {
        let policy = RetryPolicy::default();
        let header = reqwest::header::HeaderValue::from_static("7");
        assert_eq!(retry_delay(1, &policy, Some(&header)), Duration::from_secs(7));
        let header = reqwest::header::HeaderValue::from_static("600");
        assert_eq!(retry_delay(1, &policy, Some(&header)), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_server_error_then_succeeds() {
        let (base, hits) = flaky_server(1, None).await;
        let client = reqwest::Client::new();

        let response = send_with_retry(client.get(format!("{base}/flaky")), &fast_policy())
            .await
            .expect("response");

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.expect("body"), "done");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (base, hits) = flaky_server(usize::MAX, None).await;
        let client = reqwest::Client::new();

        let response = send_with_retry(client.get(format!("{base}/flaky")), &fast_policy())
            .await
            .expect("response");

        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(matches!(
            error_for_response(response).await,
            GoogleApiError::ApiError { status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn honours_retry_after() {
        let (base, hits) = flaky_server(1, Some("1")).await;
        let client = reqwest::Client::new();
        let started = std::time::Instant::now();

        let response = send_with_retry(client.get(format!("{base}/flaky")), &fast_policy())
            .await
            .expect("response");

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_expired() {
        let router = Router::new().route("/private", get(|| async { StatusCode::UNAUTHORIZED }));
        let base = test_server::spawn(router).await;

        let response = send_with_retry(
            reqwest::Client::new().get(format!("{base}/private")),
            &fast_policy(),
        )
        .await
        .expect("response");
        assert!(matches!(
            error_for_response(response).await,
            GoogleApiError::AuthExpired
        ));
    }
}
