//! Health probes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Default hard timeout for one probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Why a probe did not report the server healthy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Health check request failed: {0}")]
    Request(String),

    #[error("Health check returned status {0}")]
    Status(u16),

    #[error("Server reported status '{0}'")]
    Unhealthy(String),

    #[error("Health check timed out")]
    Timeout,
}

/// One reachability check against the sync server.
///
/// Implementations report `Ok(())` only when the server is reachable and
/// healthy; the monitor measures latency around the call.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), ProbeError>;
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: Option<String>,
}

/// Probes `GET <health_url>` and expects `{"status": "healthy"}`.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache, no-store")
            .header(reqwest::header::PRAGMA, "no-cache")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeError::Timeout
                } else {
                    ProbeError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body: HealthResponse = response
            .json()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        match body.status.as_deref() {
            Some("healthy") => Ok(()),
            Some(other) => Err(ProbeError::Unhealthy(other.to_string())),
            None => Err(ProbeError::Unhealthy("missing".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_healthy_server() {
        let app = Router::new().route(
            "/health",
            get(|headers: HeaderMap| async move {
                let no_store = headers
                    .get("cache-control")
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.contains("no-store"));
                let status = if no_store { "healthy" } else { "cached" };
                Json(json!({ "status": status }))
            }),
        );
        let base = serve(app).await;

        let probe = HttpHealthProbe::new(format!("{}/health", base));
        assert_eq!(probe.probe().await, Ok(()));
    }

    #[tokio::test]
    async fn test_unhealthy_body() {
        let app = Router::new().route(
            "/health",
            get(|| async { Json(json!({ "status": "unhealthy" })) }),
        );
        let base = serve(app).await;

        let probe = HttpHealthProbe::new(format!("{}/health", base));
        assert_eq!(
            probe.probe().await,
            Err(ProbeError::Unhealthy("unhealthy".to_string()))
        );
    }

    #[tokio::test]
    async fn test_error_status() {
        let app = Router::new().route(
            "/health",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, Json(Value::Null)) }),
        );
        let base = serve(app).await;

        let probe = HttpHealthProbe::new(format!("{}/health", base));
        assert_eq!(probe.probe().await, Err(ProbeError::Status(503)));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpHealthProbe::new(format!("http://{}/health", addr))
            .with_timeout(Duration::from_secs(2));
        assert!(matches!(
            probe.probe().await,
            Err(ProbeError::Request(_)) | Err(ProbeError::Timeout)
        ));
    }
}
