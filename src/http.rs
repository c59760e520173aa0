use crate::metrics::Metrics;
use crate::sample::Sample;
use crate::state::State as ReporterState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<ReporterState>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiState {
    pub started_at_unix: i64,
    pub endpoint: String,
    pub profile: &'static str,
    pub tenant_id: Option<String>,
    pub container_id: Option<String>,
    pub samples_sent: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_sent_at: Option<String>,
    pub last_error: Option<String>,
    pub last_sample: Option<Sample>,
}

impl From<&ReporterState> for ApiState {
    fn from(value: &ReporterState) -> Self {
        Self {
            started_at_unix: value.started_at_unix,
            endpoint: value.endpoint.clone(),
            profile: value.profile.as_str(),
            tenant_id: value.tenant_id.clone(),
            container_id: value.container_id.clone(),
            samples_sent: value.samples_sent,
            failures: value.failures,
            consecutive_failures: value.consecutive_failures,
            last_sent_at: value.last_sent_unix.map(format_unix),
            last_error: value.last_error.clone(),
            last_sample: value.last_sample.as_ref().map(Sample::redacted),
        }
    }
}

pub fn build_router(metrics: Arc<Metrics>, state: Arc<RwLock<ReporterState>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .with_state(HttpAppState { metrics, state })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(ApiState::from(&*guard))
}

fn format_unix(secs: i64) -> String {
    let st = UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64);
    humantime::format_rfc3339_seconds(st).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn reporter_state() -> Arc<RwLock<ReporterState>> {
        Arc::new(RwLock::new(ReporterState::new(
            0,
            "ws://localhost:8000/api/v1/public/monitoring",
            Profile::Full,
        )))
    }

    async fn get_text(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let metrics = Metrics::new().expect("metrics init");
        let app = build_router(metrics, reporter_state());

        let (status, body) = get_text(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn metrics_contains_uptime() {
        let metrics = Metrics::new().expect("metrics init");
        let app = build_router(metrics, reporter_state());

        let (status, body) = get_text(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("agent_uptime_seconds"));
        assert!(body.contains("agent_scrape_count_total 1"));
    }

    #[tokio::test]
    async fn api_state_hides_the_key() {
        let metrics = Metrics::new().expect("metrics init");
        let state = reporter_state();
        state.write().await.record_sent(
            Sample {
                tenant_id: Some("tenant-1".to_string()),
                container_id: Some("c-1".to_string()),
                key: Some("abc123".to_string()),
                timestamp: "2024-01-01T00:00:00+09:00".to_string(),
                cpu_usage_percent: 42.4,
                memory_used_mb: 2048,
                memory_total_mb: 8192,
                disk_used_gb: 50,
                disk_total_gb: 500,
                process_list: Some(Vec::new()),
            },
            1_704_034_800,
        );
        let app = build_router(metrics, state);

        let (status, body) = get_text(app, "/api/state").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"samples_sent\":1"));
        assert!(body.contains("\"cpuUsagePercent\":42.4"));
        assert!(body.contains("\"last_sent_at\":\"2023-12-31T15:00:00Z\""));
        assert!(!body.contains("abc123"));
    }
}
