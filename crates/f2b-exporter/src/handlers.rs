//! HTTP request handlers: Prometheus scrape endpoint and health check.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use prometheus::{Encoder, TextEncoder};
use tracing::error;

use crate::state::SharedState;

/// Runs one scrape cycle and renders it in the text exposition format.
///
/// The cycle does blocking socket and file I/O, so it runs off the async
/// workers. Text file contents are appended verbatim after the encoded
/// families.
pub(crate) async fn handle_metrics(State(state): State<SharedState>) -> Response {
    let registry = state.registry.clone();
    let textfile = state.textfile.clone();
    let scrape = tokio::task::spawn_blocking(move || {
        let mut families = registry.gather();
        let scan = textfile.map(|textfile| textfile.scan());
        if let Some(scan) = &scan {
            families.extend(scan.families());
        }
        (families, scan.map(|scan| scan.content))
    });
    let (families, extra) = match scrape.await {
        Ok(scrape) => scrape,
        Err(e) => {
            error!(error = %e, "scrape task failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut body) {
        error!(error = %e, "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    if let Some(extra) = extra {
        body.extend_from_slice(extra.as_bytes());
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_owned())],
        body,
    )
        .into_response()
}

pub(crate) async fn handle_health(State(state): State<SharedState>) -> (StatusCode, &'static str) {
    let health = state.health.clone();
    match tokio::task::spawn_blocking(move || health.healthy()).await {
        Ok(true) => (StatusCode::OK, "ok"),
        Ok(false) => (StatusCode::SERVICE_UNAVAILABLE, "fail2ban server unavailable"),
        Err(e) => {
            error!(error = %e, "health task failed");
            (StatusCode::SERVICE_UNAVAILABLE, "health check failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use f2b_exporter_core::collector::{MetricsCollector, MockClient};
    use f2b_exporter_core::textfile::TextfileCollector;

    use crate::router;
    use crate::state::AppState;

    fn app_with(
        client: MockClient,
        creds: Option<Arc<(String, String)>>,
        textfile: Option<TextfileCollector>,
    ) -> axum::Router {
        let collector = MetricsCollector::new(client, "0.3.0", false, None).with_hostname("test");
        router(AppState::new(collector, textfile).unwrap(), creds)
    }

    fn app(client: MockClient, creds: Option<Arc<(String, String)>>) -> axum::Router {
        app_with(client, creds, None)
    }

    async fn get(app: axum::Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metrics_endpoint_renders_text_format() {
        let (status, body) = get(app(MockClient::typical(), None), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("f2b_up{host=\"test\"} 1"));
        assert!(body.contains("f2b_jail_count{host=\"test\"} 2"));
        assert!(body.contains("# TYPE f2b_errors counter"));
        assert!(body.contains("f2b_config_jail_ban_time{host=\"test\",jail=\"sshd\"} 600"));
        assert_eq!(body.matches("f2b_banned_ip{").count(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metrics_endpoint_degrades_when_unreachable() {
        let (status, body) = get(app(MockClient::new().unreachable(), None), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("f2b_up{host=\"test\"} 0"));
        assert!(!body.contains("f2b_jail_count"));
        assert!(!body.contains("f2b_version"));
        assert!(body.contains("f2b_errors{host=\"test\",type=\"socket_conn\"} 2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metrics_endpoint_appends_textfiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bans.prom"), "manual_bans_total 7\n").unwrap();
        std::fs::create_dir(dir.path().join("broken.prom")).unwrap();

        let textfile = TextfileCollector::new(dir.path());
        let (status, body) = get(app_with(MockClient::typical(), None, Some(textfile)), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("f2b_up{host=\"test\"} 1"));
        assert!(body.ends_with("manual_bans_total 7\n"));
        assert!(body.contains("bans.prom\"} 0"));
        assert!(body.contains("broken.prom\"} 1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn health_endpoint() {
        let (status, body) = get(app(MockClient::typical(), None), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, _) = get(app(MockClient::typical().not_alive(), None), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = get(app(MockClient::new().unreachable(), None), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
