//! HTTP server for Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::collector::SharedCollector;
use crate::exposition::CONTENT_TYPE;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    collector: SharedCollector,
}

/// Create the HTTP router.
pub fn create_router(collector: SharedCollector, metrics_path: &str) -> Router {
    let state = AppState { collector };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint. Always 200, possibly with an empty body.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.collector.render().await;

    (StatusCode::OK, [("content-type", CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.collector.is_ready() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - telemetry source unavailable\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer {
    collector: SharedCollector,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(collector: SharedCollector, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            collector,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address.
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "Starting HTTP server"
        );

        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr().unwrap_or(self.listen_addr);
        let router = create_router(self.collector, &self.metrics_path);

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                // Wait for shutdown signal
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::TelemetryCollector;
    use crate::config::{ReconnectConfig, SourceConfig};
    use crate::fake::{FetchStep, ScriptedSource, StaticHost};
    use crate::session::TelemetrySession;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use jetsight_common::{FanReading, SourceReading};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn make_collector(source: &ScriptedSource) -> (Arc<TelemetrySession>, SharedCollector) {
        let config = SourceConfig {
            connect_timeout_ms: 50,
            read_timeout_ms: 50,
            reconnect: ReconnectConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let session = TelemetrySession::open(
            Box::new(source.clone()),
            Box::new(StaticHost::new("alice", "node1")),
            &config,
        )
        .await
        .unwrap();
        let session = Arc::new(session);
        let collector = Arc::new(TelemetryCollector::new(session.clone(), "jetson", false));
        (session, collector)
    }

    fn steady_source() -> ScriptedSource {
        ScriptedSource::steady(SourceReading {
            fan: Some(FanReading { speed: 40.0 }),
            ..Default::default()
        })
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let source = steady_source();
        let (session, collector) = make_collector(&source).await;
        let router = create_router(collector, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert_eq!(content_type.to_str().unwrap(), CONTENT_TYPE);

        let body = body_string(response).await;
        assert!(body.contains("jetson_usage_fan{fan=\"speed\"} 40"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_metrics_endpoint_unready_is_empty_ok() {
        let source = steady_source();
        let (session, collector) = make_collector(&source).await;
        source.push(FetchStep::Fail("daemon stopped".to_string()));
        let router = create_router(collector, "/metrics");

        // The failing scrape and the unready one both answer 200 with no lines
        for _ in 0..2 {
            let response = router
                .clone()
                .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_string(response).await, "");
        }

        session.close().await;
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let source = steady_source();
        let (session, collector) = make_collector(&source).await;
        let router = create_router(collector, "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        session.close().await;
    }

    #[tokio::test]
    async fn test_ready_endpoint_ready() {
        let source = steady_source();
        let (session, collector) = make_collector(&source).await;
        let router = create_router(collector, "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        session.close().await;
    }

    #[tokio::test]
    async fn test_ready_endpoint_not_ready() {
        let source = steady_source();
        let (session, collector) = make_collector(&source).await;
        source.push(FetchStep::Fail("daemon stopped".to_string()));
        collector.collect().await;

        let router = create_router(collector, "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        // Not ready because the source dropped
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        session.close().await;
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let source = steady_source();
        let (session, collector) = make_collector(&source).await;
        let router = create_router(collector, "/prometheus/metrics");

        // Custom path should work
        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Default path should 404
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        session.close().await;
    }
}
