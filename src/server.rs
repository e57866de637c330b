//! Health and Metrics Server
//!
//! - `/healthz`, `/livez`: process is up
//! - `/readyz`: caches synced (controller) or first publish done (sidecar)
//! - `/metrics`: Prometheus text format

use crate::error::Result;
use crate::metrics::Metrics;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Readiness predicate evaluated on every `/readyz` request
pub type ReadinessCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// HTTP endpoint for probes and scraping
#[derive(Clone)]
pub struct HealthServer {
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    readiness: ReadinessCheck,
}

impl HealthServer {
    pub fn new(addr: SocketAddr, metrics: Arc<Metrics>, readiness: ReadinessCheck) -> Self {
        Self {
            addr,
            metrics,
            readiness,
        }
    }

    /// Serve until `shutdown` fires
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let state = self.clone();
        let make_svc = make_service_fn(move |_conn| {
            let state = state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(state.route(&req)) }
                }))
            }
        });

        let server = Server::try_bind(&self.addr)?.serve(make_svc);
        info!(addr = %self.addr, "Health and metrics server listening");

        server
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Health and metrics server stopped");
        Ok(())
    }

    /// Answer one request
    pub fn route(&self, req: &Request<Body>) -> Response<Body> {
        match req.uri().path() {
            "/healthz" | "/livez" => text(StatusCode::OK, "ok"),
            "/readyz" => {
                if (self.readiness)() {
                    text(StatusCode::OK, "ok")
                } else {
                    text(StatusCode::SERVICE_UNAVAILABLE, "not ready")
                }
            }
            "/metrics" => match self.metrics.encode() {
                Ok(buffer) => {
                    let mut response = Response::new(Body::from(buffer));
                    response.headers_mut().insert(
                        CONTENT_TYPE,
                        HeaderValue::from_static(prometheus::TEXT_FORMAT),
                    );
                    response
                }
                Err(e) => {
                    warn!(error = %e, "Failed to encode metrics");
                    text(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics")
                }
            },
            _ => text(StatusCode::NOT_FOUND, "not found"),
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn server(ready: Arc<AtomicBool>) -> HealthServer {
        HealthServer::new(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(Metrics::new().unwrap()),
            Arc::new(move || ready.load(Ordering::Relaxed)),
        )
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_health_endpoints() {
        let server = server(Arc::new(AtomicBool::new(false)));
        assert_eq!(server.route(&get("/healthz")).status(), StatusCode::OK);
        assert_eq!(server.route(&get("/livez")).status(), StatusCode::OK);
        assert_eq!(server.route(&get("/nope")).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_readiness_follows_check() {
        let ready = Arc::new(AtomicBool::new(false));
        let server = server(ready.clone());
        assert_eq!(
            server.route(&get("/readyz")).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );

        ready.store(true, Ordering::Relaxed);
        assert_eq!(server.route(&get("/readyz")).status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let server = server(Arc::new(AtomicBool::new(true)));
        server.metrics.queue_adds.inc();

        let response = server.route(&get("/metrics"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            HeaderValue::from_static(prometheus::TEXT_FORMAT)
        );
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("storage_capability_queue_adds_total 1"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = server(Arc::new(AtomicBool::new(true)));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        server.serve(shutdown).await.unwrap();
    }
}
