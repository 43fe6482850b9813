//! Prometheus metrics for the jsonfsm server.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Request duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Prometheus metrics for the jsonfsm server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Total requests by route.
    pub requests_total: CounterVec,
    /// Total errors by error code.
    pub errors_total: CounterVec,
    /// Request duration histogram by route.
    pub request_duration: HistogramVec,
    /// Events applied, by event name.
    pub events_total: CounterVec,
    /// States entered, by state name.
    pub state_entries_total: CounterVec,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "jsonfsm_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "jsonfsm_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        // Requests
        let requests_total = CounterVec::new(
            Opts::new("jsonfsm_requests_total", "Total requests by route"),
            &["route"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let errors_total = CounterVec::new(
            Opts::new("jsonfsm_errors_total", "Total errors by error code"),
            &["code"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "jsonfsm_request_duration_seconds",
                "Request duration in seconds by route",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["route"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        // Machine
        let events_total = CounterVec::new(
            Opts::new("jsonfsm_events_total", "Events applied by event name"),
            &["event"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        let state_entries_total = CounterVec::new(
            Opts::new("jsonfsm_state_entries_total", "States entered by state name"),
            &["state"],
        )?;
        registry.register(Box::new(state_entries_total.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            requests_total,
            errors_total,
            request_duration,
            events_total,
            state_entries_total,
        })
    }

    /// Records every state on a dispatch path.
    pub fn record_path(&self, path: &[String]) {
        for state in path {
            self.state_entries_total.with_label_values(&[state.as_str()]).inc();
        }
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (status, content_type, body) = match req.uri().path() {
        "/metrics" => (
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            Bytes::from(metrics.encode()),
        ),
        "/health" | "/healthz" => (StatusCode::OK, "text/plain", Bytes::from_static(b"OK")),
        _ => (
            StatusCode::NOT_FOUND,
            "text/plain",
            Bytes::from_static(b"Not Found"),
        ),
    };

    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.connections_total.inc();
        metrics.connections_active.inc();
        metrics.requests_total.with_label_values(&["send_event"]).inc();
        metrics
            .errors_total
            .with_label_values(&["TRANSITION_NOT_FOUND"])
            .inc();
        metrics
            .request_duration
            .with_label_values(&["send_event"])
            .observe(0.001);

        let encoded = String::from_utf8(metrics.encode()).unwrap();
        assert!(encoded.contains("jsonfsm_connections_total"));
        assert!(encoded.contains("jsonfsm_connections_active"));
        assert!(encoded.contains("jsonfsm_requests_total"));
        assert!(encoded.contains("jsonfsm_errors_total"));
        assert!(encoded.contains("jsonfsm_request_duration_seconds"));
    }

    #[test]
    fn test_record_path() {
        let metrics = Metrics::new().unwrap();
        metrics.events_total.with_label_values(&["USER_CODE"]).inc();
        metrics.record_path(&["SEND_OK_RESPONSE".to_string(), "ARMED".to_string()]);
        metrics.record_path(&["ARMED".to_string()]);

        assert_eq!(
            metrics
                .state_entries_total
                .with_label_values(&["ARMED"])
                .get(),
            2.0
        );

        let encoded = String::from_utf8(metrics.encode()).unwrap();
        assert!(encoded.contains("jsonfsm_events_total{event=\"USER_CODE\"} 1"));
        assert!(encoded.contains("jsonfsm_state_entries_total{state=\"SEND_OK_RESPONSE\"} 1"));
    }

    #[tokio::test]
    async fn test_metrics_server_shutdown() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let (tx, rx) = broadcast::channel(1);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let task = tokio::spawn(run_metrics_server(addr, metrics, rx));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        assert!(task.await.unwrap().is_ok());
    }
}
