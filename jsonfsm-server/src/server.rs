//! HTTP server implementation.

use crate::error::ServerError;
use crate::handler::{EventHandler, HttpReply};
use crate::metrics::Metrics;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use jsonfsm_core::StateMachineEngine;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Response header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_connections", &self.max_connections)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_body_bytes: 64 * 1024,
            max_connections: 1000,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the request body limit.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// HTTP event server for jsonfsm.
pub struct Server {
    config: ServerConfig,
    handler: Arc<EventHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server around an initialized engine.
    pub fn new(config: ServerConfig, engine: Arc<StateMachineEngine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handler = EventHandler::new(engine);
        if let Some(ref metrics) = config.metrics {
            handler = handler.with_metrics(metrics.clone());
        }
        Self {
            config,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on http://{}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    handler,
                                    stats.clone(),
                                    config.max_body_bytes,
                                    &mut conn_shutdown,
                                )
                                .await;

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                if let Some(ref metrics) = config.metrics {
                                    metrics.connections_active.dec();
                                }
                                tracing::debug!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Serves HTTP/1.1 on one connection until the peer closes it or the
    /// server shuts down.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<EventHandler>,
        stats: Arc<ServerStats>,
        max_body_bytes: usize,
        shutdown: &mut broadcast::Receiver<()>,
    ) {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req| {
            let handler = handler.clone();
            let stats = stats.clone();
            async move {
                Ok::<_, Infallible>(Self::serve(req, addr, &handler, &stats, max_body_bytes).await)
            }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!("Connection {} error: {}", addr, e);
                }
            }
            _ = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                if let Err(e) = conn.await {
                    tracing::debug!("Connection {} error during shutdown: {}", addr, e);
                }
            }
        }
    }

    /// Handles one request: collects the body, dispatches it, and stamps the
    /// reply with a request id.
    async fn serve(
        req: Request<Incoming>,
        addr: SocketAddr,
        handler: &EventHandler,
        stats: &ServerStats,
        max_body_bytes: usize,
    ) -> Response<Full<Bytes>> {
        let request_id = Uuid::new_v4();
        let (parts, body) = req.into_parts();
        let path = parts.uri.path().to_string();
        tracing::info!("[{}] {} {} {}", request_id, addr, parts.method, path);
        stats.requests_total.fetch_add(1, Ordering::Relaxed);

        let reply = match Limited::new(body, max_body_bytes).collect().await {
            Ok(collected) => handler.handle(&parts.method, &path, &collected.to_bytes()),
            Err(e) => {
                let err = if e.downcast_ref::<LengthLimitError>().is_some() {
                    ServerError::PayloadTooLarge {
                        limit: max_body_bytes,
                    }
                } else {
                    ServerError::BadRequest(e.to_string())
                };
                handler.reject(None, err)
            }
        };

        if !reply.status.is_success() {
            stats.errors_total.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!("[{}] {}", request_id, reply.status);
        Self::into_response(reply, request_id)
    }

    fn into_response(reply: HttpReply, request_id: Uuid) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(reply.body));
        *response.status_mut() = reply.status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(reply.content_type));
        if let Ok(id) = HeaderValue::from_str(&request_id.to_string()) {
            headers.insert(REQUEST_ID_HEADER, id);
        }
        response
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
