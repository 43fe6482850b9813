//! # jsonfsm-server
//!
//! HTTP event ingress for jsonfsm.
//!
//! This crate provides:
//! - HTTP/1.1 connection handling with async I/O
//! - Routing of event submissions and introspection requests to the engine
//! - Translation of engine results into status codes and payloads
//! - Layered configuration (defaults, YAML file, environment)
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod server;

pub use config::{Config, ConfigError, MetricsConfig, NetworkConfig};
pub use error::ServerError;
pub use handler::{EventHandler, EventRequest, HttpReply, Route};
pub use metrics::{run_metrics_server, Metrics};
pub use server::{Server, ServerConfig, ServerStats};
