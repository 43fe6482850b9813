//! Request handlers.
//!
//! Routing and engine calls are synchronous; the server collects the request
//! body and hands it over as bytes.

use crate::error::ServerError;
use crate::metrics::Metrics;
use hyper::body::Bytes;
use hyper::{Method, StatusCode};
use jsonfsm_core::{Dispatch, Reply, StateMachineEngine};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

/// Known endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    SendEvent,
    State,
    Machine,
    Health,
}

impl Route {
    /// Resolves a request line to a route.
    pub fn resolve(method: &Method, path: &str) -> Result<Self, ServerError> {
        let (route, allowed) = match path {
            "/send_event" => (Route::SendEvent, Method::POST),
            "/state" => (Route::State, Method::GET),
            "/machine" => (Route::Machine, Method::GET),
            "/health" => (Route::Health, Method::GET),
            _ => return Err(ServerError::NotFound(path.to_string())),
        };
        if *method != allowed {
            return Err(ServerError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            });
        }
        Ok(route)
    }

    /// Metric label.
    pub fn name(self) -> &'static str {
        match self {
            Route::SendEvent => "send_event",
            Route::State => "state",
            Route::Machine => "machine",
            Route::Health => "health",
        }
    }
}

/// Body of `POST /send_event`.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub action: String,
    #[serde(default)]
    pub param: String,
}

/// Transport-neutral response produced by the handler.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl HttpReply {
    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self {
            status,
            content_type: JSON,
            body: Bytes::from(value.to_string()),
        }
    }

    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        Self {
            status,
            content_type: TEXT,
            body: Bytes::from(text.into()),
        }
    }

    /// Structured error payload. Carries the message and code only.
    pub fn error(err: &ServerError) -> Self {
        Self::json(
            err.status(),
            &json!({ "error": err.to_string(), "code": err.error_code() }),
        )
    }

    fn from_dispatch(dispatch: Dispatch) -> Self {
        match dispatch.reply {
            Some(Reply::Accepted(value)) => Self::json(StatusCode::OK, &value),
            Some(Reply::Rejected(message)) => {
                Self::json(StatusCode::NOT_ACCEPTABLE, &json!({ "error": message }))
            }
            None => Self::json(StatusCode::OK, &json!({ "state": dispatch.to_state })),
        }
    }
}

/// Event handler shared by all connections.
pub struct EventHandler {
    engine: Arc<StateMachineEngine>,
    /// Metrics for request tracking.
    metrics: Option<Arc<Metrics>>,
}

impl EventHandler {
    /// Creates a new event handler.
    pub fn new(engine: Arc<StateMachineEngine>) -> Self {
        Self {
            engine,
            metrics: None,
        }
    }

    /// Sets the metrics for request tracking.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn engine(&self) -> &Arc<StateMachineEngine> {
        &self.engine
    }

    /// Handles a request whose body has been collected.
    pub fn handle(&self, method: &Method, path: &str, body: &[u8]) -> HttpReply {
        let route = match Route::resolve(method, path) {
            Ok(route) => route,
            Err(e) => return self.reject(None, e),
        };

        let timer = self.metrics.as_ref().map(|m| {
            m.request_duration
                .with_label_values(&[route.name()])
                .start_timer()
        });
        if let Some(ref metrics) = self.metrics {
            metrics.requests_total.with_label_values(&[route.name()]).inc();
        }

        let result = match route {
            Route::SendEvent => self.handle_send_event(body),
            Route::State => self.handle_state(),
            Route::Machine => Ok(self.handle_machine()),
            Route::Health => Ok(HttpReply::text(StatusCode::OK, "OK")),
        };
        drop(timer);

        match result {
            Ok(reply) => reply,
            Err(e) => self.reject(Some(route), e),
        }
    }

    /// Builds the error reply for a request that failed before or during
    /// routing, and counts it.
    pub fn reject(&self, route: Option<Route>, err: ServerError) -> HttpReply {
        let route = route.map(Route::name).unwrap_or("-");
        if err.status().is_server_error() {
            tracing::error!("Request failed on {}: {}", route, err);
        } else {
            tracing::debug!("Request rejected on {}: {}", route, err);
        }
        if let Some(ref metrics) = self.metrics {
            metrics
                .errors_total
                .with_label_values(&[err.error_code()])
                .inc();
        }
        HttpReply::error(&err)
    }

    fn handle_send_event(&self, body: &[u8]) -> Result<HttpReply, ServerError> {
        let request: EventRequest = serde_json::from_slice(body)?;
        if request.action.is_empty() {
            return Err(ServerError::BadRequest("missing action".to_string()));
        }

        let dispatch = self.engine.send_event(&request.action, &request.param)?;
        tracing::info!(
            "Event '{}': {} -> {}",
            request.action,
            dispatch.from_state.as_deref().unwrap_or("-"),
            dispatch.to_state
        );

        if let Some(ref metrics) = self.metrics {
            metrics
                .events_total
                .with_label_values(&[request.action.as_str()])
                .inc();
            metrics.record_path(&dispatch.path);
        }

        Ok(HttpReply::from_dispatch(dispatch))
    }

    fn handle_state(&self) -> Result<HttpReply, ServerError> {
        let state = self.engine.ready_state()?;
        let events = self.engine.definition().events_from(&state);
        Ok(HttpReply::json(
            StatusCode::OK,
            &json!({ "state": state, "events": events }),
        ))
    }

    fn handle_machine(&self) -> HttpReply {
        let def = self.engine.definition();
        let states: Vec<Value> = def
            .states()
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "action": s.action,
                    "waitForEvent": s.wait_for_event,
                    "sendResponse": s.send_response,
                })
            })
            .collect();

        HttpReply::json(
            StatusCode::OK,
            &json!({
                "initialState": def.initial_state().name,
                "states": states,
                "transitions": def.transitions().len(),
                "events": def.events(),
                "checksum": def.checksum,
            }),
        )
    }
}
