//! Core error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the state machine engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("state not found: {state}")]
    StateNotFound { state: String },

    #[error("no transition from state '{state}' on event '{event}'")]
    TransitionNotFound { state: String, event: String },

    #[error("no handler registered for action '{action}' (state '{state}')")]
    HandlerNotRegistered { action: String, state: String },

    #[error("action '{action}' failed in state '{state}': {reason}")]
    ActionFailed {
        action: String,
        state: String,
        reason: String,
    },

    #[error("transition cycle detected at state '{}': {}", .state, .path.join(" -> "))]
    TransitionCycle { state: String, path: Vec<String> },

    #[error("state machine not initialized")]
    NotInitialized,

    #[error("failed to read '{}': {}", .path.display(), .source)]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        CoreError::InvalidDefinition {
            reason: reason.into(),
        }
    }

    /// Returns an error code suitable for response payloads and metric labels.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            CoreError::StateNotFound { .. } => "STATE_NOT_FOUND",
            CoreError::TransitionNotFound { .. } => "TRANSITION_NOT_FOUND",
            CoreError::HandlerNotRegistered { .. } => "HANDLER_NOT_REGISTERED",
            CoreError::ActionFailed { .. } => "ACTION_FAILED",
            CoreError::TransitionCycle { .. } => "TRANSITION_CYCLE",
            CoreError::NotInitialized => "NOT_INITIALIZED",
            CoreError::Io { .. } => "IO_ERROR",
            CoreError::Json(_) => "BAD_REQUEST",
            CoreError::Yaml(_) => "BAD_REQUEST",
        }
    }

    /// Returns whether the caller caused this error (as opposed to a wiring
    /// or configuration defect on the machine side).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::StateNotFound { .. }
                | CoreError::TransitionNotFound { .. }
                | CoreError::NotInitialized
                | CoreError::Json(_)
                | CoreError::Yaml(_)
        )
    }
}
