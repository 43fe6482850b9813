//! Action handler registry.
//!
//! Every state names an action. When the state is left, the engine looks
//! the action up here and calls it with a string argument and an
//! [`ActionContext`]. The boolean it returns is the action's outcome and
//! picks the branch of a branching transition; a failure to run at all is
//! reported through [`ActionError`] instead.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a handler that could not run.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Answer for whoever submitted the event, recorded by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The event was handled; the value is the response body.
    Accepted(Value),
    /// The event was handled but the submitter's input was refused.
    Rejected(String),
}

/// Per-dispatch context passed to every handler invocation.
#[derive(Debug, Default)]
pub struct ActionContext {
    state: String,
    send_response: bool,
    event: Option<String>,
    reply: Option<Reply>,
}

impl ActionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points the context at the state whose action is about to run.
    pub(crate) fn enter(&mut self, state: &str, send_response: bool, event: Option<&str>) {
        self.state.clear();
        self.state.push_str(state);
        self.send_response = send_response;
        self.event = event.map(str::to_string);
    }

    /// Name of the state whose action is running.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Whether that state is configured to answer the submitter.
    pub fn send_response(&self) -> bool {
        self.send_response
    }

    /// Event that triggered this link, or `None` for an automatic one.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// Records a reply. Only the first reply of a dispatch is kept.
    pub fn reply(&mut self, reply: Reply) {
        if self.reply.is_some() {
            tracing::debug!(
                "Dropping reply from state '{}': already answered",
                self.state
            );
            return;
        }
        self.reply = Some(reply);
    }

    pub fn has_reply(&self) -> bool {
        self.reply.is_some()
    }

    pub(crate) fn take_reply(&mut self) -> Option<Reply> {
        self.reply.take()
    }
}

/// A callable bound to an action name.
pub trait ActionHandler: Send + Sync {
    fn call(&self, arg: &str, ctx: &mut ActionContext) -> Result<bool, ActionError>;
}

impl<F> ActionHandler for F
where
    F: Fn(&str, &mut ActionContext) -> Result<bool, ActionError> + Send + Sync,
{
    fn call(&self, arg: &str, ctx: &mut ActionContext) -> Result<bool, ActionError> {
        self(arg, ctx)
    }
}

/// Maps action names to handlers.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `handler`. A previous binding is replaced; returns
    /// true if there was one.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> bool
    where
        F: Fn(&str, &mut ActionContext) -> Result<bool, ActionError> + Send + Sync + 'static,
    {
        let name = name.into();
        let replaced = self.handlers.insert(name.clone(), Arc::new(handler)).is_some();
        if replaced {
            tracing::debug!("Replaced handler for action '{}'", name);
        }
        replaced
    }

    /// Looks up the handler bound to `name`.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Returns registered action names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ActionRegistry::new();
        assert!(registry.is_empty());

        registry.register("Always", |_, _| Ok(true));
        assert!(registry.contains("Always"));
        assert!(registry.lookup("Missing").is_none());

        let handler = registry.lookup("Always").unwrap();
        let mut ctx = ActionContext::new();
        assert!(handler.call("x", &mut ctx).unwrap());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = ActionRegistry::new();
        assert!(!registry.register("Check", |_, _| Ok(true)));
        assert!(registry.register("Check", |_, _| Ok(false)));
        assert_eq!(registry.len(), 1);

        let mut ctx = ActionContext::new();
        let outcome = registry.lookup("Check").unwrap().call("", &mut ctx).unwrap();
        assert!(!outcome);
    }

    #[test]
    fn test_handler_error() {
        let mut registry = ActionRegistry::new();
        registry.register("Broken", |arg, _| {
            Err(ActionError::new(format!("cannot handle '{}'", arg)))
        });

        let mut ctx = ActionContext::new();
        let err = registry.lookup("Broken").unwrap().call("x", &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "cannot handle 'x'");
    }

    #[test]
    fn test_first_reply_kept() {
        let mut ctx = ActionContext::new();
        ctx.enter("A", true, Some("GO"));
        assert_eq!(ctx.state(), "A");
        assert_eq!(ctx.event(), Some("GO"));
        assert!(ctx.send_response());

        ctx.reply(Reply::Accepted(Value::from("first")));
        ctx.enter("B", false, None);
        ctx.reply(Reply::Rejected("second".into()));

        assert!(ctx.event().is_none());
        assert_eq!(ctx.take_reply(), Some(Reply::Accepted(Value::from("first"))));
        assert!(!ctx.has_reply());
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = ActionRegistry::new();
        registry.register("b", |_, _| Ok(true));
        registry.register("a", |_, _| Ok(true));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
