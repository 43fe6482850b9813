//! State machine engine - owns the current state and runs transitions.
//!
//! Every mutating call (`init`, `set_state`, `send_event`) runs under one
//! mutex, including the whole automatic chain it triggers and every handler
//! invoked along the way. Introspection takes the same mutex.

use crate::definition::{MachineDefinition, StateSpec, TransitionSpec};
use crate::error::CoreError;
use crate::registry::{ActionContext, ActionRegistry, Reply};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Result of a successful `init`, `set_state` or `send_event`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// State before the call (`None` when the machine had no state yet).
    pub from_state: Option<String>,
    /// State the machine settled in.
    pub to_state: String,
    /// Every state entered during the call, in order.
    pub path: Vec<String>,
    /// Reply recorded by a handler, if any.
    pub reply: Option<Reply>,
}

#[derive(Debug, Default)]
struct Cursor {
    current: Option<String>,
    ready: bool,
}

/// Bookkeeping for one chain resolution pass.
#[derive(Default)]
struct Chain {
    ctx: ActionContext,
    path: Vec<String>,
    visited: HashSet<String>,
}

impl Chain {
    fn finish(mut self, from_state: Option<String>, to_state: &StateSpec) -> Dispatch {
        Dispatch {
            from_state,
            to_state: to_state.name.clone(),
            reply: self.ctx.take_reply(),
            path: self.path,
        }
    }
}

/// The state machine engine.
pub struct StateMachineEngine {
    definition: Arc<MachineDefinition>,
    registry: ActionRegistry,
    cursor: Mutex<Cursor>,
}

impl StateMachineEngine {
    /// Creates an uninitialized engine. Actions without a registered handler
    /// are reported but do not prevent construction.
    pub fn new(definition: impl Into<Arc<MachineDefinition>>, registry: ActionRegistry) -> Self {
        let definition = definition.into();

        let mut missing: Vec<&str> = definition
            .states()
            .iter()
            .map(|s| s.action.as_str())
            .filter(|action| !registry.contains(action))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        for action in missing {
            tracing::error!("No handler registered for action '{}'", action);
        }

        Self {
            definition,
            registry,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    /// Creates an engine with the builtin actions registered.
    pub fn with_builtins(definition: MachineDefinition) -> Self {
        let registry = ActionRegistry::with_builtins(&definition);
        Self::new(definition, registry)
    }

    /// Enters the initial state and follows any automatic transitions.
    pub fn init(&self) -> Result<Dispatch, CoreError> {
        let mut cursor = self.cursor.lock();
        if cursor.ready {
            tracing::info!("Re-initializing state machine");
        }
        cursor.ready = false;

        let from = cursor.current.clone();
        let mut chain = Chain::default();
        let initial = &self.definition.initial_state().name;
        let state = self.settle(&mut cursor, initial, &mut chain)?;
        cursor.ready = true;

        tracing::info!("State machine initialized in state '{}'", state.name);
        Ok(chain.finish(from, state))
    }

    /// Moves the machine to `name`, following automatic transitions if that
    /// state does not wait for an event. Unknown names leave the machine
    /// where it was.
    pub fn set_state(&self, name: &str) -> Result<Dispatch, CoreError> {
        let mut cursor = self.cursor.lock();
        let from = Self::require_ready(&cursor)?.to_string();

        let mut chain = Chain::default();
        let state = self.settle(&mut cursor, name, &mut chain)?;
        Ok(chain.finish(Some(from), state))
    }

    /// Applies an external event. The current state's action receives
    /// `param`; automatic links after it receive their own `action_arg`.
    pub fn send_event(&self, event: &str, param: &str) -> Result<Dispatch, CoreError> {
        let mut cursor = self.cursor.lock();
        let current = self
            .definition
            .get_state(Self::require_ready(&cursor)?)?;

        // Automatic transitions are never externally triggerable
        let transition = Some(event)
            .filter(|e| !e.is_empty())
            .and_then(|e| self.definition.find_transition(&current.name, e))
            .ok_or_else(|| CoreError::TransitionNotFound {
                state: current.name.clone(),
                event: event.to_string(),
            })?;

        tracing::info!("Event '{}' in state '{}'", event, current.name);

        let mut chain = Chain::default();
        let next = self.run_action(current, transition, param, Some(event), &mut chain.ctx)?;
        let state = self.settle(&mut cursor, next, &mut chain)?;
        Ok(chain.finish(Some(current.name.clone()), state))
    }

    /// Returns the current state name.
    pub fn current_state(&self) -> Option<String> {
        self.cursor.lock().current.clone()
    }

    /// Returns true once `init` has completed.
    pub fn is_ready(&self) -> bool {
        self.cursor.lock().ready
    }

    /// Returns the current state name, read under the same lock that
    /// checks `init` has completed.
    pub fn ready_state(&self) -> Result<String, CoreError> {
        let cursor = self.cursor.lock();
        Self::require_ready(&cursor).map(str::to_string)
    }

    pub fn definition(&self) -> &MachineDefinition {
        &self.definition
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    fn require_ready(cursor: &Cursor) -> Result<&str, CoreError> {
        match (&cursor.current, cursor.ready) {
            (Some(current), true) => Ok(current),
            _ => Err(CoreError::NotInitialized),
        }
    }

    /// Enters `name`, then follows automatic transitions until a waiting
    /// state is reached. Returns the state the machine settled in.
    fn settle<'a>(
        &'a self,
        cursor: &mut Cursor,
        name: &str,
        chain: &mut Chain,
    ) -> Result<&'a StateSpec, CoreError> {
        let (mut state, mut next) = self.enter(cursor, name, chain)?;
        while let Some(transition) = next {
            let target =
                self.run_action(state, transition, &state.action_arg, None, &mut chain.ctx)?;
            (state, next) = self.enter(cursor, target, chain)?;
        }
        Ok(state)
    }

    /// Makes `name` the current state. Returns the state and, if it does not
    /// wait for an event, the automatic transition to take next.
    fn enter<'a>(
        &'a self,
        cursor: &mut Cursor,
        name: &str,
        chain: &mut Chain,
    ) -> Result<(&'a StateSpec, Option<&'a TransitionSpec>), CoreError> {
        let state = self.definition.get_state(name)?;
        cursor.current = Some(state.name.clone());
        chain.path.push(state.name.clone());
        tracing::debug!("Current state: {}", state.name);

        if state.wait_for_event {
            return Ok((state, None));
        }

        if !chain.visited.insert(state.name.clone()) {
            tracing::error!(
                "Transition cycle detected at '{}': {}",
                state.name,
                chain.path.join(" -> ")
            );
            return Err(CoreError::TransitionCycle {
                state: state.name.clone(),
                path: chain.path.clone(),
            });
        }

        let transition = self
            .definition
            .find_transition(&state.name, "")
            .ok_or_else(|| CoreError::TransitionNotFound {
                state: state.name.clone(),
                event: String::new(),
            })?;
        Ok((state, Some(transition)))
    }

    /// Runs the action of `state` and picks the destination of `transition`
    /// from its outcome.
    fn run_action<'a>(
        &self,
        state: &StateSpec,
        transition: &'a TransitionSpec,
        arg: &str,
        event: Option<&str>,
        ctx: &mut ActionContext,
    ) -> Result<&'a str, CoreError> {
        let handler = self.registry.lookup(&state.action).ok_or_else(|| {
            tracing::error!(
                "No handler registered for action '{}' (state '{}')",
                state.action,
                state.name
            );
            CoreError::HandlerNotRegistered {
                action: state.action.clone(),
                state: state.name.clone(),
            }
        })?;

        ctx.enter(&state.name, state.send_response, event);
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.call(arg, ctx)));
        let reason = match result {
            Ok(Ok(outcome)) => {
                let target = transition.destination(outcome);
                tracing::debug!(
                    "Action '{}' returned {} in '{}', next '{}'",
                    state.action,
                    outcome,
                    state.name,
                    target
                );
                return Ok(target);
            }
            Ok(Err(e)) => e.message,
            Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
        };

        tracing::error!(
            "Action '{}' failed in state '{}': {}",
            state.action,
            state.name,
            reason
        );
        Err(CoreError::ActionFailed {
            action: state.action.clone(),
            state: state.name.clone(),
            reason,
        })
    }
}

impl std::fmt::Debug for StateMachineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachineEngine")
            .field("initial", &self.definition.initial_state().name)
            .field("checksum", &self.definition.checksum)
            .field("registry", &self.registry)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
