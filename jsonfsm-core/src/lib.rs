//! # jsonfsm-core
//!
//! State machine engine for jsonfsm.
//!
//! This crate provides:
//! - Machine definition parsing and validation
//! - Action handler registry and the builtin actions
//! - Event dispatch, automatic chaining and branching
//! - Serialized access to the current state

pub mod actions;
pub mod definition;
pub mod engine;
pub mod error;
pub mod registry;

pub use definition::{DefinitionWarning, MachineDefinition, StateSpec, TransitionSpec};
pub use engine::{Dispatch, StateMachineEngine};
pub use error::CoreError;
pub use registry::{ActionContext, ActionError, ActionHandler, ActionRegistry, Reply};
