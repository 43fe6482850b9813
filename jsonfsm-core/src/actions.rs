//! Builtin actions.
//!
//! | Action         | Outcome                      | Reply                                   |
//! |----------------|------------------------------|-----------------------------------------|
//! | `Log`          | always true                  | `Accepted("")` if the state sends one   |
//! | `ValidateCode` | argument == `expectedCode`   | none                                    |
//! | `SendResponse` | always true                  | `"OK"` accepts, anything else rejects   |

use crate::definition::MachineDefinition;
use crate::registry::{ActionContext, ActionError, ActionRegistry, Reply};
use serde_json::Value;

pub const LOG: &str = "Log";
pub const VALIDATE_CODE: &str = "ValidateCode";
pub const SEND_RESPONSE: &str = "SendResponse";

pub const CODE_OK: &str = "CODE OK";
pub const WRONG_CODE: &str = "WRONG CODE";

/// Logs the argument.
pub fn log(arg: &str, ctx: &mut ActionContext) -> Result<bool, ActionError> {
    if ctx.send_response() {
        ctx.reply(Reply::Accepted(Value::String(String::new())));
    }
    tracing::info!("[{}] {}", ctx.state(), arg);
    Ok(true)
}

/// Builds a handler that compares its argument with `expected`.
pub fn validate_code(
    expected: impl Into<String>,
) -> impl Fn(&str, &mut ActionContext) -> Result<bool, ActionError> + Send + Sync + 'static {
    let expected = expected.into();
    move |code, _ctx| Ok(code == expected)
}

/// Answers the submitter: `"OK"` is accepted, anything else rejected.
pub fn send_response(arg: &str, ctx: &mut ActionContext) -> Result<bool, ActionError> {
    if arg == "OK" {
        ctx.reply(Reply::Accepted(Value::String(CODE_OK.to_string())));
    } else {
        ctx.reply(Reply::Rejected(WRONG_CODE.to_string()));
    }
    Ok(true)
}

impl ActionRegistry {
    /// Creates a registry holding the builtin actions, configured from the
    /// given definition.
    pub fn with_builtins(definition: &MachineDefinition) -> Self {
        let mut registry = Self::new();
        registry.register(LOG, log);
        registry.register(VALIDATE_CODE, validate_code(definition.expected_code()));
        registry.register(SEND_RESPONSE, send_response);
        registry
    }
}
