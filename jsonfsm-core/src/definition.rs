//! State machine definition types.
//!
//! Machine definitions use a JSON DSL (YAML is accepted too):
//!
//! ```json
//! {
//!   "initialState": "DISARMED",
//!   "expectedCode": "123",
//!   "states": [
//!     {"name": "DISARMED", "action": "Log", "waitForEvent": true, "sendResponse": true},
//!     {"name": "ENTER_CODE", "action": "ValidateCode", "waitForEvent": true},
//!     {"name": "SEND_OK_RESPONSE", "action": "SendResponse", "action_arg": "OK"},
//!     {"name": "ARMED", "action": "Log", "waitForEvent": true}
//!   ],
//!   "transitions": [
//!     {"from": "DISARMED", "toSuccess": "ENTER_CODE", "event": "ARM"},
//!     {"from": "ENTER_CODE", "toSuccess": "SEND_OK_RESPONSE", "toFailure": "DISARMED",
//!      "branch": true, "event": "USER_CODE"},
//!     {"from": "SEND_OK_RESPONSE", "toSuccess": "ARMED"}
//!   ],
//!   "events": ["ARM", "USER_CODE"]
//! }
//! ```
//!
//! A transition without an `event` is automatic: it fires as soon as a state
//! that does not wait for an event is entered.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;

/// A state in the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSpec {
    /// Unique state name.
    pub name: String,

    /// Name of the action run when this state is left.
    pub action: String,

    /// Argument passed to the action when the state is left automatically.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_arg: String,

    /// Whether the state parks until an external event arrives.
    #[serde(rename = "waitForEvent", default)]
    pub wait_for_event: bool,

    /// Whether the state's action should answer the event submitter.
    #[serde(rename = "sendResponse", default)]
    pub send_response: bool,
}

/// A transition in the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionSpec {
    /// Source state.
    pub from: String,

    /// Target state when the action succeeds (or always, without branching).
    #[serde(rename = "toSuccess")]
    pub to_success: String,

    /// Target state when the action fails on a branching transition.
    #[serde(
        rename = "toFailure",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub to_failure: Option<String>,

    /// Whether the destination depends on the action outcome.
    #[serde(default)]
    pub branch: bool,

    /// Triggering event. Empty means automatic.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event: String,
}

impl TransitionSpec {
    /// Returns true if this transition fires without an event.
    pub fn is_automatic(&self) -> bool {
        self.event.is_empty()
    }

    /// Returns the failure target, treating an empty string as absent.
    pub fn failure_target(&self) -> Option<&str> {
        self.to_failure.as_deref().filter(|s| !s.is_empty())
    }

    /// Picks the destination for the given action outcome.
    pub fn destination(&self, outcome: bool) -> &str {
        match (self.branch, outcome, self.failure_target()) {
            (true, false, Some(failure)) => failure,
            _ => &self.to_success,
        }
    }
}

/// Raw machine definition as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDefinitionRaw {
    /// State entered by `init`.
    #[serde(rename = "initialState")]
    pub initial_state: String,

    /// Opaque value handed to handlers that need it.
    #[serde(rename = "expectedCode", default)]
    pub expected_code: String,

    /// All states, in declaration order.
    pub states: Vec<StateSpec>,

    /// All transitions, in declaration order.
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,

    /// Declared event vocabulary.
    #[serde(default)]
    pub events: Vec<String>,
}

/// A suspicious but legal construct found while validating a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionWarning {
    /// A transition can never match because an earlier one has the same
    /// source and event.
    ShadowedTransition {
        from: String,
        event: String,
        index: usize,
    },
    /// `toFailure` is set on a transition that does not branch.
    IgnoredFailureTarget { from: String, event: String },
    /// An automatic transition leaves a state that waits for events.
    AutomaticFromWaitingState { from: String },
    /// A transition uses an event missing from the declared vocabulary.
    UndeclaredEvent { event: String },
    /// No path leads from the initial state to this state.
    UnreachableState { state: String },
}

impl fmt::Display for DefinitionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionWarning::ShadowedTransition { from, event, index } => write!(
                f,
                "transition #{} from '{}' on '{}' is shadowed by an earlier one",
                index, from, event
            ),
            DefinitionWarning::IgnoredFailureTarget { from, event } => write!(
                f,
                "transition from '{}' on '{}' sets toFailure without branch",
                from, event
            ),
            DefinitionWarning::AutomaticFromWaitingState { from } => write!(
                f,
                "automatic transition from waiting state '{}' never fires",
                from
            ),
            DefinitionWarning::UndeclaredEvent { event } => {
                write!(f, "event '{}' is not in the events list", event)
            }
            DefinitionWarning::UnreachableState { state } => {
                write!(f, "state '{}' is unreachable from the initial state", state)
            }
        }
    }
}

/// Validated and indexed machine definition (the state and transition catalog).
#[derive(Debug, Clone)]
pub struct MachineDefinition {
    /// Original raw definition.
    raw: MachineDefinitionRaw,

    /// State name -> position in `raw.states`.
    state_index: HashMap<String, usize>,

    /// Position of the initial state.
    initial: usize,

    /// Non-fatal findings from validation.
    warnings: Vec<DefinitionWarning>,

    /// Hash of the definition for identification in logs and responses.
    pub checksum: String,
}

impl MachineDefinition {
    /// Loads a definition from a file. `.yaml`/`.yml` files are parsed as
    /// YAML, everything else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
    }

    /// Parses and validates a definition from JSON text.
    pub fn from_json_str(s: &str) -> Result<Self, CoreError> {
        let raw: MachineDefinitionRaw = serde_json::from_str(s)?;
        Self::from_raw(raw)
    }

    /// Parses and validates a definition from YAML text.
    pub fn from_yaml_str(s: &str) -> Result<Self, CoreError> {
        let raw: MachineDefinitionRaw = serde_yaml::from_str(s)?;
        Self::from_raw(raw)
    }

    /// Parses and validates a definition from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        let raw: MachineDefinitionRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(raw)
    }

    /// Validates a raw definition and builds the lookup index.
    pub fn from_raw(raw: MachineDefinitionRaw) -> Result<Self, CoreError> {
        if raw.states.is_empty() {
            return Err(CoreError::invalid("no states defined"));
        }

        // Build state index
        let mut state_index = HashMap::with_capacity(raw.states.len());
        for (i, state) in raw.states.iter().enumerate() {
            if state.name.is_empty() {
                return Err(CoreError::invalid(format!("state #{} has an empty name", i)));
            }
            if state.action.is_empty() {
                return Err(CoreError::invalid(format!(
                    "state '{}' has no action",
                    state.name
                )));
            }
            if state_index.insert(state.name.clone(), i).is_some() {
                return Err(CoreError::invalid(format!(
                    "duplicate state '{}'",
                    state.name
                )));
            }
        }

        let initial = *state_index.get(&raw.initial_state).ok_or_else(|| {
            CoreError::invalid(format!(
                "initial state '{}' not in states list",
                raw.initial_state
            ))
        })?;

        // Validate transitions
        let mut warnings = Vec::new();
        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        let declared: HashSet<&str> = raw.events.iter().map(String::as_str).collect();

        for (i, t) in raw.transitions.iter().enumerate() {
            let from = state_index.get(&t.from).map(|&idx| &raw.states[idx]);
            let from = from.ok_or_else(|| {
                CoreError::invalid(format!(
                    "transition source '{}' not in states list",
                    t.from
                ))
            })?;

            if !state_index.contains_key(&t.to_success) {
                return Err(CoreError::invalid(format!(
                    "transition target '{}' not in states list",
                    t.to_success
                )));
            }

            match (t.branch, t.failure_target()) {
                (true, None) => {
                    return Err(CoreError::invalid(format!(
                        "branching transition from '{}' has no toFailure",
                        t.from
                    )));
                }
                (_, Some(failure)) if !state_index.contains_key(failure) => {
                    return Err(CoreError::invalid(format!(
                        "transition target '{}' not in states list",
                        failure
                    )));
                }
                (false, Some(_)) => warnings.push(DefinitionWarning::IgnoredFailureTarget {
                    from: t.from.clone(),
                    event: t.event.clone(),
                }),
                _ => {}
            }

            if !seen.insert((t.from.as_str(), t.event.as_str())) {
                warnings.push(DefinitionWarning::ShadowedTransition {
                    from: t.from.clone(),
                    event: t.event.clone(),
                    index: i,
                });
            }

            if t.is_automatic() {
                if from.wait_for_event {
                    warnings.push(DefinitionWarning::AutomaticFromWaitingState {
                        from: t.from.clone(),
                    });
                }
            } else if !declared.is_empty() && !declared.contains(t.event.as_str()) {
                warnings.push(DefinitionWarning::UndeclaredEvent {
                    event: t.event.clone(),
                });
            }
        }

        // Non-waiting states need exactly one way out
        for state in raw.states.iter().filter(|s| !s.wait_for_event) {
            let automatic = raw
                .transitions
                .iter()
                .filter(|t| t.from == state.name && t.is_automatic())
                .count();
            match automatic {
                1 => {}
                0 => {
                    return Err(CoreError::invalid(format!(
                        "state '{}' does not wait for an event but has no automatic transition",
                        state.name
                    )));
                }
                n => {
                    return Err(CoreError::invalid(format!(
                        "state '{}' has {} automatic transitions (at most one allowed)",
                        state.name, n
                    )));
                }
            }
        }

        // Reachability from the initial state
        let mut reached = vec![false; raw.states.len()];
        let mut queue = VecDeque::from([initial]);
        reached[initial] = true;
        while let Some(idx) = queue.pop_front() {
            let src = &raw.states[idx];
            // Only transitions that can fire from this state count
            let eligible = raw
                .transitions
                .iter()
                .filter(|t| t.from == src.name && t.is_automatic() != src.wait_for_event);
            for t in eligible {
                let failure = t.failure_target().filter(|_| t.branch);
                let targets = std::iter::once(t.to_success.as_str()).chain(failure);
                for target in targets {
                    let next = state_index[target];
                    if !reached[next] {
                        reached[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        for (state, _) in raw.states.iter().zip(&reached).filter(|(_, r)| !**r) {
            warnings.push(DefinitionWarning::UnreachableState {
                state: state.name.clone(),
            });
        }

        for warning in &warnings {
            tracing::warn!("Machine definition: {}", warning);
        }

        // Compute checksum
        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            raw,
            state_index,
            initial,
            warnings,
            checksum,
        })
    }

    /// Looks up a state by name.
    pub fn get_state(&self, name: &str) -> Result<&StateSpec, CoreError> {
        self.state_index
            .get(name)
            .map(|&idx| &self.raw.states[idx])
            .ok_or_else(|| CoreError::StateNotFound {
                state: name.to_string(),
            })
    }

    /// Finds the first transition leaving `from` on `event`, in declaration
    /// order. An empty `event` only matches automatic transitions.
    pub fn find_transition(&self, from: &str, event: &str) -> Option<&TransitionSpec> {
        self.raw
            .transitions
            .iter()
            .find(|t| t.from == from && t.event == event)
    }

    /// Returns the distinct events accepted in the given state, in
    /// declaration order.
    pub fn events_from(&self, state: &str) -> Vec<&str> {
        let mut events: Vec<&str> = Vec::new();
        for t in &self.raw.transitions {
            if t.from == state && !t.is_automatic() && !events.contains(&t.event.as_str()) {
                events.push(&t.event);
            }
        }
        events
    }

    /// Returns true if the given state exists.
    pub fn has_state(&self, name: &str) -> bool {
        self.state_index.contains_key(name)
    }

    pub fn initial_state(&self) -> &StateSpec {
        &self.raw.states[self.initial]
    }

    pub fn expected_code(&self) -> &str {
        &self.raw.expected_code
    }

    pub fn states(&self) -> &[StateSpec] {
        &self.raw.states
    }

    pub fn transitions(&self) -> &[TransitionSpec] {
        &self.raw.transitions
    }

    /// Returns the declared event vocabulary.
    pub fn events(&self) -> &[String] {
        &self.raw.events
    }

    /// Returns non-fatal findings from validation.
    pub fn warnings(&self) -> &[DefinitionWarning] {
        &self.warnings
    }

    /// Returns the raw definition.
    pub fn raw(&self) -> &MachineDefinitionRaw {
        &self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_definition() -> serde_json::Value {
        serde_json::json!({
            "initialState": "DISARMED",
            "expectedCode": "123",
            "states": [
                {"name": "DISARMED", "action": "Log", "waitForEvent": true, "sendResponse": true},
                {"name": "ENTER_CODE", "action": "ValidateCode", "waitForEvent": true},
                {"name": "SEND_OK_RESPONSE", "action": "SendResponse", "action_arg": "OK"},
                {"name": "SEND_ERROR_RESPONSE", "action": "SendResponse", "action_arg": "ERROR"},
                {"name": "ARMED", "action": "Log", "waitForEvent": true}
            ],
            "transitions": [
                {"from": "DISARMED", "toSuccess": "ENTER_CODE", "event": "ARM"},
                {"from": "ENTER_CODE", "toSuccess": "SEND_OK_RESPONSE",
                 "toFailure": "SEND_ERROR_RESPONSE", "branch": true, "event": "USER_CODE"},
                {"from": "SEND_OK_RESPONSE", "toSuccess": "ARMED"},
                {"from": "SEND_ERROR_RESPONSE", "toSuccess": "ENTER_CODE"}
            ],
            "events": ["ARM", "USER_CODE"]
        })
    }

    fn with_transitions(transitions: serde_json::Value) -> serde_json::Value {
        let mut def = sample_definition();
        def["transitions"] = transitions;
        def
    }

    #[test]
    fn test_parse_definition() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();

        assert_eq!(def.initial_state().name, "DISARMED");
        assert_eq!(def.expected_code(), "123");
        assert_eq!(def.states().len(), 5);
        assert_eq!(def.transitions().len(), 4);
        assert_eq!(def.checksum.len(), 8);
        assert!(def.warnings().is_empty());

        let ok = def.get_state("SEND_OK_RESPONSE").unwrap();
        assert_eq!(ok.action_arg, "OK");
        assert!(!ok.wait_for_event);
        assert!(!ok.send_response);
    }

    #[test]
    fn test_state_lookup() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();

        assert!(def.has_state("ARMED"));
        assert!(matches!(
            def.get_state("MISSING"),
            Err(CoreError::StateNotFound { .. })
        ));
    }

    #[test]
    fn test_transition_lookup() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();

        let t = def.find_transition("DISARMED", "ARM").unwrap();
        assert_eq!(t.to_success, "ENTER_CODE");
        assert!(!t.is_automatic());

        // Automatic lookup only matches transitions without an event
        let t = def.find_transition("SEND_OK_RESPONSE", "").unwrap();
        assert_eq!(t.to_success, "ARMED");
        assert!(def.find_transition("DISARMED", "").is_none());

        // Wrong event for state
        assert!(def.find_transition("DISARMED", "USER_CODE").is_none());
    }

    #[test]
    fn test_destination() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();

        let branching = def.find_transition("ENTER_CODE", "USER_CODE").unwrap();
        assert_eq!(branching.destination(true), "SEND_OK_RESPONSE");
        assert_eq!(branching.destination(false), "SEND_ERROR_RESPONSE");

        let plain = def.find_transition("DISARMED", "ARM").unwrap();
        assert_eq!(plain.destination(true), "ENTER_CODE");
        assert_eq!(plain.destination(false), "ENTER_CODE");
    }

    #[test]
    fn test_first_match_wins() {
        let json = with_transitions(serde_json::json!([
            {"from": "DISARMED", "toSuccess": "ENTER_CODE", "event": "ARM"},
            {"from": "DISARMED", "toSuccess": "ARMED", "event": "ARM"},
            {"from": "ENTER_CODE", "toSuccess": "SEND_OK_RESPONSE",
             "toFailure": "SEND_ERROR_RESPONSE", "branch": true, "event": "USER_CODE"},
            {"from": "SEND_OK_RESPONSE", "toSuccess": "ARMED"},
            {"from": "SEND_ERROR_RESPONSE", "toSuccess": "ENTER_CODE"}
        ]));
        let def = MachineDefinition::from_json(&json).unwrap();

        let t = def.find_transition("DISARMED", "ARM").unwrap();
        assert_eq!(t.to_success, "ENTER_CODE");
        assert_eq!(
            def.warnings(),
            &[DefinitionWarning::ShadowedTransition {
                from: "DISARMED".into(),
                event: "ARM".into(),
                index: 1,
            }]
        );
    }

    #[test]
    fn test_events_from() {
        let def = MachineDefinition::from_json(&sample_definition()).unwrap();

        assert_eq!(def.events_from("DISARMED"), vec!["ARM"]);
        assert_eq!(def.events_from("ENTER_CODE"), vec!["USER_CODE"]);
        assert!(def.events_from("SEND_OK_RESPONSE").is_empty());
    }

    #[test]
    fn test_invalid_initial_state() {
        let mut json = sample_definition();
        json["initialState"] = "NOWHERE".into();

        let result = MachineDefinition::from_json(&json);
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_duplicate_state() {
        let mut json = sample_definition();
        json["states"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({"name": "ARMED", "action": "Log", "waitForEvent": true}));

        let err = MachineDefinition::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("duplicate state 'ARMED'"));
    }

    #[test]
    fn test_empty_state_name() {
        let mut json = sample_definition();
        json["states"][0]["name"] = "".into();

        let result = MachineDefinition::from_json(&json);
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_invalid_transition_target() {
        let json = with_transitions(serde_json::json!([
            {"from": "DISARMED", "toSuccess": "NOWHERE", "event": "ARM"}
        ]));

        let err = MachineDefinition::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("'NOWHERE' not in states list"));
    }

    #[test]
    fn test_invalid_failure_target() {
        let json = with_transitions(serde_json::json!([
            {"from": "ENTER_CODE", "toSuccess": "ARMED", "toFailure": "NOWHERE",
             "branch": true, "event": "USER_CODE"}
        ]));

        let err = MachineDefinition::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("'NOWHERE' not in states list"));
    }

    #[test]
    fn test_invalid_transition_source() {
        let json = with_transitions(serde_json::json!([
            {"from": "NOWHERE", "toSuccess": "ARMED", "event": "ARM"}
        ]));

        let err = MachineDefinition::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("source 'NOWHERE'"));
    }

    #[test]
    fn test_branch_requires_failure_target() {
        let json = with_transitions(serde_json::json!([
            {"from": "DISARMED", "toSuccess": "ENTER_CODE", "event": "ARM"},
            {"from": "ENTER_CODE", "toSuccess": "SEND_OK_RESPONSE", "toFailure": "",
             "branch": true, "event": "USER_CODE"},
            {"from": "SEND_OK_RESPONSE", "toSuccess": "ARMED"},
            {"from": "SEND_ERROR_RESPONSE", "toSuccess": "ENTER_CODE"}
        ]));

        let err = MachineDefinition::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("has no toFailure"));
    }

    #[test]
    fn test_non_waiting_state_needs_automatic_transition() {
        let json = with_transitions(serde_json::json!([
            {"from": "DISARMED", "toSuccess": "ENTER_CODE", "event": "ARM"},
            {"from": "SEND_OK_RESPONSE", "toSuccess": "ARMED"}
        ]));

        let err = MachineDefinition::from_json(&json).unwrap_err();
        assert!(err
            .to_string()
            .contains("'SEND_ERROR_RESPONSE' does not wait for an event"));
    }

    #[test]
    fn test_non_waiting_state_rejects_ambiguous_automatic_transitions() {
        let json = with_transitions(serde_json::json!([
            {"from": "SEND_OK_RESPONSE", "toSuccess": "ARMED"},
            {"from": "SEND_OK_RESPONSE", "toSuccess": "DISARMED"},
            {"from": "SEND_ERROR_RESPONSE", "toSuccess": "ENTER_CODE"}
        ]));

        let err = MachineDefinition::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("2 automatic transitions"));
    }

    #[test]
    fn test_warnings() {
        let json = serde_json::json!({
            "initialState": "A",
            "states": [
                {"name": "A", "action": "Log", "waitForEvent": true},
                {"name": "B", "action": "Log", "waitForEvent": true},
                {"name": "ORPHAN", "action": "Log", "waitForEvent": true}
            ],
            "transitions": [
                {"from": "A", "toSuccess": "B", "toFailure": "A", "event": "GO"},
                {"from": "B", "toSuccess": "A", "event": "BACK"},
                {"from": "B", "toSuccess": "A"}
            ],
            "events": ["GO"]
        });
        let def = MachineDefinition::from_json(&json).unwrap();

        let warnings = def.warnings();
        assert!(warnings.contains(&DefinitionWarning::IgnoredFailureTarget {
            from: "A".into(),
            event: "GO".into(),
        }));
        assert!(warnings.contains(&DefinitionWarning::UndeclaredEvent {
            event: "BACK".into(),
        }));
        assert!(warnings.contains(&DefinitionWarning::AutomaticFromWaitingState {
            from: "B".into(),
        }));
        assert!(warnings.contains(&DefinitionWarning::UnreachableState {
            state: "ORPHAN".into(),
        }));
        assert_eq!(warnings.len(), 4);
    }

    #[test]
    fn test_reachability_ignores_transitions_that_never_fire() {
        let json = serde_json::json!({
            "initialState": "A",
            "states": [
                {"name": "A", "action": "Log", "waitForEvent": true},
                {"name": "PASS", "action": "Log"},
                {"name": "GHOST", "action": "Log", "waitForEvent": true},
                {"name": "NEVER", "action": "Log", "waitForEvent": true}
            ],
            "transitions": [
                {"from": "A", "toSuccess": "PASS", "event": "GO"},
                {"from": "A", "toSuccess": "GHOST"},
                {"from": "PASS", "toSuccess": "A"},
                {"from": "PASS", "toSuccess": "NEVER", "event": "SKIP"}
            ]
        });
        let def = MachineDefinition::from_json(&json).unwrap();

        let warnings = def.warnings();
        assert!(warnings.contains(&DefinitionWarning::AutomaticFromWaitingState {
            from: "A".into(),
        }));
        assert!(warnings.contains(&DefinitionWarning::UnreachableState {
            state: "GHOST".into(),
        }));
        assert!(warnings.contains(&DefinitionWarning::UnreachableState {
            state: "NEVER".into(),
        }));
        assert!(!warnings.contains(&DefinitionWarning::UnreachableState {
            state: "PASS".into(),
        }));
    }

    #[test]
    fn test_defaults() {
        let def = MachineDefinition::from_json_str(
            r#"{
                "initialState": "IDLE",
                "states": [{"name": "IDLE", "action": "Log", "waitForEvent": true}]
            }"#,
        )
        .unwrap();

        assert_eq!(def.expected_code(), "");
        assert!(def.transitions().is_empty());
        assert!(def.events().is_empty());
        assert_eq!(def.initial_state().action_arg, "");
    }

    #[test]
    fn test_malformed_json() {
        let result = MachineDefinition::from_json_str("{\"initialState\": ");
        assert!(matches!(result, Err(CoreError::Json(_))));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
initialState: IDLE
expectedCode: "42"
states:
  - name: IDLE
    action: Log
    waitForEvent: true
  - name: WORKING
    action: Log
    action_arg: done
transitions:
  - from: IDLE
    toSuccess: WORKING
    event: START
  - from: WORKING
    toSuccess: IDLE
events: [START]
"#;
        let def = MachineDefinition::from_yaml_str(yaml).unwrap();
        assert_eq!(def.expected_code(), "42");
        assert_eq!(def.get_state("WORKING").unwrap().action_arg, "done");
        assert!(def.find_transition("WORKING", "").is_some());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();

        let json_path = dir.path().join("alarm.json");
        let mut file = std::fs::File::create(&json_path).unwrap();
        file.write_all(sample_definition().to_string().as_bytes())
            .unwrap();
        let def = MachineDefinition::from_file(&json_path).unwrap();
        assert_eq!(def.initial_state().name, "DISARMED");

        let yaml_path = dir.path().join("alarm.yaml");
        let yaml = serde_yaml::to_string(def.raw()).unwrap();
        std::fs::write(&yaml_path, yaml).unwrap();
        let from_yaml = MachineDefinition::from_file(&yaml_path).unwrap();
        assert_eq!(from_yaml.checksum, def.checksum);

        let missing = MachineDefinition::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(CoreError::Io { .. })));
    }

    #[test]
    fn test_bundled_machines_agree() {
        let json = MachineDefinition::from_json_str(include_str!("../../machines/alarm.json"))
            .unwrap();
        let yaml = MachineDefinition::from_yaml_str(include_str!("../../machines/alarm.yaml"))
            .unwrap();
        assert!(json.warnings().is_empty());
        assert!(yaml.warnings().is_empty());
        assert_eq!(json.checksum, yaml.checksum);
    }
}
