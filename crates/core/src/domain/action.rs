use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::session::SessionId;

/// Declared shape of one action parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamKind {
    Text,
    Choice { options: Vec<String> },
    Number,
}

/// Which piece of short-term conversation memory may satisfy a parameter
/// when the user did not supply it explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextFill {
    LastReferencedEntity,
    LastQuery,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    /// None means the parameter must be supplied by the user; the engine
    /// never invents a value for it.
    pub context_fill: Option<ContextFill>,
    /// Follow-up question asked when this parameter is the first missing one.
    pub prompt: String,
}

impl ParamSpec {
    pub fn required_text(name: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Text,
            required: true,
            context_fill: None,
            prompt: prompt.to_string(),
        }
    }

    pub fn required_choice(name: &str, options: &[&str], prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Choice { options: options.iter().map(|o| o.to_string()).collect() },
            required: true,
            context_fill: None,
            prompt: prompt.to_string(),
        }
    }

    pub fn optional_number(name: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Number,
            required: false,
            context_fill: None,
            prompt: prompt.to_string(),
        }
    }

    pub fn with_context_fill(mut self, fill: ContextFill) -> Self {
        self.context_fill = Some(fill);
        self
    }
}

/// Which external collaborator executes an action. Exactly one binding per
/// template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorBinding {
    Commerce,
    Ticketing,
}

/// A named action the dialogue can execute once its parameters are filled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionTemplate {
    pub name: String,
    pub binding: CollaboratorBinding,
    /// Mutating actions must not be retried against a collaborator that
    /// cannot deduplicate on the idempotency key.
    pub mutating: bool,
    pub params: Vec<ParamSpec>,
}

impl ActionTemplate {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|spec| spec.name == name)
    }

    pub fn required_param_names(&self) -> Vec<&str> {
        self.params.iter().filter(|spec| spec.required).map(|spec| spec.name.as_str()).collect()
    }
}

/// Typed parameter value, validated against the template's declared kind
/// before it ever reaches a collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Text(String),
    Choice(String),
    Number(i64),
}

impl ParamValue {
    pub fn render(&self) -> String {
        match self {
            Self::Text(value) | Self::Choice(value) => value.clone(),
            Self::Number(value) => value.to_string(),
        }
    }
}

pub type ParamMap = BTreeMap<String, ParamValue>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    /// Stable per (session, turn, action): a retried dispatch carries the same
    /// key, a later turn for the same action gets a fresh one.
    pub fn derive(session_id: &SessionId, turn_seq: u64, action_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(session_id.0.as_bytes());
        hasher.update(turn_seq.to_be_bytes());
        hasher.update(action_name.as_bytes());
        Self(encode_hex(hasher.finalize().as_slice()))
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

/// A fully parameterized action ready for dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_name: String,
    pub parameters: ParamMap,
    pub idempotency_key: IdempotencyKey,
}

/// An action started but still collecting required parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_name: String,
    pub collected: ParamMap,
}

impl PendingAction {
    pub fn start(action_name: impl Into<String>) -> Self {
        Self { action_name: action_name.into(), collected: ParamMap::new() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Empty,
    Failure,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Empty => "empty",
            Self::Failure => "failure",
        }
    }
}

/// Terminal result of one dispatch, after retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Success { payload: serde_json::Value },
    EmptyResult,
    RecoverableFailure { reason: String },
    UnrecoverableFailure { reason: String },
}

impl ActionOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success { .. } => OutcomeKind::Success,
            Self::EmptyResult => OutcomeKind::Empty,
            Self::RecoverableFailure { .. } | Self::UnrecoverableFailure { .. } => {
                OutcomeKind::Failure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::session::SessionId;

    use super::{ActionOutcome, IdempotencyKey, OutcomeKind, ParamSpec, ParamValue};

    #[test]
    fn idempotency_key_is_stable_for_same_inputs() {
        let session = SessionId("s-1".to_string());
        let first = IdempotencyKey::derive(&session, 4, "add_to_cart");
        let second = IdempotencyKey::derive(&session, 4, "add_to_cart");
        assert_eq!(first, second);
    }

    #[test]
    fn idempotency_key_differs_across_turns_and_actions() {
        let session = SessionId("s-1".to_string());
        let base = IdempotencyKey::derive(&session, 4, "add_to_cart");
        assert_ne!(base, IdempotencyKey::derive(&session, 5, "add_to_cart"));
        assert_ne!(base, IdempotencyKey::derive(&session, 4, "cancel_order"));
        assert_ne!(base, IdempotencyKey::derive(&SessionId("s-2".to_string()), 4, "add_to_cart"));
    }

    #[test]
    fn outcome_kind_groups_failures_together() {
        let recoverable = ActionOutcome::RecoverableFailure { reason: "timeout".to_string() };
        let unrecoverable = ActionOutcome::UnrecoverableFailure { reason: "409".to_string() };
        assert_eq!(recoverable.kind(), OutcomeKind::Failure);
        assert_eq!(unrecoverable.kind(), OutcomeKind::Failure);
        assert_eq!(ActionOutcome::EmptyResult.kind(), OutcomeKind::Empty);
    }

    #[test]
    fn param_builders_set_declared_shape() {
        let spec = ParamSpec::required_choice("size", &["s", "m", "l"], "Which size?");
        assert!(spec.required);
        assert!(spec.context_fill.is_none());
        assert_eq!(ParamValue::Number(3).render(), "3");
    }
}
