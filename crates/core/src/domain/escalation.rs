use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    RepeatedFallback,
    ExplicitHumanRequest,
    NegativeSentimentKeyword,
    ActionFailureUnrecoverable,
}

impl EscalationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RepeatedFallback => "repeated_fallback",
            Self::ExplicitHumanRequest => "explicit_human_request",
            Self::NegativeSentimentKeyword => "negative_sentiment_keyword",
            Self::ActionFailureUnrecoverable => "action_failure_unrecoverable",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketSeverity {
    Low,
    Normal,
    High,
}

impl TicketSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// Severity is derived from the triggering reason: hard failures and
    /// negative sentiment outrank routine handoffs.
    pub fn for_reason(reason: EscalationReason) -> Self {
        match reason {
            EscalationReason::ActionFailureUnrecoverable
            | EscalationReason::NegativeSentimentKeyword => Self::High,
            EscalationReason::RepeatedFallback | EscalationReason::ExplicitHumanRequest => {
                Self::Normal
            }
        }
    }
}

/// Evidence that a turn should hand the conversation to a human. Consumed
/// once at ticket creation, never persisted past it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationSignal {
    pub reason: EscalationReason,
    pub severity: TicketSeverity,
    pub originating_turn_text: String,
}

impl EscalationSignal {
    pub fn new(reason: EscalationReason, originating_turn_text: impl Into<String>) -> Self {
        Self {
            reason,
            severity: TicketSeverity::for_reason(reason),
            originating_turn_text: originating_turn_text.into(),
        }
    }
}

/// Escalation progress for one session. `TicketOpen` suppresses duplicate
/// tickets until an intervening successful intent resets to `Normal`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationState {
    #[default]
    Normal,
    Escalating,
    TicketOpen,
}

impl EscalationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Escalating => "escalating",
            Self::TicketOpen => "ticket_open",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "escalating" => Some(Self::Escalating),
            "ticket_open" => Some(Self::TicketOpen),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EscalationReason, EscalationSignal, EscalationState, TicketSeverity};

    #[test]
    fn severity_mapping_follows_reason() {
        assert_eq!(
            TicketSeverity::for_reason(EscalationReason::ActionFailureUnrecoverable),
            TicketSeverity::High
        );
        assert_eq!(
            TicketSeverity::for_reason(EscalationReason::NegativeSentimentKeyword),
            TicketSeverity::High
        );
        assert_eq!(
            TicketSeverity::for_reason(EscalationReason::RepeatedFallback),
            TicketSeverity::Normal
        );
        assert_eq!(
            TicketSeverity::for_reason(EscalationReason::ExplicitHumanRequest),
            TicketSeverity::Normal
        );
    }

    #[test]
    fn signal_derives_severity_from_reason() {
        let signal = EscalationSignal::new(EscalationReason::NegativeSentimentKeyword, "awful");
        assert_eq!(signal.severity, TicketSeverity::High);
    }

    #[test]
    fn state_round_trips_from_storage_encoding() {
        for state in
            [EscalationState::Normal, EscalationState::Escalating, EscalationState::TicketOpen]
        {
            assert_eq!(EscalationState::parse(state.as_str()), Some(state));
        }
    }
}
