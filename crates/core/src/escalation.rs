use crate::domain::context::TurnContext;
use crate::domain::escalation::{EscalationReason, EscalationSignal, EscalationState};

/// Signals gathered while processing one turn, before the escalation
/// decision.
#[derive(Clone, Debug, Default)]
pub struct TurnSignals {
    pub raw_text: String,
    /// The classifier produced the dedicated human-handoff intent.
    pub explicit_human_intent: bool,
    /// This turn's dispatch ended in a terminal failure.
    pub unrecoverable_failure: bool,
    /// The fallback budget ran out this turn; treated as an explicit
    /// human request so the user is not left in a dead end.
    pub budget_exhausted: bool,
}

/// Decides when a conversation moves from automated handling to a human
/// ticket. Pure over (TurnContext, TurnSignals); the orchestrator applies
/// the resulting state transitions.
#[derive(Clone, Debug)]
pub struct EscalationPolicy {
    pub fallback_threshold: u32,
    pub escalate_on_action_failure: bool,
    negative_keywords: Vec<String>,
    human_request_keywords: Vec<String>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            fallback_threshold: 2,
            escalate_on_action_failure: false,
            negative_keywords: [
                "terrible",
                "awful",
                "useless",
                "ridiculous",
                "worst",
                "furious",
                "unacceptable",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            human_request_keywords: [
                "human",
                "real person",
                "agent",
                "representative",
                "speak to someone",
                "talk to a person",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl EscalationPolicy {
    pub fn new(fallback_threshold: u32, escalate_on_action_failure: bool) -> Self {
        Self { fallback_threshold, escalate_on_action_failure, ..Self::default() }
    }

    /// Evaluate the updated context against this turn's signals. Returns the
    /// signal that should open a ticket, or None. While a ticket is already
    /// open no new signal fires; the next resolved intent resets the state.
    pub fn assess(&self, ctx: &TurnContext, signals: &TurnSignals) -> Option<EscalationSignal> {
        if ctx.escalation_state == EscalationState::TicketOpen {
            return None;
        }

        if self.escalate_on_action_failure && signals.unrecoverable_failure {
            return Some(EscalationSignal::new(
                EscalationReason::ActionFailureUnrecoverable,
                signals.raw_text.clone(),
            ));
        }

        if self.matches_any(&signals.raw_text, &self.negative_keywords) {
            return Some(EscalationSignal::new(
                EscalationReason::NegativeSentimentKeyword,
                signals.raw_text.clone(),
            ));
        }

        if signals.explicit_human_intent
            || signals.budget_exhausted
            || self.matches_any(&signals.raw_text, &self.human_request_keywords)
        {
            return Some(EscalationSignal::new(
                EscalationReason::ExplicitHumanRequest,
                signals.raw_text.clone(),
            ));
        }

        if ctx.consecutive_fallbacks >= self.fallback_threshold {
            return Some(EscalationSignal::new(
                EscalationReason::RepeatedFallback,
                signals.raw_text.clone(),
            ));
        }

        None
    }

    fn matches_any(&self, text: &str, keywords: &[String]) -> bool {
        let normalized = text.to_ascii_lowercase();
        keywords.iter().any(|keyword| normalized.contains(keyword.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::context::TurnContext;
    use crate::domain::escalation::{EscalationReason, EscalationState, TicketSeverity};

    use super::{EscalationPolicy, TurnSignals};

    fn signals(text: &str) -> TurnSignals {
        TurnSignals { raw_text: text.to_string(), ..TurnSignals::default() }
    }

    #[test]
    fn repeated_fallback_escalates_at_threshold() {
        let policy = EscalationPolicy::default();
        let mut ctx = TurnContext::default();
        ctx.consecutive_fallbacks = 1;
        assert!(policy.assess(&ctx, &signals("qwerty")).is_none());

        ctx.consecutive_fallbacks = 2;
        let signal = policy.assess(&ctx, &signals("qwerty")).expect("threshold hit");
        assert_eq!(signal.reason, EscalationReason::RepeatedFallback);
        assert_eq!(signal.severity, TicketSeverity::Normal);
    }

    #[test]
    fn explicit_human_request_escalates_regardless_of_count() {
        let policy = EscalationPolicy::default();
        let ctx = TurnContext::default();
        let signal =
            policy.assess(&ctx, &signals("let me talk to a real person")).expect("direct trigger");
        assert_eq!(signal.reason, EscalationReason::ExplicitHumanRequest);
    }

    #[test]
    fn negative_sentiment_outranks_human_request_wording() {
        let policy = EscalationPolicy::default();
        let ctx = TurnContext::default();
        let signal = policy
            .assess(&ctx, &signals("this is useless, get me a human"))
            .expect("direct trigger");
        assert_eq!(signal.reason, EscalationReason::NegativeSentimentKeyword);
        assert_eq!(signal.severity, TicketSeverity::High);
    }

    #[test]
    fn open_ticket_suppresses_further_signals() {
        let policy = EscalationPolicy::default();
        let mut ctx = TurnContext::default();
        ctx.escalation_state = EscalationState::TicketOpen;
        ctx.consecutive_fallbacks = 5;
        assert!(policy.assess(&ctx, &signals("I want a human now")).is_none());
    }

    #[test]
    fn action_failure_escalates_only_when_enabled() {
        let ctx = TurnContext::default();
        let mut turn = signals("order would not cancel");
        turn.unrecoverable_failure = true;

        assert!(EscalationPolicy::default().assess(&ctx, &turn).is_none());

        let eager = EscalationPolicy::new(2, true);
        let signal = eager.assess(&ctx, &turn).expect("failure trigger");
        assert_eq!(signal.reason, EscalationReason::ActionFailureUnrecoverable);
        assert_eq!(signal.severity, TicketSeverity::High);
    }

    #[test]
    fn exhausted_budget_counts_as_explicit_request() {
        let policy = EscalationPolicy::default();
        let ctx = TurnContext::default();
        let mut turn = signals("tell me about your warranty");
        turn.budget_exhausted = true;

        let signal = policy.assess(&ctx, &turn).expect("budget trigger");
        assert_eq!(signal.reason, EscalationReason::ExplicitHumanRequest);
    }
}
