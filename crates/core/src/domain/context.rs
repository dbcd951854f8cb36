use serde::{Deserialize, Serialize};

use crate::domain::action::PendingAction;
use crate::domain::escalation::EscalationState;

/// Per-session short-term memory, mutated only inside the orchestrator's
/// turn-processing path. Persisted alongside the session so a dialogue
/// resumes exactly where it left off.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnContext {
    pub pending_action: Option<PendingAction>,
    pub last_referenced_entity: Option<String>,
    pub last_query: Option<String>,
    /// Unknown-intent turns since the last successfully resolved intent.
    pub consecutive_fallbacks: u32,
    /// Lifetime count of general-answering invocations; never resets.
    pub fallback_budget_used: u32,
    /// Monotonic turn counter; drives idempotency keys.
    pub turn_seq: u64,
    pub escalation_state: EscalationState,
    /// Most recent terminal dispatch failure, kept as escalation evidence.
    pub last_dispatch_failure: Option<String>,
}

impl TurnContext {
    /// Called once at the start of each turn; returns the sequence number
    /// the current turn runs under.
    pub fn advance_turn(&mut self) -> u64 {
        self.turn_seq += 1;
        self.turn_seq
    }

    pub fn note_fallback(&mut self) {
        self.consecutive_fallbacks += 1;
    }

    /// A successfully resolved intent clears fallback pressure and reopens
    /// escalation for future signals.
    pub fn note_intent_resolved(&mut self) {
        self.consecutive_fallbacks = 0;
        self.escalation_state = EscalationState::Normal;
    }

    pub fn consume_fallback_budget(&mut self) {
        self.fallback_budget_used += 1;
    }

    pub fn remember_entity(&mut self, entity_id: impl Into<String>) {
        self.last_referenced_entity = Some(entity_id.into());
    }

    pub fn remember_query(&mut self, query: impl Into<String>) {
        self.last_query = Some(query.into());
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::escalation::EscalationState;

    use super::TurnContext;

    #[test]
    fn advance_turn_is_monotonic() {
        let mut ctx = TurnContext::default();
        assert_eq!(ctx.advance_turn(), 1);
        assert_eq!(ctx.advance_turn(), 2);
        assert_eq!(ctx.turn_seq, 2);
    }

    #[test]
    fn resolved_intent_resets_fallbacks_but_not_budget() {
        let mut ctx = TurnContext::default();
        ctx.note_fallback();
        ctx.note_fallback();
        ctx.consume_fallback_budget();
        ctx.escalation_state = EscalationState::TicketOpen;

        ctx.note_intent_resolved();

        assert_eq!(ctx.consecutive_fallbacks, 0);
        assert_eq!(ctx.escalation_state, EscalationState::Normal);
        assert_eq!(ctx.fallback_budget_used, 1);
    }
}
