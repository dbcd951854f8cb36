use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use patter_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use patter_core::catalog::{
    ActionCatalog, ACTION_OPEN_TICKET, INTENT_CANCEL, INTENT_HUMAN_HANDOFF,
};
use patter_core::config::DialogueConfig;
use patter_core::domain::action::{
    ActionOutcome, ActionRequest, ActionTemplate, IdempotencyKey, OutcomeKind, ParamMap,
    ParamValue, PendingAction,
};
use patter_core::domain::context::TurnContext;
use patter_core::domain::escalation::{EscalationSignal, EscalationState};
use patter_core::domain::response::{MessageUnit, ResponsePlan};
use patter_core::domain::session::{Identity, Session, SessionId};
use patter_core::domain::turn::{ClassifiedTurn, TurnRecord};
use patter_core::escalation::{EscalationPolicy, TurnSignals};
use patter_core::slots::{ContextDefaults, SlotFillingEngine, SlotResolution};
use patter_db::{RepositoryError, SessionRepository, StoredSession};

use crate::dispatcher::ActionDispatcher;
use crate::fallback::FallbackRouter;
use crate::gate::SessionGate;
use crate::templates::ResponseTemplates;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The session store could not be read or written; the turn fails
    /// whole and the caller serves a static degraded-mode reply.
    #[error("session storage unavailable: {0}")]
    StorageUnavailable(String),
    /// Unknown action template or similar wiring fault. Never user-caused.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<RepositoryError> for OrchestratorError {
    fn from(error: RepositoryError) -> Self {
        Self::StorageUnavailable(error.to_string())
    }
}

/// Turn-processing policy derived from the dialogue config section.
#[derive(Clone, Debug)]
pub struct TurnPolicy {
    pub confidence_floor: u8,
    pub new_intent_override: u8,
    pub session_ttl_secs: u64,
    pub recent_turns_window: u32,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            confidence_floor: 55,
            new_intent_override: 80,
            session_ttl_secs: 1800,
            recent_turns_window: 5,
        }
    }
}

impl From<&DialogueConfig> for TurnPolicy {
    fn from(config: &DialogueConfig) -> Self {
        Self {
            confidence_floor: config.confidence_floor,
            new_intent_override: config.new_intent_override,
            session_ttl_secs: config.session_ttl_secs,
            recent_turns_window: config.recent_turns_window,
        }
    }
}

/// Everything one turn mutates, kept together so the final persistence
/// write is all-or-nothing.
struct TurnState {
    session: Session,
    context: TurnContext,
    plan: ResponsePlan,
    signals: TurnSignals,
    correlation_id: String,
}

impl TurnState {
    fn say(&mut self, text: impl Into<String>) {
        self.plan.push(MessageUnit::Text { text: text.into() });
    }
}

/// Top-level coordinator: one classified turn in, one ResponsePlan out.
/// Sole writer of session state; collaborators only report outcomes back.
pub struct DialogueOrchestrator {
    store: Arc<dyn SessionRepository>,
    dispatcher: ActionDispatcher,
    fallback: FallbackRouter,
    catalog: ActionCatalog,
    slots: SlotFillingEngine,
    escalation: EscalationPolicy,
    templates: ResponseTemplates,
    audit: Arc<dyn AuditSink>,
    gate: SessionGate,
    policy: TurnPolicy,
}

impl DialogueOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionRepository>,
        dispatcher: ActionDispatcher,
        fallback: FallbackRouter,
        catalog: ActionCatalog,
        escalation: EscalationPolicy,
        templates: ResponseTemplates,
        audit: Arc<dyn AuditSink>,
        policy: TurnPolicy,
    ) -> Self {
        Self {
            store,
            dispatcher,
            fallback,
            catalog,
            slots: SlotFillingEngine::new(),
            escalation,
            templates,
            audit,
            gate: SessionGate::new(),
            policy,
        }
    }

    /// Process one turn. Turns for the same session apply strictly in
    /// arrival order; distinct sessions run concurrently.
    pub async fn process_turn(
        &self,
        session_id: &SessionId,
        turn: ClassifiedTurn,
    ) -> Result<ResponsePlan, OrchestratorError> {
        let _guard = self.gate.acquire(&session_id.0).await;

        let now = Utc::now();
        let correlation_id = Uuid::new_v4().to_string();
        let stored = self.load_or_create(session_id, now).await?;

        let mut state = TurnState {
            session: stored.session,
            context: stored.context,
            plan: ResponsePlan::default(),
            signals: TurnSignals { raw_text: turn.raw_text.clone(), ..TurnSignals::default() },
            correlation_id,
        };

        let seq = state.context.advance_turn();
        state.session.touch(now);

        self.audit.emit(
            AuditEvent::new(
                Some(state.session.id.clone()),
                state.correlation_id.clone(),
                "dialogue.turn_received",
                AuditCategory::Ingress,
                "orchestrator",
                AuditOutcome::Success,
            )
            .with_metadata("intent", turn.intent.clone())
            .with_metadata("confidence", turn.confidence.to_string()),
        );

        // Below the floor, the classifier's label is noise.
        let intent = if turn.confidence >= self.policy.confidence_floor {
            Some(turn.intent.as_str())
        } else {
            None
        };

        let effective_intent = intent.unwrap_or("unknown").to_string();
        self.route_turn(intent, &turn, &mut state).await?;
        self.evaluate_escalation(&mut state).await?;

        let record = TurnRecord {
            seq,
            raw_text: turn.raw_text.clone(),
            intent: effective_intent,
            reply_summary: state.plan.summary(),
            created_at: now,
        };

        self.store.persist_turn(&state.session, &state.context, &record).await.map_err(
            |error| {
                self.audit.emit(AuditEvent::new(
                    Some(state.session.id.clone()),
                    state.correlation_id.clone(),
                    "dialogue.turn_persist_failed",
                    AuditCategory::Persistence,
                    "orchestrator",
                    AuditOutcome::Failed,
                ));
                OrchestratorError::from(error)
            },
        )?;

        self.audit.emit(
            AuditEvent::new(
                Some(state.session.id.clone()),
                state.correlation_id.clone(),
                "dialogue.turn_processed",
                AuditCategory::Dialogue,
                "orchestrator",
                AuditOutcome::Success,
            )
            .with_metadata("turn_seq", seq.to_string()),
        );

        Ok(state.plan)
    }

    /// Idempotent session lifecycle entry: the identity's active session,
    /// or a fresh one.
    pub async fn create_or_get_session(
        &self,
        identity: Identity,
    ) -> Result<Session, OrchestratorError> {
        let _guard = self.gate.acquire(&identity.storage_key()).await;
        Ok(self.resume_identity(identity, Utc::now()).await?.session)
    }

    /// Fold a guest session into the customer's on login. Idempotent; the
    /// merge itself is a single atomic store operation.
    pub async fn merge_session(
        &self,
        visitor_token: &str,
        customer_id: &str,
    ) -> Result<Option<Session>, OrchestratorError> {
        let merged = self.store.merge_guest_into_customer(visitor_token, customer_id).await?;

        if let Some(ref stored) = merged {
            self.audit.emit(
                AuditEvent::new(
                    Some(stored.session.id.clone()),
                    Uuid::new_v4().to_string(),
                    "dialogue.session_merged",
                    AuditCategory::Dialogue,
                    "orchestrator",
                    AuditOutcome::Success,
                )
                .with_metadata("customer_id", customer_id),
            );
        }

        Ok(merged.map(|stored| stored.session))
    }

    /// TTL sweep; closed sessions become read-only history.
    pub async fn close_idle_sessions(&self) -> Result<u64, OrchestratorError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.policy.session_ttl_secs as i64);
        Ok(self.store.close_idle_before(cutoff).await?)
    }

    async fn load_or_create(
        &self,
        session_id: &SessionId,
        now: chrono::DateTime<Utc>,
    ) -> Result<StoredSession, OrchestratorError> {
        match self.store.find_by_id(session_id).await? {
            Some(stored)
                if stored.session.is_active()
                    && !stored.session.is_expired(self.policy.session_ttl_secs, now) =>
            {
                Ok(stored)
            }
            Some(stored) => {
                // Closed or idle-expired: that state is history now. The
                // identity continues in a fresh (or already-open) session.
                if stored.session.is_active() {
                    let mut closing = stored.session.clone();
                    closing.close();
                    self.store.save(&closing, &stored.context).await?;
                }
                self.resume_identity(stored.session.identity, now).await
            }
            None => {
                // Unseen opaque id: the transport minted it for a new
                // visitor; adopt it as the guest token.
                let identity = Identity::Guest { visitor_token: session_id.0.clone() };
                self.resume_identity(identity, now).await
            }
        }
    }

    async fn resume_identity(
        &self,
        identity: Identity,
        now: chrono::DateTime<Utc>,
    ) -> Result<StoredSession, OrchestratorError> {
        if let Some(stored) = self.store.find_active_by_identity(&identity).await? {
            if !stored.session.is_expired(self.policy.session_ttl_secs, now) {
                return Ok(stored);
            }
            let mut closing = stored.session.clone();
            closing.close();
            self.store.save(&closing, &stored.context).await?;
        }

        let session = Session::open(identity);
        let context = TurnContext::default();
        self.store.save(&session, &context).await?;
        Ok(StoredSession { session, context })
    }

    async fn route_turn(
        &self,
        intent: Option<&str>,
        turn: &ClassifiedTurn,
        state: &mut TurnState,
    ) -> Result<(), OrchestratorError> {
        if intent == Some(INTENT_HUMAN_HANDOFF) {
            state.signals.explicit_human_intent = true;
            state.say("Of course, let me bring in a human teammate.");
            return Ok(());
        }

        let pending = state.context.pending_action.clone();
        let new_action =
            intent.and_then(|name| self.catalog.resolve_intent(name)).cloned();

        if let Some(pending) = pending {
            if intent == Some(INTENT_CANCEL) {
                state.context.pending_action = None;
                state.context.note_intent_resolved();
                state.say("Okay, I've dropped that. What else can I do for you?");
                return Ok(());
            }

            // A different action at high confidence supersedes the
            // in-progress one; anything else is read as a slot answer.
            let override_template = new_action.as_ref().filter(|template| {
                template.name != pending.action_name
                    && turn.confidence >= self.policy.new_intent_override
            });

            if let Some(template) = override_template.cloned() {
                tracing::info!(
                    event_name = "dialogue.pending_action_superseded",
                    superseded = %pending.action_name,
                    by = %template.name,
                    confidence = turn.confidence,
                    "abandoning pending action for a high-confidence intent"
                );
                state.context.pending_action = None;
                return self.advance_action(&template, None, turn, state).await;
            }

            let template = self.catalog.get(&pending.action_name).cloned().ok_or_else(|| {
                OrchestratorError::Configuration(format!(
                    "pending action references unknown template `{}`",
                    pending.action_name
                ))
            })?;
            return self.advance_action(&template, Some(pending), turn, state).await;
        }

        if let Some(template) = new_action {
            return self.advance_action(&template, None, turn, state).await;
        }

        if intent == Some(INTENT_CANCEL) {
            state.say("There's nothing in progress to cancel.");
            return Ok(());
        }

        self.run_fallback(turn, state).await;
        Ok(())
    }

    /// Merge this turn's entities into the action's collected parameters,
    /// then either ask for the first missing one or dispatch.
    async fn advance_action(
        &self,
        template: &ActionTemplate,
        pending: Option<PendingAction>,
        turn: &ClassifiedTurn,
        state: &mut TurnState,
    ) -> Result<(), OrchestratorError> {
        let mut collected = pending.map(|p| p.collected).unwrap_or_default();

        let coerced = self.slots.coerce_entities(template, &turn.entities);
        if !coerced.ignored.is_empty() {
            tracing::debug!(
                event_name = "dialogue.entities_ignored",
                action = %template.name,
                ignored = ?coerced.ignored,
                "dropping entities the template does not declare"
            );
        }
        collected.extend(coerced.accepted);

        if let Some(issue) = coerced.issues.first() {
            // Malformed value: keep what we have, re-prompt locally.
            let prompt = template
                .param(&issue.parameter)
                .map(|spec| spec.prompt.clone())
                .unwrap_or_else(|| format!("What should I use for {}?", issue.parameter));
            state.context.pending_action =
                Some(PendingAction { action_name: template.name.clone(), collected });
            state.say(format!("Sorry, {}.", issue.message));
            state.plan.push(MessageUnit::Prompt { parameter: issue.parameter.clone(), text: prompt });
            return Ok(());
        }

        let defaults = ContextDefaults {
            last_referenced_entity: state.context.last_referenced_entity.clone(),
            last_query: state.context.last_query.clone(),
        };

        match self.slots.resolve(template, &collected, &defaults) {
            SlotResolution::Complete { parameters } => {
                self.dispatch_action(template, parameters, state).await;
                Ok(())
            }
            SlotResolution::Incomplete { collected, missing } => match missing.first() {
                Some(first) => {
                    let prompt = template
                        .param(first)
                        .map(|spec| spec.prompt.clone())
                        .unwrap_or_else(|| format!("What should I use for {first}?"));

                    state.context.pending_action =
                        Some(PendingAction { action_name: template.name.clone(), collected });
                    state
                        .plan
                        .push(MessageUnit::Prompt { parameter: first.clone(), text: prompt });
                    Ok(())
                }
                None => {
                    self.dispatch_action(template, collected, state).await;
                    Ok(())
                }
            },
        }
    }

    async fn dispatch_action(
        &self,
        template: &ActionTemplate,
        parameters: ParamMap,
        state: &mut TurnState,
    ) {
        let request = ActionRequest {
            action_name: template.name.clone(),
            parameters: parameters.clone(),
            idempotency_key: IdempotencyKey::derive(
                &state.session.id,
                state.context.turn_seq,
                &template.name,
            ),
        };

        let outcome = self.dispatcher.dispatch(template, &request).await;

        self.audit.emit(
            AuditEvent::new(
                Some(state.session.id.clone()),
                state.correlation_id.clone(),
                "dialogue.action_dispatched",
                AuditCategory::Dispatch,
                "orchestrator",
                match outcome.kind() {
                    OutcomeKind::Failure => AuditOutcome::Failed,
                    _ => AuditOutcome::Success,
                },
            )
            .with_metadata("action", template.name.clone())
            .with_metadata("outcome_kind", outcome.kind().as_str()),
        );

        // Terminal either way: the action is done or abandoned.
        state.context.pending_action = None;

        match outcome {
            ActionOutcome::Success { payload } => {
                state.context.note_intent_resolved();
                self.remember_parameters(template, &parameters, state);
                let text = self.templates.render(
                    &template.name,
                    OutcomeKind::Success,
                    &parameters,
                    Some(&payload),
                );
                state.say(text);
                state.plan.push(MessageUnit::Data {
                    source_action: template.name.clone(),
                    payload,
                });
            }
            ActionOutcome::EmptyResult => {
                state.context.note_intent_resolved();
                self.remember_parameters(template, &parameters, state);
                let text =
                    self.templates.render(&template.name, OutcomeKind::Empty, &parameters, None);
                state.say(text);
            }
            ActionOutcome::RecoverableFailure { reason }
            | ActionOutcome::UnrecoverableFailure { reason } => {
                state.context.last_dispatch_failure = Some(reason);
                state.signals.unrecoverable_failure = true;
                let text =
                    self.templates.render(&template.name, OutcomeKind::Failure, &parameters, None);
                state.say(text);
            }
        }
    }

    fn remember_parameters(
        &self,
        template: &ActionTemplate,
        parameters: &ParamMap,
        state: &mut TurnState,
    ) {
        if let Some(ParamValue::Text(product_id)) = parameters.get("product_id") {
            state.context.remember_entity(product_id.clone());
        }
        if template.name == "product_search" {
            if let Some(query) = parameters.get("query") {
                state.context.remember_query(query.render());
            }
        }
    }

    async fn run_fallback(&self, turn: &ClassifiedTurn, state: &mut TurnState) {
        state.context.note_fallback();

        // History is context for the answering capability, not a
        // correctness dependency; degrade to an empty window on error.
        let recent = match self
            .store
            .recent_turns(&state.session.id, self.policy.recent_turns_window)
            .await
        {
            Ok(recent) => recent,
            Err(error) => {
                tracing::warn!(
                    event_name = "dialogue.recent_turns_unavailable",
                    error = %error,
                    "continuing fallback without conversation history"
                );
                Vec::new()
            }
        };

        let outcome = self
            .fallback
            .handle(state.context.fallback_budget_used, &turn.raw_text, &recent)
            .await;

        if outcome.consumed_budget {
            state.context.consume_fallback_budget();
        }
        state.signals.budget_exhausted = outcome.budget_exhausted;
        state.say(outcome.reply);
    }

    async fn evaluate_escalation(&self, state: &mut TurnState) -> Result<(), OrchestratorError> {
        let ticket_already_open = state.context.escalation_state == EscalationState::TicketOpen;

        if let Some(signal) = self.escalation.assess(&state.context, &state.signals) {
            state.context.escalation_state = EscalationState::Escalating;
            self.open_ticket(&signal, state).await?;
            return Ok(());
        }

        if ticket_already_open
            && (state.signals.explicit_human_intent || state.signals.budget_exhausted)
        {
            state.say("A support teammate already has this conversation and will be with you soon.");
        }

        Ok(())
    }

    /// Ticket creation is a dispatch like any other, so it inherits the
    /// retry and idempotency guarantees.
    async fn open_ticket(
        &self,
        signal: &EscalationSignal,
        state: &mut TurnState,
    ) -> Result<(), OrchestratorError> {
        let template = self.catalog.get(ACTION_OPEN_TICKET).cloned().ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "escalation requires the `{ACTION_OPEN_TICKET}` template"
            ))
        })?;

        let mut parameters = ParamMap::new();
        parameters.insert(
            "subject".to_string(),
            ParamValue::Text(format!("Shopper needs help ({})", signal.reason.as_str())),
        );
        parameters.insert(
            "message".to_string(),
            ParamValue::Text(signal.originating_turn_text.clone()),
        );
        parameters.insert(
            "severity".to_string(),
            ParamValue::Choice(signal.severity.as_str().to_string()),
        );

        let request = ActionRequest {
            action_name: template.name.clone(),
            parameters: parameters.clone(),
            idempotency_key: IdempotencyKey::derive(
                &state.session.id,
                state.context.turn_seq,
                &template.name,
            ),
        };

        let outcome = self.dispatcher.dispatch(&template, &request).await;

        self.audit.emit(
            AuditEvent::new(
                Some(state.session.id.clone()),
                state.correlation_id.clone(),
                "dialogue.escalation_ticket",
                AuditCategory::Escalation,
                "orchestrator",
                match outcome.kind() {
                    OutcomeKind::Success => AuditOutcome::Success,
                    _ => AuditOutcome::Failed,
                },
            )
            .with_metadata("reason", signal.reason.as_str())
            .with_metadata("severity", signal.severity.as_str()),
        );

        match outcome {
            ActionOutcome::Success { payload } => {
                let reference = payload
                    .get("ticket_reference")
                    .and_then(|value| value.as_str())
                    .unwrap_or("pending")
                    .to_string();

                let text = self.templates.render(
                    &template.name,
                    OutcomeKind::Success,
                    &parameters,
                    Some(&payload),
                );
                state.say(text);
                state
                    .plan
                    .push(MessageUnit::TicketConfirmation { ticket_reference: reference });

                state.context.consecutive_fallbacks = 0;
                state.context.escalation_state = EscalationState::TicketOpen;
            }
            _ => {
                // Stays Escalating; the next qualifying turn tries again.
                let text = self.templates.render(
                    &template.name,
                    OutcomeKind::Failure,
                    &parameters,
                    None,
                );
                state.say(text);
            }
        }

        Ok(())
    }
}
