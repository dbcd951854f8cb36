pub mod audit;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod escalation;
pub mod slots;

pub use catalog::{
    ActionCatalog, ACTION_OPEN_TICKET, INTENT_CANCEL, INTENT_HUMAN_HANDOFF, INTENT_INFORM,
};
pub use domain::action::{
    ActionOutcome, ActionRequest, ActionTemplate, CollaboratorBinding, ContextFill,
    IdempotencyKey, OutcomeKind, ParamKind, ParamMap, ParamSpec, ParamValue, PendingAction,
};
pub use domain::context::TurnContext;
pub use domain::escalation::{
    EscalationReason, EscalationSignal, EscalationState, TicketSeverity,
};
pub use domain::response::{MessageUnit, ResponsePlan};
pub use domain::session::{Identity, Session, SessionId, SessionStatus};
pub use domain::turn::{ClassifiedTurn, TurnRecord};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use escalation::{EscalationPolicy, TurnSignals};
pub use slots::{ContextDefaults, SlotFillingEngine, SlotIssue, SlotResolution};
