//! Dialogue Runtime - turn orchestration for the shopping assistant
//!
//! This crate is the conversational "spine" of patter - it turns a stream
//! of classified utterances into a consistent, resumable dialogue:
//! - Slot filling across turns (`patter_core::slots` driven from here)
//! - Idempotent action dispatch with bounded retry (`dispatcher`)
//! - Escalation to a human ticket (`patter_core::escalation` wiring)
//! - Budgeted general-answering fallback (`fallback`)
//!
//! # Architecture
//!
//! One turn flows strictly one direction:
//! 1. **Ingress** - `DialogueOrchestrator::process_turn` receives a
//!    classified turn under the session's serialization gate
//! 2. **Resolution** - pending-action resumption, intent-to-template
//!    mapping, slot filling
//! 3. **Execution** - `ActionDispatcher` or `FallbackRouter`, the only
//!    suspension points besides store I/O
//! 4. **Persistence** - one atomic session/context/history write
//!
//! # Key Types
//!
//! - `DialogueOrchestrator` - single writer of session state
//! - `ActionDispatcher` - retry/idempotency policy around resource APIs
//! - `Classifier` / `ResourceApi` / `Answering` - collaborator seams
//!
//! # Safety Principle
//!
//! Collaborators never touch session state. They report outcomes back to
//! the orchestrator, which is the only component that mutates the store.

pub mod collaborators;
pub mod dispatcher;
pub mod fallback;
pub mod gate;
pub mod orchestrator;
pub mod templates;

pub use collaborators::{
    Answering, Classification, Classifier, CollaboratorError, ResourceApi, ResourceReply,
};
pub use dispatcher::{ActionDispatcher, DispatchPolicy};
pub use fallback::{FallbackOutcome, FallbackRouter};
pub use gate::SessionGate;
pub use orchestrator::{DialogueOrchestrator, OrchestratorError, TurnPolicy};
pub use templates::ResponseTemplates;
