use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use patter_core::domain::context::TurnContext;
use patter_core::domain::session::{Identity, Session, SessionId};
use patter_core::domain::turn::TurnRecord;

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Session plus its conversation memory, stored and loaded as one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredSession {
    pub session: Session,
    pub context: TurnContext,
}

/// Durable keyed storage for sessions. No business logic lives here; the
/// orchestrator is the single writer.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<StoredSession>, RepositoryError>;

    async fn find_active_by_identity(
        &self,
        identity: &Identity,
    ) -> Result<Option<StoredSession>, RepositoryError>;

    async fn save(&self, session: &Session, context: &TurnContext)
        -> Result<(), RepositoryError>;

    /// Persist the end-of-turn state and the turn record atomically; a
    /// failed write leaves no partial state behind.
    async fn persist_turn(
        &self,
        session: &Session,
        context: &TurnContext,
        record: &TurnRecord,
    ) -> Result<(), RepositoryError>;

    /// Most recent turns, oldest first.
    async fn recent_turns(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<TurnRecord>, RepositoryError>;

    /// Atomically fold an active guest session into the customer's. If the
    /// customer already has an active session, the guest's turns are
    /// re-parented onto it and the guest session disappears; otherwise the
    /// guest session is rewritten in place. Idempotent: with no active
    /// guest session left, returns the customer's active session.
    async fn merge_guest_into_customer(
        &self,
        visitor_token: &str,
        customer_id: &str,
    ) -> Result<Option<StoredSession>, RepositoryError>;

    /// Close sessions idle since before the cutoff; returns how many.
    async fn close_idle_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}
