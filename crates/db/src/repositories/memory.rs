use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use patter_core::domain::context::TurnContext;
use patter_core::domain::session::{Identity, Session, SessionId, SessionStatus};
use patter_core::domain::turn::TurnRecord;

use super::{RepositoryError, SessionRepository, StoredSession};

#[derive(Default)]
struct State {
    sessions: HashMap<String, StoredSession>,
    turns: HashMap<String, Vec<TurnRecord>>,
}

/// Test double with the same semantics as the SQL store, including the
/// atomic guest-to-customer merge.
#[derive(Default)]
pub struct InMemorySessionRepository {
    state: RwLock<State>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<StoredSession>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.sessions.get(&id.0).cloned())
    }

    async fn find_active_by_identity(
        &self,
        identity: &Identity,
    ) -> Result<Option<StoredSession>, RepositoryError> {
        let key = identity.storage_key();
        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .find(|stored| {
                stored.session.status == SessionStatus::Active
                    && stored.session.identity.storage_key() == key
            })
            .cloned())
    }

    async fn save(
        &self,
        session: &Session,
        context: &TurnContext,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.sessions.insert(
            session.id.0.clone(),
            StoredSession { session: session.clone(), context: context.clone() },
        );
        Ok(())
    }

    async fn persist_turn(
        &self,
        session: &Session,
        context: &TurnContext,
        record: &TurnRecord,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.sessions.insert(
            session.id.0.clone(),
            StoredSession { session: session.clone(), context: context.clone() },
        );
        state.turns.entry(session.id.0.clone()).or_default().push(record.clone());
        Ok(())
    }

    async fn recent_turns(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<TurnRecord>, RepositoryError> {
        let state = self.state.read().await;
        let turns = state.turns.get(&session_id.0).cloned().unwrap_or_default();
        let skip = turns.len().saturating_sub(limit as usize);
        Ok(turns.into_iter().skip(skip).collect())
    }

    async fn merge_guest_into_customer(
        &self,
        visitor_token: &str,
        customer_id: &str,
    ) -> Result<Option<StoredSession>, RepositoryError> {
        let guest_identity = Identity::Guest { visitor_token: visitor_token.to_string() };
        let customer_identity = Identity::Authenticated { customer_id: customer_id.to_string() };

        let mut state = self.state.write().await;

        let find_active = |state: &State, key: &str| {
            state
                .sessions
                .values()
                .find(|stored| {
                    stored.session.status == SessionStatus::Active
                        && stored.session.identity.storage_key() == key
                })
                .map(|stored| stored.session.id.0.clone())
        };

        let Some(guest_id) = find_active(&state, &guest_identity.storage_key()) else {
            return Ok(find_active(&state, &customer_identity.storage_key())
                .and_then(|id| state.sessions.get(&id).cloned()));
        };

        if let Some(customer_id_key) = find_active(&state, &customer_identity.storage_key()) {
            let Some(guest) = state.sessions.remove(&guest_id) else {
                return Ok(None);
            };
            let guest_turns = state.turns.remove(&guest_id).unwrap_or_default();

            let offset =
                state.turns.get(&customer_id_key).and_then(|t| t.last()).map(|t| t.seq).unwrap_or(0);

            let customer_turns = state.turns.entry(customer_id_key.clone()).or_default();
            for mut turn in guest_turns {
                turn.seq += offset;
                customer_turns.push(turn);
            }

            Ok(state.sessions.get_mut(&customer_id_key).map(|stored| {
                stored.context = guest.context;
                stored.context.turn_seq += offset;
                stored.session.last_activity_at =
                    stored.session.last_activity_at.max(guest.session.last_activity_at);
                stored.clone()
            }))
        } else {
            Ok(state.sessions.get_mut(&guest_id).map(|stored| {
                stored.session.identity = customer_identity;
                stored.clone()
            }))
        }
    }

    async fn close_idle_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut closed = 0;
        for stored in state.sessions.values_mut() {
            if stored.session.status == SessionStatus::Active
                && stored.session.last_activity_at < cutoff
            {
                stored.session.close();
                closed += 1;
            }
        }
        Ok(closed)
    }
}
