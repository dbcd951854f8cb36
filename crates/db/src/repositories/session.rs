use chrono::{DateTime, Utc};
use sqlx::Row;

use patter_core::domain::context::TurnContext;
use patter_core::domain::session::{Identity, Session, SessionId, SessionStatus};
use patter_core::domain::turn::TurnRecord;

use super::{RepositoryError, SessionRepository, StoredSession};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_stored(row: &sqlx::sqlite::SqliteRow) -> Result<StoredSession, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let identity_json: String =
        row.try_get("identity_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status_str: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let context_json: String =
        row.try_get("context_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let last_activity_at_str: String =
        row.try_get("last_activity_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let identity: Identity = serde_json::from_str(&identity_json)
        .map_err(|e| RepositoryError::Decode(format!("identity: {e}")))?;
    let context: TurnContext = serde_json::from_str(&context_json)
        .map_err(|e| RepositoryError::Decode(format!("turn context: {e}")))?;
    let status = SessionStatus::parse(&status_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session status `{status_str}`")))?;

    let created_at = parse_timestamp(&created_at_str);
    let last_activity_at = parse_timestamp(&last_activity_at_str);

    Ok(StoredSession {
        session: Session { id: SessionId(id), identity, status, created_at, last_activity_at },
        context,
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<TurnRecord, RepositoryError> {
    let seq: i64 = row.try_get("seq").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let raw_text: String =
        row.try_get("raw_text").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let intent: String =
        row.try_get("intent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let reply_summary: String =
        row.try_get("reply_summary").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(TurnRecord {
        seq: seq as u64,
        raw_text,
        intent,
        reply_summary,
        created_at: parse_timestamp(&created_at_str),
    })
}

const SESSION_COLUMNS: &str =
    "id, identity_key, identity_json, status, context_json, created_at, last_activity_at";

fn encode_identity(identity: &Identity) -> Result<String, RepositoryError> {
    serde_json::to_string(identity).map_err(|e| RepositoryError::Decode(format!("identity: {e}")))
}

fn encode_context(context: &TurnContext) -> Result<String, RepositoryError> {
    serde_json::to_string(context).map_err(|e| RepositoryError::Decode(format!("context: {e}")))
}

async fn upsert_session<'e, E>(
    executor: E,
    session: &Session,
    context: &TurnContext,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let identity_json = encode_identity(&session.identity)?;
    let context_json = encode_context(context)?;

    sqlx::query(
        "INSERT INTO session (id, identity_key, identity_json, status, context_json,
                              created_at, last_activity_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             identity_key = excluded.identity_key,
             identity_json = excluded.identity_json,
             status = excluded.status,
             context_json = excluded.context_json,
             last_activity_at = excluded.last_activity_at",
    )
    .bind(&session.id.0)
    .bind(session.identity.storage_key())
    .bind(&identity_json)
    .bind(session.status.as_str())
    .bind(&context_json)
    .bind(session.created_at.to_rfc3339())
    .bind(session.last_activity_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<StoredSession>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM session WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_stored(r)?)),
            None => Ok(None),
        }
    }

    async fn find_active_by_identity(
        &self,
        identity: &Identity,
    ) -> Result<Option<StoredSession>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM session WHERE identity_key = ? AND status = 'active'"
        ))
        .bind(identity.storage_key())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_stored(r)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        session: &Session,
        context: &TurnContext,
    ) -> Result<(), RepositoryError> {
        upsert_session(&self.pool, session, context).await
    }

    async fn persist_turn(
        &self,
        session: &Session,
        context: &TurnContext,
        record: &TurnRecord,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        upsert_session(&mut *tx, session, context).await?;

        sqlx::query(
            "INSERT INTO session_turn (session_id, seq, raw_text, intent, reply_summary, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id.0)
        .bind(record.seq as i64)
        .bind(&record.raw_text)
        .bind(&record.intent)
        .bind(&record.reply_summary)
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn recent_turns(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<TurnRecord>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT seq, raw_text, intent, reply_summary, created_at
             FROM session_turn WHERE session_id = ?
             ORDER BY seq DESC LIMIT ?",
        )
        .bind(&session_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut turns =
            rows.iter().map(row_to_turn).collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn merge_guest_into_customer(
        &self,
        visitor_token: &str,
        customer_id: &str,
    ) -> Result<Option<StoredSession>, RepositoryError> {
        let guest_identity = Identity::Guest { visitor_token: visitor_token.to_string() };
        let customer_identity = Identity::Authenticated { customer_id: customer_id.to_string() };

        let mut tx = self.pool.begin().await?;

        let guest_row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM session WHERE identity_key = ? AND status = 'active'"
        ))
        .bind(guest_identity.storage_key())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(ref guest_row) = guest_row else {
            // Nothing to merge; idempotent repeat returns the customer's
            // active session if one exists.
            tx.commit().await?;
            return self.find_active_by_identity(&customer_identity).await;
        };
        let guest = row_to_stored(guest_row)?;

        let customer_row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM session WHERE identity_key = ? AND status = 'active'"
        ))
        .bind(customer_identity.storage_key())
        .fetch_optional(&mut *tx)
        .await?;

        let merged = if let Some(ref customer_row) = customer_row {
            let customer = row_to_stored(customer_row)?;

            let offset: i64 = sqlx::query(
                "SELECT COALESCE(MAX(seq), 0) AS max_seq FROM session_turn WHERE session_id = ?",
            )
            .bind(&customer.session.id.0)
            .fetch_one(&mut *tx)
            .await?
            .get("max_seq");

            sqlx::query("UPDATE session_turn SET session_id = ?, seq = seq + ? WHERE session_id = ?")
                .bind(&customer.session.id.0)
                .bind(offset)
                .bind(&guest.session.id.0)
                .execute(&mut *tx)
                .await?;

            sqlx::query("DELETE FROM session WHERE id = ?")
                .bind(&guest.session.id.0)
                .execute(&mut *tx)
                .await?;

            // The guest's in-flight conversation memory wins; its turn
            // counter moves past the re-parented history.
            let mut context = guest.context.clone();
            context.turn_seq = guest.context.turn_seq + offset as u64;

            let mut session = customer.session.clone();
            session.last_activity_at =
                session.last_activity_at.max(guest.session.last_activity_at);
            upsert_session(&mut *tx, &session, &context).await?;

            StoredSession { session, context }
        } else {
            let mut session = guest.session.clone();
            session.identity = customer_identity.clone();
            upsert_session(&mut *tx, &session, &guest.context).await?;

            StoredSession { session, context: guest.context.clone() }
        };

        tx.commit().await?;
        Ok(Some(merged))
    }

    async fn close_idle_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        // rfc3339 UTC strings compare lexicographically in timestamp order.
        let result =
            sqlx::query("UPDATE session SET status = 'closed' WHERE status = 'active' AND last_activity_at < ?")
                .bind(cutoff.to_rfc3339())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use patter_core::domain::context::TurnContext;
    use patter_core::domain::session::{Identity, Session, SessionStatus};
    use patter_core::domain::turn::TurnRecord;

    use super::SqlSessionRepository;
    use crate::repositories::SessionRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlSessionRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlSessionRepository::new(pool)
    }

    fn guest(token: &str) -> Identity {
        Identity::Guest { visitor_token: token.to_string() }
    }

    fn turn(seq: u64, text: &str) -> TurnRecord {
        TurnRecord {
            seq,
            raw_text: text.to_string(),
            intent: "product_search".to_string(),
            reply_summary: "ok".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let repo = setup().await;
        let session = Session::open(guest("v-1"));
        let mut context = TurnContext::default();
        context.remember_query("trail shoes");

        repo.save(&session, &context).await.expect("save");

        let found = repo.find_by_id(&session.id).await.expect("find").expect("present");
        assert_eq!(found.session, session);
        assert_eq!(found.context.last_query.as_deref(), Some("trail shoes"));

        let by_identity =
            repo.find_active_by_identity(&guest("v-1")).await.expect("find").expect("present");
        assert_eq!(by_identity.session.id, session.id);
    }

    #[tokio::test]
    async fn persist_turn_writes_session_and_history_together() {
        let repo = setup().await;
        let mut session = Session::open(guest("v-2"));
        let mut context = TurnContext::default();

        let seq = context.advance_turn();
        session.touch(Utc::now());
        repo.persist_turn(&session, &context, &turn(seq, "show me boots"))
            .await
            .expect("persist");

        let turns = repo.recent_turns(&session.id, 10).await.expect("turns");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].raw_text, "show me boots");

        let stored = repo.find_by_id(&session.id).await.expect("find").expect("present");
        assert_eq!(stored.context.turn_seq, 1);
    }

    #[tokio::test]
    async fn recent_turns_returns_latest_window_oldest_first() {
        let repo = setup().await;
        let session = Session::open(guest("v-3"));
        let mut context = TurnContext::default();

        for text in ["one", "two", "three", "four"] {
            let seq = context.advance_turn();
            repo.persist_turn(&session, &context, &turn(seq, text)).await.expect("persist");
        }

        let turns = repo.recent_turns(&session.id, 2).await.expect("turns");
        assert_eq!(
            turns.iter().map(|t| t.raw_text.as_str()).collect::<Vec<_>>(),
            vec!["three", "four"]
        );
    }

    #[tokio::test]
    async fn merge_rewrites_identity_when_customer_has_no_session() {
        let repo = setup().await;
        let session = Session::open(guest("v-4"));
        let mut context = TurnContext::default();
        for text in ["a", "b", "c"] {
            let seq = context.advance_turn();
            repo.persist_turn(&session, &context, &turn(seq, text)).await.expect("persist");
        }

        let merged = repo
            .merge_guest_into_customer("v-4", "C42")
            .await
            .expect("merge")
            .expect("merged session");

        assert_eq!(merged.session.id, session.id);
        assert_eq!(
            merged.session.identity,
            Identity::Authenticated { customer_id: "C42".to_string() }
        );
        assert_eq!(repo.recent_turns(&merged.session.id, 10).await.expect("turns").len(), 3);

        // old guest token no longer finds anything
        assert!(repo.find_active_by_identity(&guest("v-4")).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn merge_reparents_turns_onto_existing_customer_session() {
        let repo = setup().await;

        let customer_identity = Identity::Authenticated { customer_id: "C7".to_string() };
        let customer_session = Session::open(customer_identity.clone());
        let mut customer_context = TurnContext::default();
        let seq = customer_context.advance_turn();
        repo.persist_turn(&customer_session, &customer_context, &turn(seq, "existing"))
            .await
            .expect("persist customer");

        let guest_session = Session::open(guest("v-5"));
        let mut guest_context = TurnContext::default();
        for text in ["g1", "g2"] {
            let seq = guest_context.advance_turn();
            repo.persist_turn(&guest_session, &guest_context, &turn(seq, text))
                .await
                .expect("persist guest");
        }

        let merged = repo
            .merge_guest_into_customer("v-5", "C7")
            .await
            .expect("merge")
            .expect("merged session");

        assert_eq!(merged.session.id, customer_session.id);
        assert_eq!(merged.context.turn_seq, 3);

        let turns = repo.recent_turns(&merged.session.id, 10).await.expect("turns");
        assert_eq!(
            turns.iter().map(|t| t.raw_text.as_str()).collect::<Vec<_>>(),
            vec!["existing", "g1", "g2"]
        );

        assert!(repo.find_by_id(&guest_session.id).await.expect("find").is_none());
        assert!(repo.find_active_by_identity(&guest("v-5")).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let repo = setup().await;
        let session = Session::open(guest("v-6"));
        repo.save(&session, &TurnContext::default()).await.expect("save");

        let first = repo.merge_guest_into_customer("v-6", "C9").await.expect("merge");
        let second = repo.merge_guest_into_customer("v-6", "C9").await.expect("repeat merge");

        assert_eq!(
            first.expect("first").session.id,
            second.expect("second").session.id
        );
    }

    #[tokio::test]
    async fn close_idle_before_only_touches_stale_active_sessions() {
        let repo = setup().await;

        let mut stale = Session::open(guest("v-7"));
        stale.last_activity_at = Utc::now() - Duration::hours(2);
        repo.save(&stale, &TurnContext::default()).await.expect("save stale");

        let fresh = Session::open(guest("v-8"));
        repo.save(&fresh, &TurnContext::default()).await.expect("save fresh");

        let closed =
            repo.close_idle_before(Utc::now() - Duration::hours(1)).await.expect("close");
        assert_eq!(closed, 1);

        let stale_stored = repo.find_by_id(&stale.id).await.expect("find").expect("present");
        assert_eq!(stale_stored.session.status, SessionStatus::Closed);
        let fresh_stored = repo.find_by_id(&fresh.id).await.expect("find").expect("present");
        assert_eq!(fresh_stored.session.status, SessionStatus::Active);
    }
}
