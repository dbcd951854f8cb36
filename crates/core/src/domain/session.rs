use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Who the session belongs to. A guest is keyed by an opaque visitor token
/// until login, after which the session carries the customer id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Guest { visitor_token: String },
    Authenticated { customer_id: String },
}

impl Identity {
    /// Stable storage key used to enforce the one-active-session-per-identity
    /// invariant.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Guest { visitor_token } => format!("guest:{visitor_token}"),
            Self::Authenticated { customer_id } => format!("customer:{customer_id}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub identity: Identity,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn open(identity: Identity) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            identity,
            status: SessionStatus::Active,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// A session past its idle TTL is treated as closed history; further
    /// turns for the identity open a fresh session instead of resuming it.
    pub fn is_expired(&self, ttl_secs: u64, now: DateTime<Utc>) -> bool {
        now - self.last_activity_at > Duration::seconds(ttl_secs as i64)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    pub fn close(&mut self) {
        self.status = SessionStatus::Closed;
    }
}
