use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use patter_core::domain::action::{IdempotencyKey, ParamMap};
use patter_core::domain::turn::TurnRecord;

/// Transport-level failure talking to a collaborator. Outcome
/// classification (4xx vs 5xx) happens on replies, not on these.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("collaborator call timed out")]
    Timeout,
    #[error("collaborator transport failure: {0}")]
    Transport(String),
}

/// Tagged reply from a resource-API collaborator. The core never looks
/// inside `payload` beyond handing it to a response template.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceReply {
    Ok { payload: serde_json::Value },
    Empty,
    ClientError { code: u16, message: String },
    ServerError { code: u16, message: String },
}

/// One request/response binding per action template. Implementations carry
/// the idempotency key so retried mutations stay single-effect.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Whether repeated calls with the same idempotency key are
    /// deduplicated server-side. When false, mutating actions are never
    /// retried against this collaborator.
    fn deduplicates(&self) -> bool;

    async fn call(
        &self,
        action_name: &str,
        parameters: &ParamMap,
        idempotency_key: &IdempotencyKey,
    ) -> Result<ResourceReply, CollaboratorError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub intent: String,
    pub confidence: u8,
    pub entities: BTreeMap<String, String>,
}

/// External intent/entity classifier. The orchestrator applies its own
/// confidence floor on top of whatever this returns.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, raw_text: &str) -> Result<Classification, CollaboratorError>;
}

/// General-purpose answering capability used by the fallback path.
#[async_trait]
pub trait Answering: Send + Sync {
    async fn answer(
        &self,
        query: &str,
        recent_turns: &[TurnRecord],
    ) -> Result<String, CollaboratorError>;
}
