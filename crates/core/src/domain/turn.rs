use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One classified inbound utterance, as delivered by the classifier
/// collaborator. Confidence is a 0..=100 score; the orchestrator demotes
/// anything under the configured floor to an unknown intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedTurn {
    pub intent: String,
    pub confidence: u8,
    pub entities: BTreeMap<String, String>,
    pub raw_text: String,
}

impl ClassifiedTurn {
    pub fn new(intent: impl Into<String>, confidence: u8, raw_text: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            confidence,
            entities: BTreeMap::new(),
            raw_text: raw_text.into(),
        }
    }

    pub fn with_entity(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entities.insert(name.into(), value.into());
        self
    }
}

/// Persisted record of one completed turn. Feeds the recent-turns window
/// handed to the answering collaborator and survives guest-to-customer
/// session merges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub seq: u64,
    pub raw_text: String,
    pub intent: String,
    pub reply_summary: String,
    pub created_at: DateTime<Utc>,
}
