use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use patter_core::domain::action::{IdempotencyKey, ParamMap};
use patter_core::domain::turn::TurnRecord;
use patter_dialogue::collaborators::{
    Answering, Classification, Classifier, CollaboratorError, ResourceApi, ResourceReply,
};

fn transport_error(error: reqwest::Error) -> CollaboratorError {
    if error.is_timeout() {
        CollaboratorError::Timeout
    } else {
        CollaboratorError::Transport(error.to_string())
    }
}

fn bearer(request: reqwest::RequestBuilder, token: &Option<SecretString>) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token.expose_secret()),
        None => request,
    }
}

/// Resource-API binding over JSON/HTTP. Reply classification is driven by
/// the HTTP status: 2xx ok/empty, 4xx client error, 5xx server error.
pub struct HttpResourceApi {
    client: Client,
    base_url: String,
    api_token: Option<SecretString>,
    deduplicates: bool,
}

impl HttpResourceApi {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_token: Option<SecretString>,
        deduplicates: bool,
    ) -> Self {
        Self { client, base_url: base_url.into(), api_token, deduplicates }
    }
}

#[derive(Serialize)]
struct ActionCallBody<'a> {
    parameters: &'a ParamMap,
    idempotency_key: &'a str,
}

#[async_trait]
impl ResourceApi for HttpResourceApi {
    fn deduplicates(&self) -> bool {
        self.deduplicates
    }

    async fn call(
        &self,
        action_name: &str,
        parameters: &ParamMap,
        idempotency_key: &IdempotencyKey,
    ) -> Result<ResourceReply, CollaboratorError> {
        let url = format!("{}/actions/{action_name}", self.base_url.trim_end_matches('/'));
        let body = ActionCallBody { parameters, idempotency_key: &idempotency_key.0 };

        let response = bearer(self.client.post(&url), &self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(ResourceReply::Empty);
        }

        if status.is_success() {
            let payload = response.json::<serde_json::Value>().await.ok();
            return Ok(match payload {
                Some(serde_json::Value::Null) | None => ResourceReply::Empty,
                Some(payload) => ResourceReply::Ok { payload },
            });
        }

        let message = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Ok(ResourceReply::ClientError { code: status.as_u16(), message })
        } else {
            Ok(ResourceReply::ServerError { code: status.as_u16(), message })
        }
    }
}

/// Stands in for a binding that was not configured. Every call is a
/// terminal client error, so the user gets the action-scoped failure reply
/// instead of a retry storm.
pub struct UnconfiguredResourceApi {
    binding: &'static str,
}

impl UnconfiguredResourceApi {
    pub fn new(binding: &'static str) -> Self {
        Self { binding }
    }
}

#[async_trait]
impl ResourceApi for UnconfiguredResourceApi {
    fn deduplicates(&self) -> bool {
        true
    }

    async fn call(
        &self,
        action_name: &str,
        _parameters: &ParamMap,
        _idempotency_key: &IdempotencyKey,
    ) -> Result<ResourceReply, CollaboratorError> {
        tracing::warn!(
            event_name = "collaborator.unconfigured_call",
            binding = self.binding,
            action = action_name,
            "dropping action against unconfigured collaborator"
        );
        Ok(ResourceReply::ClientError {
            code: 501,
            message: format!("{} binding is not configured", self.binding),
        })
    }
}

#[derive(Serialize)]
struct AnswerCallBody<'a> {
    query: &'a str,
    recent_turns: Vec<AnswerTurn<'a>>,
}

#[derive(Serialize)]
struct AnswerTurn<'a> {
    text: &'a str,
    reply: &'a str,
}

#[derive(Deserialize)]
struct AnswerCallReply {
    answer: String,
}

/// General-answering capability over JSON/HTTP.
pub struct HttpAnswering {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpAnswering {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self { client, base_url: base_url.into(), api_key }
    }
}

#[async_trait]
impl Answering for HttpAnswering {
    async fn answer(
        &self,
        query: &str,
        recent_turns: &[TurnRecord],
    ) -> Result<String, CollaboratorError> {
        let url = format!("{}/answers", self.base_url.trim_end_matches('/'));
        let body = AnswerCallBody {
            query,
            recent_turns: recent_turns
                .iter()
                .map(|turn| AnswerTurn { text: &turn.raw_text, reply: &turn.reply_summary })
                .collect(),
        };

        let response = bearer(self.client.post(&url), &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(CollaboratorError::Transport(format!(
                "answering capability returned {}",
                response.status()
            )));
        }

        let reply = response.json::<AnswerCallReply>().await.map_err(transport_error)?;
        Ok(reply.answer)
    }
}

/// Answering stand-in for deployments without the capability; the router
/// turns the error into its static apology.
pub struct UnconfiguredAnswering;

#[async_trait]
impl Answering for UnconfiguredAnswering {
    async fn answer(
        &self,
        _query: &str,
        _recent_turns: &[TurnRecord],
    ) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Transport("answering capability is not configured".to_string()))
    }
}

#[derive(Serialize)]
struct ClassifyCallBody<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ClassifyCallReply {
    intent: String,
    confidence: u8,
    #[serde(default)]
    entities: BTreeMap<String, String>,
}

/// Classifier collaborator over JSON/HTTP.
pub struct HttpClassifier {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self { client, base_url: base_url.into(), timeout }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, raw_text: &str) -> Result<Classification, CollaboratorError> {
        let url = format!("{}/classify", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&ClassifyCallBody { text: raw_text })
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(CollaboratorError::Transport(format!(
                "classifier returned {}",
                response.status()
            )));
        }

        let reply = response.json::<ClassifyCallReply>().await.map_err(transport_error)?;
        Ok(Classification {
            intent: reply.intent,
            confidence: reply.confidence,
            entities: reply.entities,
        })
    }
}

/// Keyword classifier used when no external classifier is configured.
/// Good enough to keep the happy paths usable in a degraded deployment.
#[derive(Default)]
pub struct HeuristicClassifier;

#[async_trait]
impl Classifier for HeuristicClassifier {
    async fn classify(&self, raw_text: &str) -> Result<Classification, CollaboratorError> {
        let normalized = raw_text.to_ascii_lowercase();

        let intent = if normalized.contains("human")
            || normalized.contains("agent")
            || normalized.contains("representative")
        {
            "human_handoff"
        } else if normalized.contains("cancel order") {
            "cancel_order"
        } else if normalized.contains("order") && normalized.contains("status") {
            "order_status"
        } else if normalized.contains("cart") && normalized.contains("remove") {
            "remove_from_cart"
        } else if normalized.contains("cart")
            && (normalized.contains("show") || normalized.contains("view"))
        {
            "view_cart"
        } else if normalized.contains("add") && normalized.contains("cart") {
            "add_to_cart"
        } else if normalized.contains("checkout") || normalized.contains("place order") {
            "place_order"
        } else if normalized.contains("search")
            || normalized.contains("find")
            || normalized.contains("looking for")
        {
            "product_search"
        } else if normalized.contains("never mind") || normalized.contains("forget it") {
            "cancel"
        } else {
            return Ok(Classification {
                intent: "unknown".to_string(),
                confidence: 0,
                entities: BTreeMap::new(),
            });
        };

        Ok(Classification {
            intent: intent.to_string(),
            confidence: 70,
            entities: BTreeMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use patter_dialogue::collaborators::Classifier;

    use super::HeuristicClassifier;

    #[tokio::test]
    async fn heuristic_classifier_maps_common_phrasings() {
        let classifier = HeuristicClassifier;

        let cases = [
            ("I want to talk to a human", "human_handoff"),
            ("please cancel order O-1", "cancel_order"),
            ("what's the status of my order?", "order_status"),
            ("show my cart", "view_cart"),
            ("add this to my cart", "add_to_cart"),
            ("I'm looking for running shoes", "product_search"),
            ("never mind", "cancel"),
        ];

        for (text, expected) in cases {
            let classification = classifier.classify(text).await.expect("classify");
            assert_eq!(classification.intent, expected, "text: {text}");
        }
    }

    #[tokio::test]
    async fn heuristic_classifier_returns_unknown_at_zero_confidence() {
        let classification =
            HeuristicClassifier.classify("blorp").await.expect("classify");
        assert_eq!(classification.intent, "unknown");
        assert_eq!(classification.confidence, 0);
    }
}
