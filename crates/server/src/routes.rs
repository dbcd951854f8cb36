use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use patter_core::domain::response::ResponsePlan;
use patter_core::domain::session::{Identity, SessionId};
use patter_core::domain::turn::ClassifiedTurn;
use patter_core::errors::{ApplicationError, InterfaceError};
use patter_dialogue::collaborators::Classifier;
use patter_dialogue::orchestrator::{DialogueOrchestrator, OrchestratorError};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<DialogueOrchestrator>,
    pub classifier: Arc<dyn Classifier>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/merge", post(merge_session))
        .route("/v1/sessions/{session_id}/turns", post(process_turn))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    identity: Identity,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session_id: String,
    identity: Identity,
    status: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.orchestrator.create_or_get_session(request.identity).await?;

    Ok(Json(SessionResponse {
        session_id: session.id.0,
        identity: session.identity,
        status: session.status.as_str().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct MergeSessionRequest {
    visitor_token: String,
    customer_id: String,
}

async fn merge_session(
    State(state): State<AppState>,
    Json(request): Json<MergeSessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let merged = state
        .orchestrator
        .merge_session(&request.visitor_token, &request.customer_id)
        .await?;

    match merged {
        Some(session) => Ok(Json(SessionResponse {
            session_id: session.id.0,
            identity: session.identity,
            status: session.status.as_str().to_string(),
        })),
        None => Err(ApiError::not_found("no session found for that visitor or customer")),
    }
}

/// A turn may arrive pre-classified (intent present) or as raw text, in
/// which case the classifier collaborator runs first.
#[derive(Debug, Deserialize)]
struct TurnRequest {
    text: String,
    intent: Option<String>,
    confidence: Option<u8>,
    #[serde(default)]
    entities: BTreeMap<String, String>,
}

async fn process_turn(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<ResponsePlan>, ApiError> {
    let turn = match request.intent {
        Some(intent) => ClassifiedTurn {
            intent,
            confidence: request.confidence.unwrap_or(100),
            entities: request.entities,
            raw_text: request.text,
        },
        None => match state.classifier.classify(&request.text).await {
            Ok(classification) => ClassifiedTurn {
                intent: classification.intent,
                confidence: classification.confidence,
                entities: classification.entities,
                raw_text: request.text,
            },
            Err(error) => {
                // Classifier trouble degrades the turn to unknown; the
                // fallback path still answers.
                tracing::warn!(
                    event_name = "ingress.classifier_unavailable",
                    error = %error,
                    "treating turn as unknown intent"
                );
                ClassifiedTurn::new("unknown", 0, request.text)
            }
        },
    };

    let plan = state.orchestrator.process_turn(&SessionId(session_id), turn).await?;
    Ok(Json(plan))
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    correlation_id: String,
}

impl ApiError {
    fn not_found(message: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                message: message.to_string(),
                correlation_id: Uuid::new_v4().to_string(),
            },
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(error: OrchestratorError) -> Self {
        let correlation_id = Uuid::new_v4().to_string();

        tracing::error!(
            event_name = "ingress.turn_failed",
            correlation_id = %correlation_id,
            error = %error,
            "turn processing failed"
        );

        let application = match error {
            OrchestratorError::StorageUnavailable(message) => ApplicationError::Storage(message),
            OrchestratorError::Configuration(message) => {
                ApplicationError::Configuration(message)
            }
        };

        let interface = application.into_interface(correlation_id.clone());
        let status = match interface {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            body: ErrorBody { message: interface.user_message().to_string(), correlation_id },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
