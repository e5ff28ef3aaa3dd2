//! HTTP channel exposing the conversation API.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{
    ConversationId, ConversationSnapshot, IncomingTurn, Orchestrator, ToolCall, ToolResult,
    TurnOutcome,
};
use crate::config::ServerConfig;
use crate::error::{ConversationError, Error};

/// Maximum JSON body size (5 MB, enough for a `save_file` payload).
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// HTTP channel.
pub struct HttpChannel {
    config: ServerConfig,
    orchestrator: Orchestrator,
}

impl HttpChannel {
    pub fn new(config: ServerConfig, orchestrator: Orchestrator) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Return the channel's axum routes with state applied.
    pub fn routes(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/api/chat", post(chat_handler))
            .route("/api/tool-results", post(tool_results_handler))
            .route("/api/conversations/{id}", get(conversation_handler))
            .route("/api/conversations/{id}/execute", post(execute_handler))
            .route("/api/conversations/{id}/pending", delete(abandon_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.orchestrator.clone())
    }

    /// Return the configured host and port for this channel.
    pub fn addr(&self) -> (&str, u16) {
        (&self.config.host, self.config.port)
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// Absent or unknown ids start a new conversation.
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    messages: Vec<IncomingTurn>,
    /// Run requested tools server-side instead of returning them.
    #[serde(default)]
    auto_execute: bool,
    #[serde(default)]
    max_tool_rounds: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ToolResultsRequest {
    conversation_id: ConversationId,
    results: Vec<ToolResult>,
}

#[derive(Debug, Serialize)]
struct AbandonResponse {
    conversation_id: ConversationId,
    abandoned: Vec<ToolCall>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    registered_tools: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pending_tool_calls: Option<Vec<String>>,
}

/// Crate error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Conversation(e) => match e {
                ConversationError::UnknownConversation(_) => StatusCode::NOT_FOUND,
                ConversationError::UnknownToolCall { .. }
                | ConversationError::NoPendingToolCalls(_)
                | ConversationError::ToolsExecuting(_)
                | ConversationError::DuplicateToolResult(_)
                | ConversationError::ToolResultsPending { .. } => StatusCode::CONFLICT,
                ConversationError::EmptyTurn | ConversationError::EmptySubmission => {
                    StatusCode::BAD_REQUEST
                }
                ConversationError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "Request failed");
            ErrorBody {
                error: "Internal server error".to_string(),
                pending_tool_calls: None,
            }
        } else {
            let pending_tool_calls = match &self.0 {
                Error::Conversation(ConversationError::ToolResultsPending { pending, .. }) => {
                    Some(pending.clone())
                }
                _ => None,
            };
            ErrorBody {
                error: self.0.to_string(),
                pending_tool_calls,
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn health_handler(State(orchestrator): State<Orchestrator>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        registered_tools: orchestrator.registry().count().await,
    })
}

async fn chat_handler(
    State(orchestrator): State<Orchestrator>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<TurnOutcome> {
    let outcome = orchestrator
        .handle_user_turn(req.conversation_id, req.messages)
        .await?;

    if !req.auto_execute {
        return Ok(Json(outcome));
    }

    let max_rounds = effective_rounds(req.max_tool_rounds, orchestrator.config().max_tool_rounds);
    Ok(Json(orchestrator.run_tool_rounds(outcome, max_rounds).await?))
}

/// Clients may ask for fewer rounds than configured, never more.
fn effective_rounds(requested: Option<usize>, ceiling: usize) -> usize {
    requested.map_or(ceiling, |rounds| rounds.min(ceiling))
}

async fn tool_results_handler(
    State(orchestrator): State<Orchestrator>,
    Json(req): Json<ToolResultsRequest>,
) -> ApiResult<TurnOutcome> {
    Ok(Json(
        orchestrator
            .submit_tool_results(&req.conversation_id, req.results)
            .await?,
    ))
}

async fn conversation_handler(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<ConversationId>,
) -> ApiResult<ConversationSnapshot> {
    Ok(Json(orchestrator.snapshot(&id).await?))
}

async fn execute_handler(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<ConversationId>,
) -> ApiResult<TurnOutcome> {
    Ok(Json(orchestrator.execute_pending_tools(&id).await?))
}

async fn abandon_handler(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<ConversationId>,
) -> ApiResult<AbandonResponse> {
    let abandoned = orchestrator.abandon_pending(&id).await?;
    Ok(Json(AbandonResponse {
        conversation_id: id,
        abandoned,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: impl Into<Error>) -> StatusCode {
        ApiError(err.into()).status()
    }

    #[test]
    fn test_effective_rounds_is_capped() {
        assert_eq!(effective_rounds(None, 8), 8);
        assert_eq!(effective_rounds(Some(2), 8), 2);
        assert_eq!(effective_rounds(Some(1000), 8), 8);
        assert_eq!(effective_rounds(Some(0), 8), 0);
    }

    #[test]
    fn test_error_status_mapping() {
        let id = ConversationId::from("c1");
        assert_eq!(
            status_of(ConversationError::UnknownConversation(id.clone())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ConversationError::UnknownToolCall {
                conversation_id: id.clone(),
                tool_call_id: "t1".to_string(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ConversationError::DuplicateToolResult("t1".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ConversationError::ToolsExecuting(id.clone())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(ConversationError::EmptyTurn), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ConversationError::Busy(id)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(Error::Internal("boom".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
