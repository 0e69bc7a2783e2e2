//! Messaging System HTTP API
//!
//! - Processor control (start/stop/status)
//! - Sent message listing
//! - Health and Kubernetes probes
//! - OpenAPI docs at `/swagger-ui`

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ms_common::{Message, MessageStatus};
use serde::Serialize;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::processor::MessageProcessor;

pub mod model;

use model::{ErrorResponse, ProcessorActionResponse, ProcessorStatusResponse, SentMessagesQuery};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<MessageProcessor>,
}

/// Simple health response
#[derive(Serialize, ToSchema)]
pub struct SimpleHealthResponse {
    /// Health status: UP
    pub status: String,
    /// Application version
    pub version: String,
    /// Whether the dispatch processor is running
    pub processor_running: bool,
}

/// Kubernetes probe response
#[derive(Serialize, ToSchema)]
pub struct ProbeResponse {
    /// Probe status: LIVE, READY
    pub status: String,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Messaging System API",
        version = "0.1.0",
        description = "Control the message dispatch processor and inspect sent messages"
    ),
    paths(
        health_handler,
        liveness_probe,
        readiness_probe,
        processor_status,
        processor_action,
        get_sent_messages,
    ),
    components(schemas(
        SimpleHealthResponse,
        ProbeResponse,
        ProcessorActionResponse,
        ProcessorStatusResponse,
        ErrorResponse,
        Message,
        MessageStatus,
    )),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "processor", description = "Dispatch processor control and sent messages"),
    )
)]
pub struct ApiDoc;

/// Create the API router
pub fn create_router(processor: Arc<MessageProcessor>) -> Router {
    let state = AppState { processor };

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .route("/processor/status", get(processor_status))
        .route("/processor/sent-messages", get(get_sent_messages))
        .route("/processor/{action}", post(processor_action))
        .with_state(state)
}

/// Basic health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is up", body = SimpleHealthResponse)
    )
)]
async fn health_handler(State(state): State<AppState>) -> Json<SimpleHealthResponse> {
    Json(SimpleHealthResponse {
        status: "UP".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        processor_running: state.processor.is_running(),
    })
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive", body = ProbeResponse)
    )
)]
async fn liveness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "LIVE".to_string() })
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready", body = ProbeResponse)
    )
)]
async fn readiness_probe() -> Json<ProbeResponse> {
    Json(ProbeResponse { status: "READY".to_string() })
}

#[utoipa::path(
    get,
    path = "/processor/status",
    tag = "processor",
    responses(
        (status = 200, description = "Current processor state", body = ProcessorStatusResponse)
    )
)]
async fn processor_status(State(state): State<AppState>) -> Json<ProcessorStatusResponse> {
    Json(ProcessorStatusResponse {
        running: state.processor.is_running(),
    })
}

/// Start or stop the dispatch processor.
///
/// Starting a running processor or stopping a stopped one is not an error;
/// the response reports the unchanged state.
#[utoipa::path(
    post,
    path = "/processor/{action}",
    tag = "processor",
    params(
        ("action" = String, Path, description = "start or stop")
    ),
    responses(
        (status = 200, description = "Action applied", body = ProcessorActionResponse),
        (status = 400, description = "Unknown action", body = ErrorResponse)
    )
)]
async fn processor_action(State(state): State<AppState>, Path(action): Path<String>) -> Response {
    let message = match action.as_str() {
        "start" => {
            if state.processor.start() {
                "processor started"
            } else {
                "processor already running"
            }
        }
        "stop" => {
            if state.processor.stop() {
                "processor stopped"
            } else {
                "processor is not running"
            }
        }
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("invalid action: use 'start' or 'stop'")),
            )
                .into_response();
        }
    };

    info!(action = %action, "Processor action requested");

    Json(ProcessorActionResponse {
        message: message.to_string(),
        running: state.processor.is_running(),
    })
    .into_response()
}

/// List sent messages, oldest first
#[utoipa::path(
    get,
    path = "/processor/sent-messages",
    tag = "processor",
    params(SentMessagesQuery),
    responses(
        (status = 200, description = "Sent messages", body = [Message]),
        (status = 400, description = "Invalid limit", body = ErrorResponse),
        (status = 404, description = "No sent messages", body = ErrorResponse),
        (status = 500, description = "Store error", body = ErrorResponse)
    )
)]
async fn get_sent_messages(
    State(state): State<AppState>,
    Query(query): Query<SentMessagesQuery>,
) -> Response {
    let limit = match query.resolve_limit() {
        Ok(limit) => limit,
        Err(msg) => return (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response(),
    };

    match state.processor.get_sent_messages(limit).await {
        Ok(messages) if messages.is_empty() => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("no sent messages found")),
        )
            .into_response(),
        Ok(messages) => Json(messages).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to fetch sent messages");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            )
                .into_response()
        }
    }
}
