use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use lib_streams::errors::StreamError;
use lib_streams::streams::{ConsumerServer, StreamPublisher, TypedSchema};
use serde_json::{Value, json};

use super::handlers::{USER_CREATED, UserCreated};

#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<StreamPublisher>,
    pub server: Arc<ConsumerServer>,
    pub next_user_id: Arc<AtomicI64>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(publisher: Arc<StreamPublisher>, server: Arc<ConsumerServer>) -> Self {
        Self {
            publisher,
            server,
            next_user_id: Arc::new(AtomicI64::new(1)),
            started_at: Utc::now(),
        }
    }
}

/// Publish failures mapped onto HTTP responses.
#[derive(Debug)]
pub struct AppError(StreamError);

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self.0 {
            StreamError::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
            StreamError::Connection { .. } | StreamError::ConnectionClosed => {
                (StatusCode::SERVICE_UNAVAILABLE, "ConnectionError")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "PublishError"),
        };
        tracing::error!(error = %self.0, "Publish request failed");
        (status, Json(json!({ "error_type": error_type, "message": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(publish_user_created))
        .route("/health", get(health))
        .with_state(state)
}

/// Publishes a `user_created` event with the next user id.
async fn publish_user_created(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let event = UserCreated {
        value: "hello world".to_string(),
        user_id: state.next_user_id.fetch_add(1, Ordering::SeqCst),
    };
    let entry_id = state
        .publisher
        .send(USER_CREATED, &TypedSchema::<UserCreated>::new(), &event)
        .await?;

    Ok(Json(json!({
        "status": "published",
        "stream": state.publisher.stream_id(),
        "pattern": USER_CREATED,
        "entryId": entry_id,
        "userId": event.user_id,
    })))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = Utc::now().signed_duration_since(state.started_at);
    Json(json!({
        "status": "ok",
        "consumerState": state.server.state().as_str(),
        "startedAt": state.started_at.to_rfc3339(),
        "uptimeSeconds": uptime.num_seconds(),
    }))
}
