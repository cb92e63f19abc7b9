//! JSON API: error responses and `POST /api/broadcast`.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info};

use crate::auth::BearerUser;
use crate::server::AppState;
use crate::websocket::message::MessageType;

/// Error returned by an HTTP handler, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401: missing or invalid credentials.
    #[error("{0}")]
    Unauthorized(String),
    /// 400: malformed request body.
    #[error("{0}")]
    BadRequest(String),
    /// 500: the server could not complete the request.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `POST /api/broadcast` body.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Envelope type tag, e.g. `task_updated`.
    #[serde(rename = "type", default)]
    pub message_type: String,
    /// Becomes the envelope payload. Must not be `null`.
    #[serde(default)]
    pub data: Option<Value>,
}

/// `POST /api/broadcast` success body.
#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    /// Always `true`.
    pub success: bool,
    /// Human-readable status.
    pub message: &'static str,
    /// Clients registered when the broadcast was accepted.
    pub clients: usize,
}

/// POST /api/broadcast: fan `{"type", "payload": data}` out to every client.
pub async fn broadcast_handler(
    BearerUser(user): BearerUser,
    State(state): State<AppState>,
    body: Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.message_type.trim().is_empty() {
        return Err(ApiError::BadRequest("type is required".into()));
    }
    let data = request
        .data
        .filter(|data| !data.is_null())
        .ok_or_else(|| ApiError::BadRequest("data is required".into()))?;

    let message_type = MessageType::parse(&request.message_type);
    state
        .hub
        .broadcast_task_update(message_type.clone(), &data)
        .await
        .map_err(|e| {
            error!(error = %e, %message_type, "broadcast failed");
            ApiError::Internal("Failed to broadcast message".into())
        })?;

    let clients = state.hub.client_count();
    info!(user, %message_type, clients, "broadcast accepted");
    Ok(Json(BroadcastResponse {
        success: true,
        message: "Message broadcasted",
        clients,
    }))
}
