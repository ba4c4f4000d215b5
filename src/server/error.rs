//! Webhook error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Shape of the JSON body an endpoint answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// `{"ok": false, "error": ...}`
    Ok,
    /// `{"success": false, "error": ...}`
    Success,
    /// `{"error": ...}`
    Bare,
}

impl Envelope {
    pub fn failure(self, error: &str) -> serde_json::Value {
        match self {
            Envelope::Ok => json!({ "ok": false, "error": error }),
            Envelope::Success => json!({ "success": false, "error": error }),
            Envelope::Bare => json!({ "error": error }),
        }
    }
}

/// Errors that stop a webhook before any side effect.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Unauthorized")]
    Unauthorized(Envelope),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            WebhookError::Unauthorized(envelope) => {
                (StatusCode::UNAUTHORIZED, envelope.failure("unauthorized"))
            }
            WebhookError::BadRequest(msg) => (StatusCode::BAD_REQUEST, Envelope::Bare.failure(msg)),
            WebhookError::NotFound => (StatusCode::NOT_FOUND, Envelope::Bare.failure("not_found")),
        };

        (status, Json(body)).into_response()
    }
}

pub type WebhookResult<T> = Result<T, WebhookError>;
