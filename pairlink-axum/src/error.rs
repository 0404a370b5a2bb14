use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pairlink_core::{ErrorKind, SessionError};
use serde_json::json;

/// Transport-level failure that is not a session error.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HttpError {
    pub fn not_authenticated(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotAuthenticated,
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct PairlinkAxumError(pub anyhow::Error);

impl From<anyhow::Error> for PairlinkAxumError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<SessionError> for PairlinkAxumError {
    fn from(e: SessionError) -> Self {
        Self(anyhow::Error::new(e))
    }
}

impl From<HttpError> for PairlinkAxumError {
    fn from(e: HttpError) -> Self {
        Self(anyhow::Error::new(e))
    }
}

fn respond(kind: ErrorKind, message: String) -> Response {
    let status = StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "name": kind.name(),
        "message": message,
        "code": kind.status_code(),
        "className": kind.class_name(),
    });
    (status, Json(body)).into_response()
}

impl IntoResponse for PairlinkAxumError {
    fn into_response(self) -> Response {
        // Look through anyhow contexts for a typed error first
        if let Some(err) = self.0.chain().find_map(|e| e.downcast_ref::<SessionError>()) {
            return respond(err.kind(), err.to_string());
        }
        if let Some(err) = self.0.chain().find_map(|e| e.downcast_ref::<HttpError>()) {
            return respond(err.kind, err.message.clone());
        }

        tracing::error!(error = %format!("{:#}", self.0), "unhandled error");
        respond(ErrorKind::GeneralError, "Internal server error".to_string())
    }
}
