//! # Errors
//!
//! `SessionError` is the single error type of the session core.
//! Every variant maps onto a Feathers-style [`ErrorKind`] so transport
//! crates can turn it into a status code and a stable JSON shape
//! without knowing the variants.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Feathers-ish error class names + status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,       // 400
    NotAuthenticated, // 401
    Forbidden,        // 403
    NotFound,         // 404
    Timeout,          // 408
    Conflict,         // 409
    GeneralError,     // 500
    Unavailable,      // 503
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotAuthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::Conflict => 409,
            ErrorKind::GeneralError => 500,
            ErrorKind::Unavailable => 503,
        }
    }

    /// Error `name` (e.g. "NotFound")
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotAuthenticated => "NotAuthenticated",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::Unavailable => "Unavailable",
        }
    }

    /// Error `className` (kebab-cased)
    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotAuthenticated => "not-authenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Conflict => "conflict",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

/// Errors surfaced by the session lifecycle manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Unknown tenant, or a tenant the caller does not own.
    #[error("Project not found: {0}")]
    NotFound(String),

    /// A handle is already live or initializing for the tenant.
    #[error("{0}")]
    Conflict(String),

    /// The client could not be constructed or its connect call failed.
    #[error("Failed to initialize session: {0}")]
    Initialization(String),

    /// The client reported that its credentials were rejected.
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// A session/tenant store read or write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// No pairing artifact is cached for the tenant.
    #[error("Pairing code not available")]
    NotAvailable,
}

impl SessionError {
    pub fn not_found(tenant: impl Into<String>) -> Self {
        Self::NotFound(tenant.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn initialization(msg: impl std::fmt::Display) -> Self {
        Self::Initialization(msg.to_string())
    }

    pub fn persistence(msg: impl std::fmt::Display) -> Self {
        Self::Persistence(msg.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::NotAvailable => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Initialization(_) => ErrorKind::GeneralError,
            Self::AuthFailure(_) => ErrorKind::NotAuthenticated,
            Self::Persistence(_) => ErrorKind::Unavailable,
        }
    }

    pub fn code(&self) -> u16 {
        self.kind().status_code()
    }

    /// JSON payload with `name`, `message`, `code` and `className`.
    pub fn to_json(&self) -> serde_json::Value {
        let kind = self.kind();
        serde_json::json!({
            "name": kind.name(),
            "message": self.to_string(),
            "code": kind.status_code(),
            "className": kind.class_name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_status_codes() {
        assert_eq!(SessionError::not_found("p1").code(), 404);
        assert_eq!(SessionError::NotAvailable.code(), 404);
        assert_eq!(SessionError::conflict("busy").code(), 409);
        assert_eq!(SessionError::initialization("boom").code(), 500);
        assert_eq!(SessionError::AuthFailure("bad".into()).code(), 401);
        assert_eq!(SessionError::persistence("down").code(), 503);
    }

    #[test]
    fn json_shape_carries_class_name() {
        let body = SessionError::conflict("Client already initializing or active").to_json();
        assert_eq!(body["name"], "Conflict");
        assert_eq!(body["code"], 409);
        assert_eq!(body["className"], "conflict");
        assert_eq!(body["message"], "Client already initializing or active");
    }
}
