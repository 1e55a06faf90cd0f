//! Problem-details error payloads for the Modrun REST surfaces.
//!
//! Every error leaving an HTTP handler is rendered as an RFC 9457 body
//! (`application/problem+json`) carrying a stable machine-readable `code`
//! alongside the human message. The rendered [`Problem`] is also stored in
//! the response extensions so boundary middleware can persist server-side
//! failures without re-parsing the body.

use axum::response::{IntoResponse, Response};
use http::{StatusCode, header};
use serde::{Deserialize, Serialize};

/// Stable domain error codes referenced by clients and tests.
pub mod code {
    pub const MODULE_NOT_FOUND: &str = "MODULE_NOT_FOUND";
    pub const VERSION_NOT_FOUND: &str = "VERSION_NOT_FOUND";
    pub const DUPLICATE_VERSION: &str = "DUPLICATE_VERSION";
    pub const NAME_CONFLICT: &str = "NAME_CONFLICT";
    pub const NO_ACTIVE_DEPLOYMENT: &str = "NO_ACTIVE_DEPLOYMENT";
    pub const BAD_INPUT: &str = "BAD_INPUT";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const PROVISION_FAILED: &str = "PROVISION_FAILED";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const INTERNAL: &str = "INTERNAL_ERROR";
}

/// RFC 9457 problem body with a stable domain `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub code: String,
    pub status: u16,
    pub message: String,
    /// Diagnostic detail intended for operators, never end users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer_message: Option<String>,
    /// Request path the problem occurred on, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl Problem {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_owned(),
            status: status.as_u16(),
            message: message.into(),
            developer_message: None,
            instance: None,
        }
    }

    #[must_use]
    pub fn with_developer_message(mut self, dev: impl Into<String>) -> Self {
        self.developer_message = Some(dev.into());
        self
    }

    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Error type returned by REST handlers.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} {}: {}", .0.status, .0.code, .0.message)]
pub struct ApiError(pub Problem);

impl ApiError {
    #[must_use]
    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self(Problem::new(StatusCode::BAD_REQUEST, code, message))
    }

    #[must_use]
    pub fn not_found(code: &str, message: impl Into<String>) -> Self {
        Self(Problem::new(StatusCode::NOT_FOUND, code, message))
    }

    #[must_use]
    pub fn conflict(code: &str, message: impl Into<String>) -> Self {
        Self(Problem::new(StatusCode::CONFLICT, code, message))
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self(Problem::new(
            StatusCode::UNAUTHORIZED,
            code::UNAUTHORIZED,
            message,
        ))
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self(Problem::new(StatusCode::FORBIDDEN, code::FORBIDDEN, message))
    }

    /// Unexpected server-side failure; `dev` carries the diagnostic detail.
    #[must_use]
    pub fn internal(dev: impl Into<String>) -> Self {
        Self(
            Problem::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code::INTERNAL,
                "internal server error",
            )
            .with_developer_message(dev),
        )
    }

    #[must_use]
    pub fn with_developer_message(mut self, dev: impl Into<String>) -> Self {
        self.0.developer_message = Some(dev.into());
        self
    }

    #[must_use]
    pub fn problem(&self) -> &Problem {
        &self.0
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = serde_json::to_string(&self.0).unwrap_or_default();

        let mut response = (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            body,
        )
            .into_response();

        // Stash the structured problem so boundary middleware can log it.
        response.extensions_mut().insert(self.0);
        response
    }
}
