//! Typed tool errors.
//!
//! Library code returns `anyhow::Result`; errors that should reach a caller
//! with a specific status are raised as a [`ToolError`] and recovered at the
//! HTTP/MCP boundary with [`ToolError::classify`].

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("tool '{0}' requires \"allow\": true")]
    PermissionDenied(String),

    #[error("embeddings are disabled: set [embedding] provider in config")]
    EmbeddingsDisabled,

    #[error("generation is disabled: set [generation] provider in config")]
    GenerationDisabled,

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Upstream(String),
}

impl ToolError {
    /// Machine-readable error code used in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::BadRequest(_) => "bad_request",
            ToolError::NotFound(_) => "not_found",
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::EmbeddingsDisabled => "embeddings_disabled",
            ToolError::GenerationDisabled => "generation_disabled",
            ToolError::Timeout(_) => "timeout",
            ToolError::Upstream(_) => "upstream_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ToolError::BadRequest(_)
            | ToolError::EmbeddingsDisabled
            | ToolError::GenerationDisabled => StatusCode::BAD_REQUEST,
            ToolError::NotFound(_) => StatusCode::NOT_FOUND,
            ToolError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ToolError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            ToolError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Map any error to `(status, code)`. Errors that are not a
    /// [`ToolError`] anywhere in their chain become `500 tool_error`.
    pub fn classify(err: &anyhow::Error) -> (StatusCode, &'static str) {
        match err.chain().find_map(|e| e.downcast_ref::<ToolError>()) {
            Some(te) => (te.status(), te.code()),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "tool_error"),
        }
    }
}

pub fn bad_request(message: impl Into<String>) -> anyhow::Error {
    ToolError::BadRequest(message.into()).into()
}

pub fn not_found(message: impl Into<String>) -> anyhow::Error {
    ToolError::NotFound(message.into()).into()
}
