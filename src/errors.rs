use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_mcp_sdk::schema::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors surfaced by the HTTP layer (SSE endpoints, auth, discovery).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: String,
    },
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("not found: {message}")]
    NotFound {
        code: &'static str,
        message: &'static str,
    },
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn not_found(code: &'static str, message: &'static str) -> Self {
        Self::NotFound { code, message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, code, message.to_string())
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, code, message.to_string()),
            Self::Internal { code, message } => {
                tracing::error!(error = %message, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details: json!({}),
            }),
        )
            .into_response()
    }
}

/// JSON-RPC error codes used by the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl ErrorCode {
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => PARSE_ERROR,
            Self::InvalidRequest => INVALID_REQUEST,
            Self::MethodNotFound => METHOD_NOT_FOUND,
            Self::InvalidParams => INVALID_PARAMS,
            Self::InternalError => INTERNAL_ERROR,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            PARSE_ERROR => Some(Self::ParseError),
            INVALID_REQUEST => Some(Self::InvalidRequest),
            METHOD_NOT_FOUND => Some(Self::MethodNotFound),
            INVALID_PARAMS => Some(Self::InvalidParams),
            INTERNAL_ERROR => Some(Self::InternalError),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
        };
        f.write_str(name)
    }
}

/// A coded protocol error that aborts a single request/response exchange.
#[derive(Debug, Clone, Error)]
#[error("MCP error {}: {message}", .code.code())]
pub struct McpError {
    pub code: ErrorCode,
    pub message: String,
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

/// An engine invariant violation, meant for programmers rather than end users.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct UnexpectedStateError {
    pub message: String,
    pub extras: Option<Value>,
}

impl UnexpectedStateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extras: None,
        }
    }

    pub fn with_extras(mut self, extras: Value) -> Self {
        self.extras = Some(extras);
        self
    }
}

/// Everything a routed request can fail with before a response is produced.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Protocol(#[from] McpError),
    #[error(transparent)]
    UnexpectedState(#[from] UnexpectedStateError),
}

/// Failure returned by application-supplied tool, resource and prompt handlers.
///
/// `User` messages are shown verbatim to the caller. `Failed` carries any other
/// failure and is rendered with a generic `Error:` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("{0}")]
    User(String),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User(message.into())
    }

    pub fn failed(value: impl fmt::Display) -> Self {
        Self::Failed(value.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::failed(err)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::failed(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip_through_numeric_form() {
        for code in [
            ErrorCode::ParseError,
            ErrorCode::InvalidRequest,
            ErrorCode::MethodNotFound,
            ErrorCode::InvalidParams,
            ErrorCode::InternalError,
        ] {
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ErrorCode::from_code(-1), None);
    }

    #[test]
    fn mcp_error_display_includes_code() {
        let err = McpError::method_not_found("Unknown tool: nope");
        assert_eq!(err.to_string(), "MCP error -32601: Unknown tool: nope");
    }

    #[test]
    fn handler_error_failed_renders_plain_value() {
        assert_eq!(HandlerError::failed(42).to_string(), "42");
        assert_eq!(HandlerError::user("bad url").to_string(), "bad url");
    }
}
