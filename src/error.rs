//! Error types for toolrelay

use serde_json::{json, Value};
use thiserror::Error;

/// Result type alias for toolrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while dispatching tools and driving agent turns
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Invocation failed with {status} {status_text}")]
    Invocation {
        status: u16,
        status_text: String,
        body: Value,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Run failed: {0}")]
    RunFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Max iterations reached")]
    MaxIterations,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors a tool call can produce that are reported back to the model
    /// instead of aborting the loop.
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::Authentication(_)
                | Error::Invocation { .. }
                | Error::Http(_)
                | Error::Json(_)
        )
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::NotFound(_) => "not_found",
            Error::Authentication(_) => "authentication_error",
            Error::Invocation { .. } => "invocation_error",
            Error::Provider(_) => "provider_error",
            Error::RunFailed(_) => "run_failed",
            Error::Config(_) => "config_error",
            Error::Store(_) => "store_error",
            Error::Io(_) => "io_error",
            Error::Json(_) => "json_error",
            Error::Http(_) => "http_error",
            Error::MaxIterations => "max_iterations",
            Error::Other(_) => "error",
        }
    }

    /// Structured payload placed in a `tool_result` with `is_error = true`.
    pub fn to_tool_payload(&self) -> Value {
        match self {
            Error::Invocation {
                status,
                status_text,
                body,
            } => json!({
                "error": self.kind(),
                "message": self.to_string(),
                "status": status,
                "statusText": status_text,
                "body": body,
            }),
            other => json!({
                "error": other.kind(),
                "message": other.to_string(),
            }),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
