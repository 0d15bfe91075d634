use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::server::envelope::ErrorEnvelope;

#[derive(Error, Debug)]
pub enum BridgeError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Runtime adapter errors
    #[error("Sandbox runtime '{backend}' is not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    #[error("Sandbox runtime API error: {message}")]
    RuntimeApi {
        message: String,
        status: Option<u16>,
    },

    // Sandbox errors
    #[error("Sandbox initialization failed: {0}")]
    SandboxInit(String),

    #[error("Command execution failed in sandbox: {0}")]
    SandboxExecution(String),

    #[error("Command `{command}` exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Dev server on port {port} was not ready after {waited_ms} ms")]
    ReadinessTimeout { port: u16, waited_ms: u64 },

    // Session errors
    #[error("No active sandbox. Create one with /sandbox/create first.")]
    NoActiveSession,

    #[error("Session expired: {id}")]
    SessionExpired { id: String },

    // Request errors
    #[error("Invalid request: {0}")]
    Validation(String),

    // Proxy errors
    #[error("Worker response not ok: {status}")]
    UpstreamStatus { status: u16 },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    /// HTTP status the orchestrator answers with for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NoActiveSession | Self::SessionExpired { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error followed by its source chain, one cause per line.
    pub fn details(&self) -> String {
        let mut details = format!("{:?}", self);
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            details.push_str(&format!("\ncaused by: {}", cause));
            source = cause.source();
        }
        details
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorEnvelope::with_details(self.to_string(), self.details());
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
