use std::time::Duration;
use thiserror::Error;

use crate::types::Run;

/// Errors produced by the engine and its components.
#[derive(Error, Debug)]
pub enum FlowError {
    /// A chat payload failed pre-flight validation. Nothing was sent.
    ///
    /// `status` is the HTTP-style status a caller-facing surface should use
    /// (413 for oversized bodies, 400 otherwise).
    #[error("Invalid request ({status}): {message}")]
    Validation { status: u16, message: String },

    /// The backend answered with a non-success status code.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code (e.g. 401, 429, 500).
        status: u16,
        /// Response body text, truncated.
        body: String,
    },

    /// Network failure while connecting or reading (refused, reset, timeout).
    #[error("Network error: {0}")]
    Transport(String),

    /// Low-level HTTP client failure.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation was cancelled through its cancellation token.
    #[error("Operation was cancelled")]
    Cancelled,

    /// The pipeline graph contains a cycle. No node was started.
    ///
    /// `run` carries the per-node states with every offending node marked
    /// as errored, so callers can surface them.
    #[error("Cycle detected between nodes: {}", nodes.join(", "))]
    Cycle { nodes: Vec<String>, run: Box<Run> },

    /// The pipeline definition is structurally invalid (duplicate ids,
    /// dangling edges).
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// Invalid configuration detected at build or load time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The credential store has no secret for the provider.
    #[error("No credential configured for provider '{0}'")]
    MissingCredential(String),

    /// A correlated call received no answer in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// Shorthand for a 400 validation failure.
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        FlowError::Validation {
            status: 400,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        FlowError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
