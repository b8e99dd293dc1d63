//! Error types for Estimate Assist.

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-fetch errors (Confluence pages, Jira issues).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Could not extract a Confluence page id or Jira issue key from URL: {url}")]
    UnrecognizedUrl { url: String },

    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Fetch of {url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Unexpected response body from {url}: {reason}")]
    InvalidBody { url: String, reason: String },

    #[error(
        "Content source is not configured (set ATLASSIAN_URL, ATLASSIAN_USER_EMAIL, ATLASSIAN_API_TOKEN)"
    )]
    NotConfigured,
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Generated estimate contains no parseable total weeks value")]
    NoParseableTotal,
}

/// Artifact store errors.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact {kind} not found for item {name} in session {session_id}")]
    NotFound {
        session_id: Uuid,
        name: String,
        kind: String,
    },

    #[error("Invalid item name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session and batch-submission errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {0} not found")]
    NotFound(Uuid),

    #[error("Invalid batch request: {0}")]
    Validation(String),

    #[error("Item {name} not found in session {session_id}")]
    ItemNotFound { session_id: Uuid, name: String },
}

/// Page-export errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Destination already has a page titled {title}")]
    Conflict { title: String },

    #[error("Could not resolve export destination {destination}: {reason}")]
    BadDestination { destination: String, reason: String },

    #[error("Export request failed: {reason}")]
    RequestFailed { reason: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
