//! Error types for the responder.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration-related errors. Always fatal, and only raised at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Inbox provider errors (scan, fetch, send).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Channel {name} failed to fetch {target}: {reason}")]
    FetchFailed {
        name: String,
        target: String,
        reason: String,
    },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid response from channel {name}: {reason}")]
    InvalidResponse { name: String, reason: String },

    #[error("Channel {name} rejected {method} ({code}): {reason}")]
    Rejected {
        name: String,
        method: String,
        code: i64,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Completion provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited: {reason}")]
    RateLimited { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Dedup store write errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize seen set: {0}")]
    Serialize(#[from] serde_json::Error),
}
