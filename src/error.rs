//! Error types for the callflow relay

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the call relay
#[derive(Debug, Error)]
pub enum Error {
    /// Fatal configuration error (missing credentials, invalid provider chain).
    /// Sessions fail to start on this; it is reported once and never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transient provider failure; triggers failover to the next ranked provider
    #[error("provider {provider} failed: {message}")]
    Provider {
        /// Provider id that failed
        provider: String,
        /// Underlying failure description
        message: String,
    },

    /// A pipeline stage exceeded its latency budget. Treated as transient.
    #[error("{stage} exceeded latency budget of {budget_ms}ms")]
    Timeout {
        /// Pipeline stage that overran
        stage: &'static str,
        /// Configured budget in milliseconds
        budget_ms: u64,
    },

    /// Inbound frame that could not be parsed. Logged and ignored,
    /// never tears down the session.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Message referenced a session that does not exist. Late frames for a
    /// just-closed session are dropped silently at the transport boundary.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but is shutting down and no longer accepts input
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// Outbound channel to the caller has gone away
    #[error("channel error: {0}")]
    Channel(String),

    /// Workflow definition could not be loaded
    #[error("workflow error: {0}")]
    Workflow(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this failure should cascade down the failover chain
    /// rather than surface immediately
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::Timeout { .. } | Self::Http(_)
        )
    }
}
