//! Relay error taxonomy.
//!
//! Almost every error the relay produces is recovered locally: a malformed
//! frame is logged and dropped, an unauthorized dashboard write is refused,
//! a dead TPA socket only affects that TPA. [`RelayError::is_fatal`] marks
//! the few that must stop the process.

use thiserror::Error;

/// Errors raised while handling relay traffic.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A frame could not be parsed or is missing required fields.
    #[error("malformed message: {0}")]
    Protocol(String),

    /// The sender tried to act as someone else or use a privileged operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Credentials were rejected by the authenticator.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// No live session exists for the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A dashboard contribution was refused (oversized, no target modes).
    #[error("content rejected: {0}")]
    ContentRejected(String),

    /// The session actor is gone; commands can no longer be delivered.
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// Unrecoverable configuration problem detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether the process cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Short machine-readable code, used in error frames sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Protocol(_) | Self::Json(_) => "MALFORMED_MESSAGE",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Authentication(_) => "AUTHENTICATION_FAILED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::ContentRejected(_) => "CONTENT_REJECTED",
            Self::SessionClosed(_) => "SESSION_CLOSED",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
