use std::path::PathBuf;

use thiserror::Error;

/// Top-level client error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Transport / API errors ───────────────────────────────────────────────
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Server error {status}: {message}")]
    BackendStatus { status: u16, message: String },

    #[error("{message}")]
    Backend { message: String },

    #[error("Failed to decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    // ── Ledger errors ────────────────────────────────────────────────────────
    #[error("Ledger I/O failed at '{}': {source}", path.display())]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger file '{}' is corrupt: {source}", path.display())]
    LedgerCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Session store errors ─────────────────────────────────────────────────
    #[error("Chat '{id}' not found")]
    ChatNotFound { id: String },

    #[error("Chat '{chat_id}' already has a pending message")]
    PendingMessageExists { chat_id: String },

    #[error("Chat '{chat_id}' has no pending message")]
    NoPendingMessage { chat_id: String },

    #[error("Chat '{chat_id}' is streaming and cannot be deleted")]
    ChatStreaming { chat_id: String },

    // ── Stream errors ────────────────────────────────────────────────────────
    #[error("Stream protocol error: {message}")]
    Protocol { message: String },

    #[error("Stream closed before completion")]
    StreamClosed,

    #[error("Session recovery already ran")]
    AlreadyBootstrapped,

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("A request is already in flight")]
    RequestInFlight,

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn decode(what: &'static str, source: serde_json::Error) -> Self {
        AppError::Decode { what, source }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        AppError::Protocol { message: message.into() }
    }

    pub fn chat_not_found(id: &str) -> Self {
        AppError::ChatNotFound { id: id.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::ChatNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::EmptyField { .. } | AppError::RequestInFlight)
    }

    /// Errors that a reconnect may cure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AppError::Network(_) | AppError::BackendStatus { .. } | AppError::StreamClosed
        )
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        AppError::Network(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_classified() {
        let empty = AppError::EmptyField { field_name: "message".into() };
        assert!(empty.is_validation());
        assert!(AppError::RequestInFlight.is_validation());
        assert!(!AppError::AlreadyBootstrapped.is_validation());
        assert_eq!(empty.to_string(), "Field 'message' cannot be empty");
    }

    #[test]
    fn status_errors_are_transport() {
        let err = AppError::BackendStatus { status: 502, message: "bad gateway".into() };
        assert!(err.is_transport());
        assert!(!AppError::protocol("no control").is_transport());
        assert!(AppError::chat_not_found("c1").is_not_found());
    }
}
