//! Typed error taxonomy surfaced to callers of the core.
//!
//! Every layer, including the CLI front-end, propagates this type directly
//! so the orchestrator and retry wrapper can distinguish kinds without
//! string matching wherever a typed source is available.

use std::time::SystemTime;

use thiserror::Error;

/// One variant per distinct failure kind callers need to branch on.
#[derive(Debug, Error)]
pub enum GzhError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("circular dependency via edge {from} -> {to}")]
    CircularDependency { from: String, to: String },

    #[error("authentication required: {guidance}")]
    AuthRequired { guidance: String },

    #[error("authentication denied: {guidance}")]
    AuthDenied { guidance: String },

    #[error("rate limited, resets at {reset:?}")]
    RateLimited { reset: SystemTime },

    #[error("network error: {0}")]
    Network(String),

    #[error("git exited {exit}: {stderr_tail}")]
    GitFailure { exit: i32, stderr_tail: String },

    #[error("invalid git command: {0}")]
    InvalidCommand(String),

    #[error("worker pool queue is full")]
    QueueFull,

    #[error("shutdown did not complete within the configured timeout")]
    ShutdownTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("state invariant broken on load: {0} (state file likely needs a rebuild)")]
    InternalInvariant(String),

    #[error("{0}")]
    PartialFailure(String),
}

impl GzhError {
    /// Whether the retry wrapper should attempt this error again.
    ///
    /// Network and rate-limit errors recover locally; everything else is
    /// surfaced to the caller unchanged.
    pub fn retryable(&self) -> bool {
        matches!(self, GzhError::Network(_) | GzhError::RateLimited { .. })
    }

    /// Exit code mapping for the CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            GzhError::Cancelled => 3,
            GzhError::ConfigInvalid(_)
            | GzhError::CircularDependency { .. }
            | GzhError::InvalidCommand(_) => 2,
            _ => 1,
        }
    }
}

/// Patterns recognized as retryable network failures when only the error's
/// text is available (subprocess stderr, a stringified HTTP client error).
const RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "timeout",
    "timed out",
    "temporary failure",
    "network unreachable",
    "no such host",
    "connection reset",
    "broken pipe",
];

/// Text-based retryability classification used by the Repository Pool's
/// retry wrapper for errors that only exist as rendered strings.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

pub type Result<T> = std::result::Result<T, GzhError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_messages_match_known_patterns() {
        assert!(is_retryable_message("Connection refused (os error 111)"));
        assert!(is_retryable_message("dial tcp: i/o timeout"));
        assert!(is_retryable_message("dns error: no such host"));
        assert!(is_retryable_message("write: broken pipe"));
    }

    #[test]
    fn non_retryable_messages_are_rejected() {
        assert!(!is_retryable_message("fatal: pathspec did not match any files"));
        assert!(!is_retryable_message("permission denied (publickey)"));
    }

    #[test]
    fn exit_codes_distinguish_cancelled_usage_and_runtime_errors() {
        assert_eq!(GzhError::Cancelled.exit_code(), 3);
        assert_eq!(GzhError::ConfigInvalid("x".into()).exit_code(), 2);
        assert_eq!(GzhError::QueueFull.exit_code(), 1);
    }

    #[test]
    fn partial_failure_is_distinct_from_configuration_error() {
        assert_eq!(GzhError::PartialFailure("3 repositories failed".into()).exit_code(), 1);
        assert_eq!(GzhError::ConfigInvalid("bad yaml".into()).exit_code(), 2);
    }
}
