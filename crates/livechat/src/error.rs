//! Live chat error types.

use std::fmt;

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, LiveChatError>;

/// Which session timer expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No verify acknowledgement within the verify window.
    Verify,
    /// The previous heartbeat was never acknowledged.
    Heartbeat,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verify => f.write_str("verify"),
            Self::Heartbeat => f.write_str("heartbeat"),
        }
    }
}

/// Errors that can occur while collecting live chat.
#[derive(Error, Debug)]
pub enum LiveChatError {
    /// Socket failure, or the socket closed underneath the session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The session config lookup (token + host) failed.
    #[error("Session config error: {0}")]
    SessionConfig(String),

    /// Short buffer, out-of-bounds chunk walk or unknown protocol tag.
    #[error("Malformed packet: {0}")]
    Framing(String),

    /// A compressed payload could not be inflated.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// A single chunk did not carry valid JSON.
    #[error("Invalid chunk JSON: {0}")]
    ChunkJson(#[source] serde_json::Error),

    /// A recognized notice is missing a field it must carry.
    #[error("Unexpected structure for {cmd}: {detail}")]
    StructuralMismatch { cmd: String, detail: String },

    /// Verify or heartbeat acknowledgement did not arrive in time.
    #[error("Session timeout: no {0} acknowledgement")]
    Timeout(TimeoutKind),

    /// The server answered the verify frame with a non-zero code.
    #[error("Verify rejected with code {0}")]
    VerifyRejected(i64),

    /// Invalid client configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LiveChatError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a session config error.
    pub fn session_config(msg: impl Into<String>) -> Self {
        Self::SessionConfig(msg.into())
    }

    /// Create a framing error.
    pub fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    /// Create a decompression error.
    pub fn decompression(msg: impl Into<String>) -> Self {
        Self::Decompression(msg.into())
    }

    /// Create a structural mismatch error for `cmd`.
    pub fn mismatch(cmd: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::StructuralMismatch {
            cmd: cmd.into(),
            detail: detail.into(),
        }
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error tears the session down and triggers a reconnect.
    ///
    /// Everything else is local to one buffer, chunk or notice.
    pub fn is_reconnect(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::SessionConfig(_)
                | Self::Timeout(_)
                | Self::VerifyRejected(_)
        )
    }
}
