//! Session state and the events broadcast to observers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection lifecycle of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    /// Fetching the session config and opening the transport.
    Connecting,
    /// Verify frame sent, waiting for its acknowledgement.
    AwaitingVerify,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingVerify => "awaiting_verify",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Out-of-band notifications about the session, separate from chat items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        state: SessionState,
    },
    /// A recoverable error. `reconnect` tells whether it tore the session down.
    Error {
        message: String,
        reconnect: bool,
    },
    /// A reconnect is scheduled after `delay_ms`.
    Reconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    /// Room popularity carried by heartbeat acknowledgements.
    Popularity {
        value: u32,
    },
}

impl SessionEvent {
    pub fn state(state: SessionState) -> Self {
        Self::StateChanged { state }
    }

    pub(crate) fn error(err: &crate::LiveChatError) -> Self {
        Self::Error {
            message: err.to_string(),
            reconnect: err.is_reconnect(),
        }
    }
}
