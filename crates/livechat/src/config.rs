//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LiveChatError, Result};

/// Tunables for one [`ChatClient`](crate::ChatClient).
///
/// Every field has a default, so a partial TOML table deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Time allowed for the verify acknowledgement after the socket opens.
    pub verify_timeout_secs: u64,
    /// Heartbeat period once the session is active.
    pub heartbeat_interval_secs: u64,
    /// `protover` sent in the verify frame; 3 asks the server for brotli.
    pub protocol_version: u16,
    pub platform: String,
    /// `type` sent in the verify frame.
    pub auth_type: u8,
    /// Only sent when set. Must match the account the token was issued to.
    pub uid: Option<u64>,
    /// Heartbeat body. The server ignores it but rejects empty heartbeats.
    pub heartbeat_payload: String,
    /// First reconnect delay; doubles per failed attempt. 0 retries at once.
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub item_channel_capacity: usize,
    pub event_channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            verify_timeout_secs: 20,
            heartbeat_interval_secs: 30,
            protocol_version: 3,
            platform: "web".to_string(),
            auth_type: 2,
            uid: None,
            heartbeat_payload: "[object Object]".to_string(),
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60000,
            item_channel_capacity: 1024,
            event_channel_capacity: 64,
        }
    }
}

impl ClientConfig {
    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Reject values that would stall or spin the session.
    pub fn validate(&self) -> Result<()> {
        if self.verify_timeout_secs == 0 {
            return Err(LiveChatError::config("verify_timeout_secs must be > 0"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(LiveChatError::config("heartbeat_interval_secs must be > 0"));
        }
        if self.heartbeat_payload.is_empty() {
            return Err(LiveChatError::config("heartbeat_payload must not be empty"));
        }
        if self.item_channel_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(LiveChatError::config("channel capacities must be > 0"));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(LiveChatError::config(
                "reconnect_max_delay_ms must be >= reconnect_base_delay_ms",
            ));
        }
        Ok(())
    }
}
