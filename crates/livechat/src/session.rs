//! Session state machine.
//!
//! [`Session`] holds no I/O and no timers. The runner feeds it transport
//! events and timer ticks, and sends whatever frames it returns. This keeps
//! the protocol rules (verify before data, heartbeat acknowledgement before
//! the next heartbeat) testable without a socket.

use bytes::{Buf, Bytes};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, trace};

use crate::codec::{self, VerifyPayload, op};
use crate::config::ClientConfig;
use crate::error::{LiveChatError, Result, TimeoutKind};
use crate::event::SessionState;

/// What one inbound buffer produced.
#[derive(Debug, Default)]
pub struct Inbound {
    /// Data notices in wire order.
    pub notices: Vec<Value>,
    /// This buffer carried an accepted verify acknowledgement.
    pub verified: bool,
    /// Latest popularity value from a heartbeat acknowledgement.
    pub popularity: Option<u32>,
    /// Problems local to this buffer. The session stays up.
    pub errors: Vec<LiveChatError>,
}

#[derive(Debug, Deserialize)]
struct VerifyReply {
    #[serde(default)]
    code: i64,
}

/// Protocol state of one connection attempt.
#[derive(Debug)]
pub struct Session {
    room_id: u64,
    state: SessionState,
    heartbeat_acked: bool,
    protocol_version: u16,
    platform: String,
    auth_type: u8,
    uid: Option<u64>,
    heartbeat_payload: Bytes,
}

impl Session {
    pub fn new(room_id: u64, config: &ClientConfig) -> Self {
        Self {
            room_id,
            state: SessionState::Idle,
            heartbeat_acked: true,
            protocol_version: config.protocol_version,
            platform: config.platform.clone(),
            auth_type: config.auth_type,
            uid: config.uid,
            heartbeat_payload: Bytes::from(config.heartbeat_payload.clone().into_bytes()),
        }
    }

    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Enter `Connecting`. Acknowledgement tracking starts over.
    pub fn begin_connect(&mut self) {
        self.state = SessionState::Connecting;
        self.heartbeat_acked = true;
    }

    /// The transport is open: returns the verify frame to send.
    pub fn on_transport_open(&mut self, token: &str) -> Result<Bytes> {
        let frame = codec::verify_frame(&VerifyPayload {
            uid: self.uid,
            roomid: self.room_id,
            protover: self.protocol_version,
            platform: &self.platform,
            auth_type: self.auth_type,
            key: token,
        })?;
        self.state = SessionState::AwaitingVerify;
        debug!("Sending verify frame for room {}", self.room_id);
        Ok(frame)
    }

    /// Heartbeat timer fired: returns the heartbeat frame, or a timeout if
    /// the previous heartbeat was never acknowledged.
    pub fn on_heartbeat_tick(&mut self) -> Result<Bytes> {
        if !self.heartbeat_acked {
            return Err(LiveChatError::Timeout(TimeoutKind::Heartbeat));
        }
        self.heartbeat_acked = false;
        trace!("Sending heartbeat for room {}", self.room_id);
        Ok(codec::heartbeat_frame(&self.heartbeat_payload))
    }

    /// Whether the last heartbeat has been acknowledged.
    pub fn heartbeat_acked(&self) -> bool {
        self.heartbeat_acked
    }

    pub fn begin_close(&mut self) {
        self.state = SessionState::Closing;
    }

    pub fn finish_close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Route every chunk of one inbound buffer.
    ///
    /// Control chunks update the session; data chunks come back as parsed
    /// notices. Only a rejected verify is returned as `Err`.
    pub fn handle_buffer(&mut self, buf: Bytes) -> Result<Inbound> {
        let mut inbound = Inbound::default();

        let decoded = match codec::decode(buf) {
            Ok(decoded) => decoded,
            Err(e) => {
                inbound.errors.push(e);
                return Ok(inbound);
            }
        };

        for chunk in decoded.chunks {
            match chunk.operation {
                op::HEARTBEAT_REPLY => {
                    self.heartbeat_acked = true;
                    let mut payload = chunk.payload;
                    if payload.len() >= 4 {
                        inbound.popularity = Some(payload.get_u32());
                    }
                    trace!("Heartbeat acknowledged for room {}", self.room_id);
                }
                op::AUTH_REPLY => match serde_json::from_slice::<VerifyReply>(&chunk.payload) {
                    Ok(reply) if reply.code != 0 => {
                        return Err(LiveChatError::VerifyRejected(reply.code));
                    }
                    Ok(_) if self.state == SessionState::AwaitingVerify => {
                        self.state = SessionState::Active;
                        self.heartbeat_acked = true;
                        inbound.verified = true;
                        info!("Verified for room {}", self.room_id);
                    }
                    Ok(_) => debug!("Ignoring verify acknowledgement in state {}", self.state),
                    Err(e) => inbound.errors.push(LiveChatError::ChunkJson(e)),
                },
                op::NOTIFICATION => match serde_json::from_slice::<Value>(&chunk.payload) {
                    Ok(notice) => inbound.notices.push(notice),
                    Err(e) => inbound.errors.push(LiveChatError::ChunkJson(e)),
                },
                other => debug!("Skipping chunk with operation {}", other),
            }
        }

        inbound.errors.extend(decoded.malformed);
        Ok(inbound)
    }
}
