//! Livechat: client for the Bilibili live chat broadcast protocol.
//!
//! Keeps one connection to a room's chat feed alive, decodes the binary
//! frame protocol and turns server notices into typed [`ChatItem`]s.
//!
//! ## Pipeline
//!
//! - [`codec`] - 16-byte frame header, zlib/brotli payloads, chunk walking
//! - [`Session`] - verify handshake and heartbeat acknowledgement rules
//! - [`classify`] - notice `cmd` to [`ChatItem`], with [`ClassifierStats`]
//! - [`TimeInferenceQueue`] - lends timestamps to untimed items
//!
//! ## Running
//!
//! - [`ChatClient`] - start/stop, item channel and [`SessionEvent`]s
//! - [`SessionConfigSource`] - token and socket URL lookup
//! - [`Connector`] / [`Transport`] - the socket, WebSocket by default

pub mod classifier;
mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod inference;
pub mod item;
mod runner;
pub mod session;
pub mod source;
pub mod transport;

pub use classifier::{ClassifierStats, IGNORED_COMMANDS, classify};
pub use client::{ChatClient, ChatClientBuilder};
pub use config::ClientConfig;
pub use error::{LiveChatError, Result, TimeoutKind};
pub use event::{SessionEvent, SessionState};
pub use inference::TimeInferenceQueue;
pub use item::{
    ChatItem, Counter, CounterItem, EntryItem, GiftItem, GuardPurchaseItem, LifecycleItem,
    LivePhase, MemberBadge, MessageItem,
};
pub use session::{Inbound, Session};
pub use source::{
    DEFAULT_API_BASE, HttpSessionConfigSource, SessionConfig, SessionConfigSource,
    StaticSessionConfigSource,
};
pub use transport::{Connector, Transport, WebSocketConnector};
