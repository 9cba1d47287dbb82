//! Byte transport under the session.
//!
//! The session only needs "send a frame", "next inbound buffer" and
//! "close". [`WebSocketConnector`] provides that over tokio-tungstenite;
//! tests substitute in-memory stubs.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

use crate::error::{LiveChatError, Result};

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const ORIGIN: &str = "https://live.bilibili.com";

/// One open connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Next inbound buffer. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<Bytes>>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens transports. One call per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

/// Connects over WebSocket with browser-like headers.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    headers: Vec<(String, String)>,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self {
            headers: vec![
                ("User-Agent".to_string(), DEFAULT_UA.to_string()),
                ("Origin".to_string(), ORIGIN.to_string()),
                ("Referer".to_string(), ORIGIN.to_string()),
            ],
        }
    }
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a handshake header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let parsed = Url::parse(url)
            .map_err(|e| LiveChatError::transport(format!("invalid url {url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(LiveChatError::transport(format!(
                "unsupported scheme {} in {url}",
                parsed.scheme()
            )));
        }

        let mut request = url
            .into_client_request()
            .map_err(|e| LiveChatError::transport(format!("failed to build request: {e}")))?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| LiveChatError::transport(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| LiveChatError::transport(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        debug!("Connecting to WebSocket: {}", url);
        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| LiveChatError::transport(format!("connect failed: {e}")))?;

        Ok(Box::new(WebSocketTransport { stream }))
    }
}

pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        self.stream
            .send(Message::Binary(frame))
            .await
            .map_err(|e| LiveChatError::transport(format!("send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<Bytes>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Binary(data)) => return Some(Ok(data)),
                Ok(Message::Text(text)) => {
                    // the server only speaks binary frames
                    debug!("Ignoring text message: {}", text.as_str());
                }
                Ok(Message::Close(frame)) => {
                    debug!("WebSocket closed by peer: {:?}", frame);
                    return None;
                }
                Ok(other) => trace!("Ignoring control message: {:?}", other),
                Err(e) => {
                    return Some(Err(LiveChatError::transport(format!(
                        "WebSocket error: {e}"
                    ))));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| LiveChatError::transport(format!("close failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers() {
        let connector = WebSocketConnector::new();
        let names: Vec<_> = connector.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["User-Agent", "Origin", "Referer"]);
    }

    #[test]
    fn test_with_header_replaces() {
        let connector = WebSocketConnector::new().with_header("user-agent", "custom");
        assert_eq!(connector.headers.len(), 3);
        assert!(connector.headers.contains(&("user-agent".to_string(), "custom".to_string())));
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_url() {
        let result = WebSocketConnector::new().connect("https://example.com/sub").await;
        assert!(matches!(result, Err(LiveChatError::Transport(_))));

        let result = WebSocketConnector::new().connect("not a url").await;
        assert!(matches!(result, Err(LiveChatError::Transport(_))));
    }
}
