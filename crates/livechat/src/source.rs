//! Where the session gets its auth token and socket URL.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{LiveChatError, Result};
use crate::transport::DEFAULT_UA;

pub const DEFAULT_API_BASE: &str = "https://api.live.bilibili.com";

/// Token and socket URL for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub token: String,
    pub url: String,
}

/// Looked up once per (re)connect attempt; tokens are not reused.
#[async_trait]
pub trait SessionConfigSource: Send + Sync {
    async fn session_config(&self, room_id: u64) -> Result<SessionConfig>;
}

/// Always hands out the same token and URL.
#[derive(Debug, Clone)]
pub struct StaticSessionConfigSource {
    config: SessionConfig,
}

impl StaticSessionConfigSource {
    pub fn new(token: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            config: SessionConfig {
                token: token.into(),
                url: url.into(),
            },
        }
    }
}

#[async_trait]
impl SessionConfigSource for StaticSessionConfigSource {
    async fn session_config(&self, _room_id: u64) -> Result<SessionConfig> {
        Ok(self.config.clone())
    }
}

#[derive(Debug, Deserialize)]
struct GetConfResponse {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<GetConfData>,
}

#[derive(Debug, Deserialize)]
struct GetConfData {
    #[serde(default)]
    token: String,
    #[serde(default)]
    host_server_list: Vec<HostServer>,
}

#[derive(Debug, Deserialize)]
struct HostServer {
    host: String,
    wss_port: u16,
}

/// Queries the platform's `getConf` API.
#[derive(Debug, Clone)]
pub struct HttpSessionConfigSource {
    client: reqwest::Client,
    api_base: Url,
}

impl HttpSessionConfigSource {
    pub fn new(api_base: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_UA)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LiveChatError::config(format!("failed to build http client: {e}")))?;
        Self::with_client(client, api_base)
    }

    pub fn with_client(client: reqwest::Client, api_base: &str) -> Result<Self> {
        let api_base = Url::parse(api_base)
            .map_err(|e| LiveChatError::config(format!("invalid api base {api_base}: {e}")))?;
        Ok(Self { client, api_base })
    }

    fn conf_url(&self, room_id: u64) -> Result<Url> {
        let mut url = self
            .api_base
            .join("room/v1/Danmu/getConf")
            .map_err(|e| LiveChatError::config(format!("invalid api base: {e}")))?;
        url.query_pairs_mut()
            .append_pair("room_id", &room_id.to_string());
        Ok(url)
    }
}

#[async_trait]
impl SessionConfigSource for HttpSessionConfigSource {
    async fn session_config(&self, room_id: u64) -> Result<SessionConfig> {
        let url = self.conf_url(room_id)?;
        debug!("getConf URL: {}", url);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, "https://live.bilibili.com")
            .send()
            .await
            .map_err(|e| LiveChatError::session_config(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LiveChatError::session_config(format!(
                "getConf returned HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| LiveChatError::session_config(format!("failed to read response: {e}")))?;
        parse_conf(&body)
    }
}

/// Extract token and socket URL from a `getConf` response body.
fn parse_conf(body: &str) -> Result<SessionConfig> {
    let resp: GetConfResponse = serde_json::from_str(body)
        .map_err(|e| LiveChatError::session_config(format!("invalid JSON: {e}")))?;

    if resp.code != 0 {
        return Err(LiveChatError::session_config(format!(
            "getConf returned code {}: {}",
            resp.code, resp.message
        )));
    }

    let data = resp
        .data
        .ok_or_else(|| LiveChatError::session_config("missing data"))?;
    if data.token.is_empty() {
        return Err(LiveChatError::session_config("missing token"));
    }
    let host = data
        .host_server_list
        .first()
        .ok_or_else(|| LiveChatError::session_config("empty host_server_list"))?;

    Ok(SessionConfig {
        url: format!("wss://{}:{}/sub", host.host, host.wss_port),
        token: data.token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_conf() {
        let body = r#"{
            "code": 0,
            "msg": "ok",
            "message": "ok",
            "data": {
                "refresh_row_factor": 0.125,
                "refresh_rate": 100,
                "max_delay": 5000,
                "port": 2243,
                "host": "broadcastlv.chat.bilibili.com",
                "host_server_list": [
                    {"host": "hw-sh-live-comet-05.chat.bilibili.com", "port": 2243, "wss_port": 443, "ws_port": 2244},
                    {"host": "broadcastlv.chat.bilibili.com", "port": 2243, "wss_port": 443, "ws_port": 2244}
                ],
                "token": "abc=="
            }
        }"#;

        assert_eq!(
            parse_conf(body).unwrap(),
            SessionConfig {
                token: "abc==".to_string(),
                url: "wss://hw-sh-live-comet-05.chat.bilibili.com:443/sub".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_conf_errors() {
        let err = parse_conf(r#"{"code": -400, "message": "bad room"}"#).unwrap_err();
        assert!(matches!(err, LiveChatError::SessionConfig(_)));
        assert!(err.is_reconnect());

        assert!(parse_conf(r#"{"code": 0, "data": {"host_server_list": [{"host": "h", "wss_port": 1}]}}"#).is_err());
        assert!(parse_conf(r#"{"code": 0, "data": {"token": "t", "host_server_list": []}}"#).is_err());
        assert!(parse_conf("<html>").is_err());
    }

    #[test]
    fn test_conf_url() {
        let source = HttpSessionConfigSource::new(DEFAULT_API_BASE).unwrap();
        assert_eq!(
            source.conf_url(5050).unwrap().as_str(),
            "https://api.live.bilibili.com/room/v1/Danmu/getConf?room_id=5050"
        );
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticSessionConfigSource::new("t", "wss://example.com/sub");
        let config = source.session_config(1).await.unwrap();
        assert_eq!(config.token, "t");
        assert_eq!(config.url, "wss://example.com/sub");
    }
}
