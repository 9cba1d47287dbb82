//! Public entry point: one [`ChatClient`] per room.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::classifier::ClassifierStats;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::event::SessionEvent;
use crate::item::ChatItem;
use crate::runner::Runner;
use crate::source::{DEFAULT_API_BASE, HttpSessionConfigSource, SessionConfigSource};
use crate::transport::{Connector, WebSocketConnector};

/// The background task of a started client.
struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    room_id: u64,
    config: Arc<ClientConfig>,
    source: Arc<dyn SessionConfigSource>,
    connector: Arc<dyn Connector>,
    items_tx: mpsc::Sender<ChatItem>,
    items_rx: Mutex<Option<mpsc::Receiver<ChatItem>>>,
    events: broadcast::Sender<SessionEvent>,
    stats: Arc<Mutex<ClassifierStats>>,
    /// Serializes start/stop.
    running: AsyncMutex<Option<Running>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

/// Live chat client for a single room.
///
/// Cloning is cheap and every clone controls the same session. At most one
/// transport is live at a time.
///
/// ```no_run
/// # async fn example() -> livechat::Result<()> {
/// let client = livechat::ChatClient::new(21452505, livechat::ClientConfig::default())?;
/// let mut items = client.take_items().expect("items not taken yet");
/// client.start().await;
/// while let Some(item) = items.recv().await {
///     println!("{item:?}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<Inner>,
}

impl ChatClient {
    /// Client using the platform's HTTP API and a WebSocket transport.
    pub fn new(room_id: u64, config: ClientConfig) -> Result<Self> {
        Self::builder(room_id).config(config).build()
    }

    pub fn builder(room_id: u64) -> ChatClientBuilder {
        ChatClientBuilder {
            room_id,
            config: ClientConfig::default(),
            source: None,
            connector: None,
        }
    }

    pub fn room_id(&self) -> u64 {
        self.inner.room_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The item stream. Can be taken once; items survive restarts.
    pub fn take_items(&self) -> Option<mpsc::Receiver<ChatItem>> {
        self.inner.items_rx.lock().take()
    }

    /// State transitions and recoverable errors.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Classification counters since the client was built.
    pub fn stats(&self) -> ClassifierStats {
        *self.inner.stats.lock()
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Start collecting. A running session is fully stopped first.
    pub async fn start(&self) {
        let mut running = self.inner.running.lock().await;
        if let Some(previous) = running.take() {
            debug!("Restarting room {}", self.inner.room_id);
            shutdown(previous).await;
        }

        let cancel = CancellationToken::new();
        let runner = Runner {
            room_id: self.inner.room_id,
            config: Arc::clone(&self.inner.config),
            source: Arc::clone(&self.inner.source),
            connector: Arc::clone(&self.inner.connector),
            items: self.inner.items_tx.clone(),
            events: self.inner.events.clone(),
            stats: Arc::clone(&self.inner.stats),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(runner.run());
        *running = Some(Running { cancel, handle });
    }

    /// Stop collecting and wait until the transport is closed.
    ///
    /// Idempotent; returns at once when nothing is running.
    pub async fn stop(&self) {
        let mut running = self.inner.running.lock().await;
        if let Some(running) = running.take() {
            shutdown(running).await;
        }
    }
}

async fn shutdown(running: Running) {
    running.cancel.cancel();
    if let Err(e) = running.handle.await {
        warn!("Live chat task ended abnormally: {}", e);
    }
}

/// Builder for [`ChatClient`] with pluggable session config source and
/// transport.
pub struct ChatClientBuilder {
    room_id: u64,
    config: ClientConfig,
    source: Option<Arc<dyn SessionConfigSource>>,
    connector: Option<Arc<dyn Connector>>,
}

impl ChatClientBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source(mut self, source: impl SessionConfigSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn build(self) -> Result<ChatClient> {
        self.config.validate()?;

        let source = match self.source {
            Some(source) => source,
            None => Arc::new(HttpSessionConfigSource::new(DEFAULT_API_BASE)?),
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::new()));

        let (items_tx, items_rx) = mpsc::channel(self.config.item_channel_capacity);
        let (events, _) = broadcast::channel(self.config.event_channel_capacity);

        Ok(ChatClient {
            inner: Arc::new(Inner {
                room_id: self.room_id,
                config: Arc::new(self.config),
                source,
                connector,
                items_tx,
                items_rx: Mutex::new(Some(items_rx)),
                events,
                stats: Arc::new(Mutex::new(ClassifierStats::default())),
                running: AsyncMutex::new(None),
            }),
        })
    }
}
