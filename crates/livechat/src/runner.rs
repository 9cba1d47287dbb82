//! The task that drives one client: connect, verify, heartbeat, classify,
//! and reconnect until cancelled.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::classifier::{ClassifierStats, classify};
use crate::config::ClientConfig;
use crate::error::{LiveChatError, TimeoutKind};
use crate::event::{SessionEvent, SessionState};
use crate::inference::TimeInferenceQueue;
use crate::item::ChatItem;
use crate::session::Session;
use crate::source::SessionConfigSource;
use crate::transport::{Connector, Transport};

/// Upper bound on a graceful transport close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How one connection attempt ended.
enum Outcome {
    /// Stop requested, or nobody is listening for items any more.
    Stopped,
    /// Tear down and reconnect.
    Failed(LiveChatError),
}

/// Exponential reconnect delay, reset once a session becomes active.
#[derive(Debug)]
struct Backoff {
    base_ms: u64,
    max_ms: u64,
    next_ms: u64,
    attempt: u32,
}

impl Backoff {
    fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            next_ms: base_ms,
            attempt: 0,
        }
    }

    fn next_delay(&mut self) -> (u32, Duration) {
        let delay = self.next_ms;
        self.attempt += 1;
        self.next_ms = self.next_ms.saturating_mul(2).min(self.max_ms);
        (self.attempt, Duration::from_millis(delay))
    }

    fn reset(&mut self) {
        self.next_ms = self.base_ms;
        self.attempt = 0;
    }
}

pub(crate) struct Runner {
    pub(crate) room_id: u64,
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) source: Arc<dyn SessionConfigSource>,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) items: mpsc::Sender<ChatItem>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) stats: Arc<Mutex<ClassifierStats>>,
    pub(crate) cancel: CancellationToken,
}

impl Runner {
    pub(crate) async fn run(self) {
        let mut session = Session::new(self.room_id, &self.config);
        let mut queue = TimeInferenceQueue::new();
        let mut backoff = Backoff::new(
            self.config.reconnect_base_delay_ms,
            self.config.reconnect_max_delay_ms,
        );

        info!("Starting live chat for room {}", self.room_id);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            session.begin_connect();
            self.emit_state(SessionState::Connecting);

            let err = match self.connect_and_drive(&mut session, &mut queue, &mut backoff).await {
                Outcome::Stopped => break,
                Outcome::Failed(err) => err,
            };

            warn!("Session for room {} failed: {}", self.room_id, err);
            self.emit(SessionEvent::error(&err));

            let (attempt, delay) = backoff.next_delay();
            info!(
                "Reconnecting room {} in {:?} (attempt {})",
                self.room_id, delay, attempt
            );
            self.emit(SessionEvent::Reconnecting {
                attempt,
                delay_ms: delay.as_millis() as u64,
            });

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        session.begin_close();
        self.emit_state(SessionState::Closing);
        if !queue.is_empty() {
            debug!(
                "Dropping {} item(s) still waiting for a timestamp",
                queue.len()
            );
        }
        session.finish_close();
        self.emit_state(SessionState::Closed);
        info!("Live chat for room {} stopped", self.room_id);
    }

    async fn connect_and_drive(
        &self,
        session: &mut Session,
        queue: &mut TimeInferenceQueue,
        backoff: &mut Backoff,
    ) -> Outcome {
        let lookup = tokio::select! {
            _ = self.cancel.cancelled() => return Outcome::Stopped,
            lookup = self.source.session_config(self.room_id) => lookup,
        };
        let conf = match lookup {
            Ok(conf) => conf,
            Err(e) => return Outcome::Failed(e),
        };

        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return Outcome::Stopped,
            connected = self.connector.connect(&conf.url) => connected,
        };
        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => return Outcome::Failed(e),
        };
        info!("Connected to {} for room {}", conf.url, self.room_id);

        let outcome = match session.on_transport_open(&conf.token) {
            Ok(frame) => {
                let limit = self.config.verify_timeout();
                match self.send_frame(transport.as_mut(), frame, limit, TimeoutKind::Verify).await {
                    Ok(()) => {
                        self.emit_state(SessionState::AwaitingVerify);
                        self.drive(session, queue, backoff, transport.as_mut()).await
                    }
                    Err(outcome) => outcome,
                }
            }
            Err(e) => Outcome::Failed(e),
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error closing transport: {}", e),
            Err(_) => debug!("Transport for room {} did not close in time", self.room_id),
        }
        outcome
    }

    async fn drive(
        &self,
        session: &mut Session,
        queue: &mut TimeInferenceQueue,
        backoff: &mut Backoff,
        transport: &mut dyn Transport,
    ) -> Outcome {
        let verify_deadline = tokio::time::sleep(self.config.verify_timeout());
        tokio::pin!(verify_deadline);
        let mut heartbeat: Option<Interval> = None;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Outcome::Stopped,

                _ = &mut verify_deadline, if session.state() == SessionState::AwaitingVerify => {
                    return Outcome::Failed(LiveChatError::Timeout(TimeoutKind::Verify));
                }

                _ = next_tick(&mut heartbeat) => {
                    // an ack may be sitting unread behind a slow item consumer
                    while !session.heartbeat_acked() {
                        let Some(received) = transport.recv().now_or_never() else {
                            break;
                        };
                        if let Err(outcome) = self
                            .on_received(received, session, queue, backoff, &mut heartbeat)
                            .await
                        {
                            return outcome;
                        }
                    }

                    let frame = match session.on_heartbeat_tick() {
                        Ok(frame) => frame,
                        Err(e) => return Outcome::Failed(e),
                    };
                    let limit = self.config.heartbeat_interval();
                    if let Err(outcome) =
                        self.send_frame(transport, frame, limit, TimeoutKind::Heartbeat).await
                    {
                        return outcome;
                    }
                    trace!("Sent heartbeat for room {}", self.room_id);
                }

                received = transport.recv() => {
                    if let Err(outcome) = self
                        .on_received(received, session, queue, backoff, &mut heartbeat)
                        .await
                    {
                        return outcome;
                    }
                }
            }
        }
    }

    /// Send one frame. Gives up when stopped, or with a `kind` timeout once
    /// `limit` passes.
    async fn send_frame(
        &self,
        transport: &mut dyn Transport,
        frame: Bytes,
        limit: Duration,
        kind: TimeoutKind,
    ) -> Result<(), Outcome> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Outcome::Stopped),
            sent = tokio::time::timeout(limit, transport.send(frame)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Outcome::Failed(e)),
                Err(_) => Err(Outcome::Failed(LiveChatError::Timeout(kind))),
            },
        }
    }

    /// Handle one result of `Transport::recv`.
    async fn on_received(
        &self,
        received: Option<crate::Result<Bytes>>,
        session: &mut Session,
        queue: &mut TimeInferenceQueue,
        backoff: &mut Backoff,
        heartbeat: &mut Option<Interval>,
    ) -> Result<(), Outcome> {
        let buf = match received {
            Some(Ok(buf)) => buf,
            Some(Err(e)) => return Err(Outcome::Failed(e)),
            None => {
                return Err(Outcome::Failed(LiveChatError::transport(
                    "connection closed by peer",
                )));
            }
        };

        let inbound = session.handle_buffer(buf).map_err(Outcome::Failed)?;

        if inbound.verified {
            backoff.reset();
            self.emit_state(SessionState::Active);
            let mut interval = tokio::time::interval(self.config.heartbeat_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *heartbeat = Some(interval);
        }
        if let Some(value) = inbound.popularity {
            self.emit(SessionEvent::Popularity { value });
        }
        for err in &inbound.errors {
            warn!("Discarded inbound data for room {}: {}", self.room_id, err);
            self.emit(SessionEvent::error(err));
        }

        for notice in inbound.notices {
            if !self.dispatch(notice, queue).await {
                return Err(Outcome::Stopped);
            }
        }
        Ok(())
    }

    /// Classify one notice and forward whatever is ready. `false` once the
    /// runner should stop.
    async fn dispatch(&self, notice: Value, queue: &mut TimeInferenceQueue) -> bool {
        trace!("Notice: {}", notice);
        let raw = Arc::new(notice);
        let items = {
            let mut stats = self.stats.lock();
            classify(&raw, &mut stats)
        };

        for item in items {
            for ready in queue.submit(Arc::clone(&raw), item) {
                debug!("Emitting {} item", ready.kind());
                tokio::select! {
                    _ = self.cancel.cancelled() => return false,
                    sent = self.items.send(ready) => {
                        if sent.is_err() {
                            info!("Item receiver dropped, stopping room {}", self.room_id);
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    fn emit_state(&self, state: SessionState) {
        debug!("Room {} is {}", self.room_id, state);
        self.emit(SessionEvent::state(state));
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Wait for the heartbeat tick, or forever while no heartbeat is armed.
async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
