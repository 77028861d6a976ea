//! Persistent socket with automatic reconnection
//!
//! [`ConnectionManager`] owns one socket's lifecycle. Inbound frames are
//! parsed into [`Envelope`]s and fanned out through its [`EventBus`];
//! connection up/down changes are published on the status channel. Lost
//! connections are retried on the reconnect backoff schedule until the
//! configured attempt limit is reached.

use crate::bus::{EventBus, Subscription};
use crate::config::ClientConfig;
use crate::envelope::Envelope;
use async_trait::async_trait;
use daybook_resilience::{with_timeout, BackoffPolicy, Clock, SystemClock};
use futures_util::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

/// Socket failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    /// The connection could not be opened
    #[error("connect failed: {0}")]
    Connect(String),

    /// The peer closed the connection
    #[error("connection closed")]
    Closed,

    /// Read or write failed on an open connection
    #[error("socket error: {0}")]
    Io(String),
}

/// Outgoing half of a connection: text frames in
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SocketError> + Send>>;

/// Incoming half of a connection: text frames out
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, SocketError>> + Send>>;

/// Opens text-frame connections
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Opens a connection to `url`
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), SocketError>;
}

/// WebSocket connector backed by `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), SocketError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SocketError::Connect(e.to_string()))?;
        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(|e| SocketError::Io(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, SocketError>(Message::Text(text))));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(_)) => Some(Err(SocketError::Closed)),
                Ok(Message::Binary(_)) => {
                    tracing::debug!("Ignoring binary frame");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(SocketError::Io(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Lifecycle state of the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and none being opened
    #[default]
    Disconnected,
    /// Opening a connection
    Connecting,
    /// Open and dispatching
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Socket settings
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Server URL
    pub url: String,
    /// Bound on a single connection attempt
    pub connection_timeout: Duration,
    /// Reconnections scheduled before giving up
    pub max_reconnect_attempts: u32,
    /// Reconnect delay schedule
    pub reconnect: BackoffPolicy,
}

impl From<&ClientConfig> for SocketConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            url: config.socket_url.clone(),
            connection_timeout: config.connection_timeout(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect: config.reconnect_policy(),
        }
    }
}

/// Lifecycle bookkeeping. `generation` changes on every connect and
/// disconnect; a run loop whose generation is stale must not touch state.
#[derive(Debug, Default)]
struct Lifecycle {
    state: ConnectionState,
    generation: u64,
    active: bool,
    closed_deliberately: bool,
    shutdown: Option<watch::Sender<bool>>,
}

enum SessionEnd {
    Lost,
    Shutdown,
}

struct ManagerInner {
    config: SocketConfig,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    lifecycle: Mutex<Lifecycle>,
    attempts: AtomicU32,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

/// Owns a persistent socket and its reconnection schedule
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// WebSocket manager on the system clock
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_parts(
            SocketConfig::from(config),
            Arc::new(TungsteniteConnector),
            SystemClock::shared(),
        )
    }

    /// Manager with an explicit connector and clock
    pub fn with_parts(
        config: SocketConfig,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                connector,
                clock,
                bus: EventBus::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
                attempts: AtomicU32::new(0),
                outbound: Mutex::new(None),
            }),
        }
    }

    /// Starts connecting in the background.
    ///
    /// Only valid from `Disconnected` with no reconnection pending; returns
    /// false otherwise, or when called outside a Tokio runtime.
    pub fn connect(&self) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("connect() called outside an async runtime");
                return false;
            }
        };

        let (generation, shutdown) = {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.state != ConnectionState::Disconnected || lifecycle.active {
                return false;
            }
            let (tx, rx) = watch::channel(false);
            lifecycle.generation += 1;
            lifecycle.active = true;
            lifecycle.closed_deliberately = false;
            lifecycle.state = ConnectionState::Connecting;
            lifecycle.shutdown = Some(tx);
            (lifecycle.generation, rx)
        };

        let inner = self.inner.clone();
        handle.spawn(async move {
            inner.run(generation, shutdown).await;
        });
        true
    }

    /// Closes the socket for good: no further reconnection is scheduled and
    /// every subscriber is dropped.
    pub fn disconnect(&self) {
        {
            let mut lifecycle = self.inner.lifecycle();
            lifecycle.generation += 1;
            lifecycle.active = false;
            lifecycle.closed_deliberately = true;
            lifecycle.state = ConnectionState::Disconnected;
            if let Some(shutdown) = lifecycle.shutdown.take() {
                let _ = shutdown.send(true);
            }
        }
        self.inner.outbound().take();
        self.inner.bus.clear();
        tracing::info!(url = %self.inner.config.url, "Socket disconnected");
    }

    /// Sends an envelope. Returns false, without failing, unless connected.
    pub fn send_message(&self, envelope: &Envelope) -> bool {
        if self.state() != ConnectionState::Connected {
            tracing::debug!(kind = %envelope.kind, "Not connected, message not sent");
            return false;
        }
        let text = match envelope.to_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(kind = %envelope.kind, error = %e, "Failed to serialize envelope");
                return false;
            }
        };
        match self.inner.outbound().as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    /// Registers a message subscriber
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.bus.on_message(callback)
    }

    /// Registers a status subscriber
    pub fn on_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.inner.bus.on_status(callback)
    }

    /// Removes a subscriber
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.inner.bus.unsubscribe(subscription)
    }

    /// The subscriber registries
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle().state
    }

    /// Reconnections scheduled since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// True after `disconnect()` until the next `connect()`
    pub fn is_closed_deliberately(&self) -> bool {
        self.inner.lifecycle().closed_deliberately
    }

    /// True while a connection or reconnection schedule is live
    pub fn is_active(&self) -> bool {
        self.inner.lifecycle().active
    }

    /// Socket settings
    pub fn config(&self) -> &SocketConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .field("bus", &self.inner.bus)
            .finish()
    }
}

impl ManagerInner {
    async fn run(self: Arc<Self>, generation: u64, mut shutdown: watch::Receiver<bool>) {
        let url = self.config.url.clone();
        loop {
            if !self.transition(generation, ConnectionState::Connecting) {
                return;
            }
            tracing::debug!(url = %url, "Opening socket");

            let opened = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return,
                opened = with_timeout(
                    self.config.connection_timeout,
                    "socket connect",
                    self.connector.connect(&url),
                ) => opened,
            };

            match opened {
                Ok(Ok((sink, stream))) => {
                    if let SessionEnd::Shutdown =
                        self.session(generation, sink, stream, &mut shutdown).await
                    {
                        return;
                    }
                }
                Ok(Err(e)) => tracing::warn!(url = %url, error = %e, "Socket connect failed"),
                Err(e) => tracing::warn!(url = %url, error = %e, "Socket connect timed out"),
            }

            if !self.transition(generation, ConnectionState::Disconnected) {
                return;
            }
            self.bus.publish_status(false);

            let attempt = self.attempts.load(Ordering::SeqCst);
            if attempt >= self.config.max_reconnect_attempts {
                tracing::warn!(
                    url = %url,
                    attempts = attempt,
                    "Reconnect limit reached, giving up"
                );
                self.deactivate(generation);
                return;
            }

            let delay = self.config.reconnect.delay(attempt);
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tracing::info!(
                url = %url,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return,
                _ = self.clock.sleep(delay) => {}
            }
        }
    }

    async fn session(
        &self,
        generation: u64,
        mut sink: FrameSink,
        mut stream: FrameStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.outbound() = Some(tx.clone());

        if !self.transition(generation, ConnectionState::Connected) {
            let _ = sink.close().await;
            return SessionEnd::Shutdown;
        }
        self.attempts.store(0, Ordering::SeqCst);
        tracing::info!(url = %self.config.url, "Socket connected");
        self.bus.publish_status(true);

        let end = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(SocketError::Closed)) | None => {
                        tracing::info!(url = %self.config.url, "Socket closed by peer");
                        break SessionEnd::Lost;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(url = %self.config.url, error = %e, "Socket error");
                        break SessionEnd::Lost;
                    }
                },
                Some(text) = rx.recv() => {
                    if let Err(e) = sink.send(text).await {
                        tracing::warn!(url = %self.config.url, error = %e, "Socket write failed");
                        break SessionEnd::Lost;
                    }
                }
                _ = shutdown_requested(shutdown) => {
                    let _ = sink.close().await;
                    break SessionEnd::Shutdown;
                }
            }
        };

        let mut outbound = self.outbound();
        if outbound.as_ref().is_some_and(|current| current.same_channel(&tx)) {
            *outbound = None;
        }
        end
    }

    fn dispatch(&self, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) => {
                tracing::trace!(kind = %envelope.kind, "Inbound message");
                self.bus.publish_message(&envelope);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
            }
        }
    }

    /// Moves to `state` if `generation` is still current
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let mut lifecycle = self.lifecycle();
        if lifecycle.generation != generation {
            return false;
        }
        lifecycle.state = state;
        true
    }

    fn deactivate(&self, generation: u64) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.generation == generation {
            lifecycle.active = false;
            lifecycle.shutdown = None;
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<String>>> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolves once shutdown is signalled or its sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}
