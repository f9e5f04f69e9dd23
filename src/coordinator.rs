//! The subscription coordinator, one event loop serving every feed consumer.
//!
//! # Architecture
//!
//! ```text
//!   CoordinatorHandle (clone per consumer)
//!        │  Command (mpsc)
//!        ▼
//!  ┌──────────────────────────────────────────┐
//!  │ EventLoop (one Tokio task)               │
//!  │   ConnectionManager ── transport frames  │
//!  │   FeedRegistry      ── join / leave      │
//!  │   FanoutCache       ── latest + fan-out  │
//!  └───────┬──────────────────────────────────┘
//!          │  FeedUpdate (bounded mpsc per subscription)
//!          ▼
//!   FeedSubscription (Stream; drop unsubscribes)
//! ```
//!
//! Commands and connection events are handled one at a time, so the three
//! state machines never see interleaved steps and need no locks.
//!
//! # Quick Start
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use pricefeed_rs::coordinator::CoordinatorBuilder;
//! use pricefeed_rs::types::Feed;
//!
//! # #[tokio::main]
//! # async fn main() -> pricefeed_rs::error::Result<()> {
//! let coordinator = CoordinatorBuilder::new("ws://localhost:8001/ws").start()?;
//! let handle = coordinator.handle();
//!
//! handle.navigate_path("/bitcoin")?;
//! let mut top = handle.subscribe(Feed::top()).await?;
//! while let Some(update) = top.next().await {
//!     println!("seq {} with {} assets", update.seq, update.payload.len());
//! }
//! # coordinator.shutdown().await
//! # }
//! ```

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::constants::{DEFAULT_FEED_URL, MAX_FRAMES_PER_TURN, reconnect};
use crate::error::{FeedError, Result};
use crate::feed::cache::{Delivery, FanoutCache, FeedUpdate, Listener, SubscriptionId};
use crate::feed::registry::{AckMode, FeedCommand, FeedRegistry, Reconciliation};
use crate::feed::view::{View, desired_feeds};
use crate::types::feed::{Feed, FeedSet};
use crate::types::market::Payload;
use crate::ws::connection::{
    ConnectionEvent, ConnectionManager, ConnectionStats, ConnectionStatus, ReconnectPolicy,
};
use crate::ws::protocol::{self, ClientFrame, ServerFrame};
use crate::ws::transport::{Connector, WebSocketConnector};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`FeedCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Push endpoint (`ws://`, `wss://`, `http://` or `https://`).
    pub url: String,
    /// How join/leave completion is tracked.
    pub ack_mode: AckMode,
    /// Backoff applied after an unexpected transport loss.
    pub reconnect: ReconnectPolicy,
    /// Time allowed for one transport to open (milliseconds).
    pub connect_timeout_ms: u64,
    /// Buffered updates per subscription before a slow consumer misses some.
    pub subscription_capacity: usize,
    /// View applied before the first connect.
    pub initial_view: Option<View>,
    /// Connect as soon as the coordinator starts.
    pub auto_connect: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_owned(),
            ack_mode: AckMode::default(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout_ms: reconnect::CONNECT_TIMEOUT_MS,
            subscription_capacity: 256,
            initial_view: None,
            auto_connect: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`FeedCoordinator`].
///
/// # Example
///
/// ```no_run
/// use pricefeed_rs::coordinator::CoordinatorBuilder;
/// use pricefeed_rs::feed::registry::AckMode;
///
/// # #[tokio::main]
/// # async fn main() -> pricefeed_rs::error::Result<()> {
/// let coordinator = CoordinatorBuilder::new("wss://feed.example.com/ws")
///     .ack_mode(AckMode::Acknowledged)
///     .reconnect_delay_ms(250, 10_000)
///     .connect_timeout_ms(5_000)
///     .start()?;
/// # Ok(())
/// # }
/// ```
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    connector: Option<Arc<dyn Connector>>,
}

impl CoordinatorBuilder {
    /// Create a builder for the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: CoordinatorConfig {
                url: url.into(),
                ..CoordinatorConfig::default()
            },
            connector: None,
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: CoordinatorConfig) -> Self {
        Self {
            config,
            connector: None,
        }
    }

    /// Set the acknowledgment mode. Default: optimistic.
    pub fn ack_mode(mut self, mode: AckMode) -> Self {
        self.config.ack_mode = mode;
        self
    }

    /// Replace the whole reconnect policy.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Enable or disable reconnecting after transport loss. Default: true.
    pub fn auto_reconnect(mut self, enable: bool) -> Self {
        self.config.reconnect.enabled = enable;
        self
    }

    /// Set the first and the maximum reconnect delay. Default: 500 / 30,000.
    pub fn reconnect_delay_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.reconnect.initial_delay = Duration::from_millis(initial);
        self.config.reconnect.max_delay = Duration::from_millis(max.max(initial));
        self
    }

    /// Give up after this many consecutive retries (0 = never). Default: 0.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    /// Set the connect timeout in milliseconds. Default: 10,000.
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the per-subscription buffer. Default: 256.
    pub fn subscription_capacity(mut self, cap: usize) -> Self {
        self.config.subscription_capacity = cap.max(1);
        self
    }

    /// Apply `view` before connecting.
    pub fn initial_view(mut self, view: View) -> Self {
        self.config.initial_view = Some(view);
        self
    }

    /// Connect on start. Default: true.
    pub fn auto_connect(mut self, enable: bool) -> Self {
        self.config.auto_connect = enable;
        self
    }

    /// Open transports through `connector` instead of a WebSocket to the URL.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Spawn the coordinator on the current Tokio runtime.
    ///
    /// Fails only if no connector was given and the URL is invalid.
    pub fn start(self) -> Result<FeedCoordinator> {
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketConnector::new(&self.config.url)?),
        };
        Ok(FeedCoordinator::with_connector(self.config, connector))
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorStatus {
    pub connection: ConnectionStatus,
    /// The last view navigated to, if any.
    pub view: Option<View>,
    pub desired: FeedSet,
    pub joined: FeedSet,
    /// Feeds with a join or leave awaiting acknowledgment.
    pub pending: FeedSet,
    /// Whether joined equals desired with nothing in flight.
    pub converged: bool,
    /// Feeds with a cache entry.
    pub cached_feeds: usize,
    pub stats: ConnectionStats,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

enum Command {
    Connect,
    Disconnect,
    Navigate(View),
    SetDesired(FeedSet),
    Subscribe {
        feed: Feed,
        tx: mpsc::Sender<FeedUpdate>,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe(SubscriptionId),
    Get {
        feed: Feed,
        reply: oneshot::Sender<Option<Arc<Payload>>>,
    },
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// FeedCoordinator
// ---------------------------------------------------------------------------

/// Owner of the coordinator task.
///
/// Dropping it aborts the event loop; [`shutdown`](Self::shutdown) stops it
/// cleanly. Consumers talk to the loop through [`CoordinatorHandle`]s.
pub struct FeedCoordinator {
    handle: CoordinatorHandle,
    task: Option<JoinHandle<()>>,
}

impl FeedCoordinator {
    /// Start a coordinator with a WebSocket connector for `config.url`.
    pub fn start(config: CoordinatorConfig) -> Result<Self> {
        CoordinatorBuilder::from_config(config).start()
    }

    /// Start a coordinator that opens transports through `connector`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn with_connector(config: CoordinatorConfig, connector: Arc<dyn Connector>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle {
            tx,
            subscription_capacity: config.subscription_capacity.max(1),
        };

        let connection = ConnectionManager::new(
            connector,
            config.reconnect.clone(),
            Duration::from_millis(config.connect_timeout_ms),
        );
        let mut event_loop = EventLoop {
            connection,
            registry: FeedRegistry::new(config.ack_mode),
            cache: FanoutCache::new(),
            view: None,
            commands: rx,
        };

        if let Some(view) = config.initial_view {
            event_loop.navigate(view);
        }
        let auto_connect = config.auto_connect;
        let task = tokio::spawn(async move {
            if auto_connect {
                event_loop.connection.connect();
            }
            event_loop.run().await;
        });

        tracing::info!(url = %config.url, ack_mode = ?config.ack_mode, "Coordinator started");
        Self {
            handle,
            task: Some(task),
        }
    }

    /// A new handle to the running coordinator.
    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Close the transport and stop the event loop.
    pub async fn shutdown(mut self) -> Result<()> {
        let sent = self.handle.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Coordinator task ended abnormally");
                return Err(FeedError::CoordinatorStopped);
            }
        }
        sent
    }
}

impl Drop for FeedCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// CoordinatorHandle
// ---------------------------------------------------------------------------

/// Cloneable access to a running coordinator.
///
/// Fire-and-forget methods return [`FeedError::CoordinatorStopped`] only when
/// the event loop is gone; the request itself is applied asynchronously.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
    subscription_capacity: usize,
}

impl CoordinatorHandle {
    /// Open the transport. No-op if already connecting or connected.
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// Close the transport and stop reconnecting.
    ///
    /// The desired set is kept; the next `connect` re-joins it.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Make `view` the active view and reconcile feeds to its needs.
    pub fn navigate(&self, view: View) -> Result<()> {
        self.send(Command::Navigate(view))
    }

    /// [`navigate`](Self::navigate) to the view a router path resolves to.
    pub fn navigate_path(&self, path: &str) -> Result<()> {
        self.navigate(View::from_path(path))
    }

    /// Replace the desired feed set directly, bypassing view binding.
    pub fn set_desired(&self, feeds: FeedSet) -> Result<()> {
        self.send(Command::SetDesired(feeds))
    }

    /// Receive every accepted update for `feed`, starting with the cached one.
    ///
    /// Local subscriptions never cause network joins; the feed must be in the
    /// desired set for updates to flow.
    pub async fn subscribe(&self, feed: Feed) -> Result<FeedSubscription> {
        let (tx, rx) = mpsc::channel(self.subscription_capacity);
        let (reply, id) = oneshot::channel();
        self.send(Command::Subscribe {
            feed: feed.clone(),
            tx,
            reply,
        })?;
        let id = id.await.map_err(|_| FeedError::CoordinatorStopped)?;
        Ok(FeedSubscription {
            id,
            feed,
            rx,
            commands: self.tx.clone(),
        })
    }

    /// Latest cached payload for `feed`; `None` until one was accepted.
    pub async fn get(&self, feed: Feed) -> Result<Option<Arc<Payload>>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get { feed, reply })?;
        rx.await.map_err(|_| FeedError::CoordinatorStopped)
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply })?;
        rx.await.map_err(|_| FeedError::CoordinatorStopped)
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| FeedError::CoordinatorStopped)
    }
}

// ---------------------------------------------------------------------------
// FeedSubscription
// ---------------------------------------------------------------------------

/// A consumer's stream of updates for one feed.
///
/// Dropping it (or calling [`close`](Self::close)) stops delivery at once.
/// The network join is untouched.
pub struct FeedSubscription {
    id: SubscriptionId,
    feed: Feed,
    rx: mpsc::Receiver<FeedUpdate>,
    commands: mpsc::UnboundedSender<Command>,
}

impl FeedSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    /// Next update, or `None` once the coordinator stopped.
    pub async fn recv(&mut self) -> Option<FeedUpdate> {
        self.rx.recv().await
    }

    /// Next buffered update without waiting.
    pub fn try_recv(&mut self) -> Option<FeedUpdate> {
        self.rx.try_recv().ok()
    }

    /// Stop delivery; buffered updates can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Stream for FeedSubscription {
    type Item = FeedUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedUpdate>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.rx.close();
        let _ = self.commands.send(Command::Unsubscribe(self.id));
    }
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("id", &self.id)
            .field("feed", &self.feed)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct EventLoop {
    connection: ConnectionManager,
    registry: FeedRegistry,
    cache: FanoutCache,
    view: Option<View>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl EventLoop {
    async fn run(mut self) {
        let mut burst = 0;
        loop {
            // a frame flood must not starve navigation
            if burst >= MAX_FRAMES_PER_TURN {
                burst = 0;
                match self.commands.try_recv() {
                    Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => break,
                    Ok(cmd) => {
                        self.handle_command(cmd);
                        continue;
                    }
                    Err(TryRecvError::Empty) => {}
                }
            }

            tokio::select! {
                // frames already received are handled before later commands
                biased;
                event = self.connection.next_event() => {
                    burst += 1;
                    self.handle_event(event);
                }
                cmd = self.commands.recv() => {
                    burst = 0;
                    match cmd {
                        Some(Command::Shutdown) | None => break,
                        Some(cmd) => self.handle_command(cmd),
                    }
                }
            }
        }

        self.connection.disconnect();
        tracing::info!(stats = ?self.connection.stats(), "Coordinator stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => self.connection.connect(),
            Command::Disconnect => {
                self.connection.disconnect();
                self.registry.on_disconnected();
                self.cache.mark_all_stale();
            }
            Command::Navigate(view) => self.navigate(view),
            Command::SetDesired(feeds) => self.set_desired(feeds),
            Command::Subscribe { feed, tx, reply } => {
                let id = self.cache.subscribe(feed.clone(), channel_listener(tx));
                tracing::debug!(feed = %feed, %id, "Subscriber added");
                let _ = reply.send(id);
            }
            Command::Unsubscribe(id) => {
                if self.cache.unsubscribe(id) {
                    tracing::debug!(%id, "Subscriber removed");
                }
            }
            Command::Get { feed, reply } => {
                let _ = reply.send(self.cache.get(&feed));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            // handled by `run`
            Command::Shutdown => {}
        }
    }

    fn navigate(&mut self, view: View) {
        let feeds = desired_feeds(&view);
        tracing::info!(view = %view, feeds = feeds.len(), "View changed");
        self.view = Some(view);
        self.set_desired(feeds);
    }

    fn set_desired(&mut self, feeds: FeedSet) {
        let step = self.registry.set_desired(feeds);
        self.apply(step);
    }

    fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                let step = self.registry.on_connected();
                self.apply(step);
            }
            ConnectionEvent::Frame(text) => self.handle_frame(&text),
            ConnectionEvent::Lost { reason, retry_in } => {
                let dropped = self.registry.on_disconnected();
                self.cache.mark_all_stale();
                tracing::debug!(
                    reason = %reason,
                    feeds = dropped.len(),
                    retry_ms = retry_in.map(|d| d.as_millis() as u64),
                    "Joined feeds dropped with the transport"
                );
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let frame = match protocol::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "Discarding malformed frame");
                return;
            }
        };

        match frame {
            ServerFrame::Update { feed, seq, payload } => self.handle_update(feed, seq, payload),
            ServerFrame::Joined { feed } => {
                if self.registry.ack_mode() == AckMode::Acknowledged {
                    let step = self.registry.on_join_ack(&feed);
                    self.apply(step);
                } else {
                    tracing::debug!(feed = %feed, "Join ack (optimistic mode)");
                }
            }
            ServerFrame::Left { feed } => {
                if self.registry.ack_mode() == AckMode::Acknowledged {
                    let step = self.registry.on_leave_ack(&feed);
                    self.apply(step);
                } else {
                    tracing::debug!(feed = %feed, "Leave ack (optimistic mode)");
                }
            }
            ServerFrame::Error { message } => {
                tracing::warn!(message = %message, "Service reported an error");
            }
        }
    }

    fn handle_update(&mut self, feed: Feed, seq: Option<u64>, payload: Payload) {
        if !self.registry.desired().contains(&feed) {
            tracing::debug!(feed = %feed, "Dropping update for undesired feed");
            return;
        }
        let payload = match payload.normalize_for(&feed) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(feed = %feed, error = %e, "Discarding update");
                return;
            }
        };
        let seq = match seq.or_else(|| self.cache.next_sequence(&feed)) {
            Some(seq) => seq,
            None => {
                tracing::warn!(feed = %feed, "Sequence counter exhausted, discarding update");
                return;
            }
        };

        match self.cache.on_payload(feed.clone(), payload, seq) {
            Delivery::Accepted { subscribers } => {
                tracing::debug!(feed = %feed, seq, subscribers, "Update accepted");
            }
            Delivery::Stale { last_seq } => {
                tracing::debug!(feed = %feed, seq, last_seq, "Stale update ignored");
            }
        }
    }

    /// Send the step's commands and drop cache entries for released feeds.
    fn apply(&mut self, step: Reconciliation) {
        for cmd in step.commands {
            let (action, feed) = match &cmd {
                FeedCommand::Join(feed) => ("join", feed.clone()),
                FeedCommand::Leave(feed) => ("leave", feed.clone()),
            };
            match protocol::encode(&ClientFrame::from(cmd)) {
                Ok(text) => {
                    if self.connection.send(text) {
                        tracing::debug!(feed = %feed, action, "Sent feed command");
                    }
                }
                Err(e) => tracing::warn!(feed = %feed, action, error = %e, "Failed to encode frame"),
            }
        }
        for feed in step.released {
            self.cache.release(&feed);
        }
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            connection: self.connection.status(),
            view: self.view.clone(),
            desired: self.registry.desired().clone(),
            joined: self.registry.joined(),
            pending: self.registry.pending(),
            converged: self.registry.is_converged(),
            cached_feeds: self.cache.len(),
            stats: self.connection.stats(),
        }
    }
}

/// Listener forwarding into a subscription channel.
///
/// A full buffer skips the update for that consumer only; a closed one
/// unregisters the listener.
fn channel_listener(tx: mpsc::Sender<FeedUpdate>) -> Listener {
    Box::new(move |update: &FeedUpdate| match tx.try_send(update.clone()) {
        Ok(()) => true,
        Err(TrySendError::Full(update)) => {
            tracing::debug!(feed = %update.feed, seq = update.seq, "Subscriber lagging, update skipped");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    })
}
