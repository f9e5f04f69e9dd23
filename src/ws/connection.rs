//! Connection manager: lifecycle of the single push transport.
//!
//! ```text
//!   connect()            Opened           loss / failed open
//! Disconnected ──▶ Connecting ──▶ Connected ──────────────┐
//!      ▲               ▲                                   │
//!      │               └──────── backoff sleep ◀───────────┤ (policy allows)
//!      └────────── disconnect() / attempts exhausted ◀─────┘
//! ```
//!
//! Opening a transport happens in a spawned task that reports back through a
//! channel, so the owner's event loop stays responsive while the transport is
//! opening or a retry is sleeping. Every attempt gets a new *epoch*; results
//! from attempts that were superseded (by [`disconnect`] or a later attempt)
//! are dropped.
//!
//! [`disconnect`]: ConnectionManager::disconnect

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::reconnect;
use crate::error::{FeedError, Result};
use crate::ws::transport::{Connector, Transport};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of the push connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    /// Opening a transport, or waiting out a reconnect backoff.
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Counters for one manager's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Transports successfully opened.
    pub transports_opened: u64,
    /// Transports opened after a loss.
    pub reconnects: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Frames dropped because no transport was open.
    pub frames_dropped: u64,
}

// ---------------------------------------------------------------------------
// Reconnect policy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for reconnecting after transport loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all after an unexpected loss.
    pub enabled: bool,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between retries.
    pub max_delay: Duration,
    /// Growth factor between consecutive retries.
    pub multiplier: u32,
    /// Retries before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(reconnect::INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(reconnect::MAX_DELAY_MS),
            multiplier: reconnect::BACKOFF_MULTIPLIER,
            max_attempts: reconnect::MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt);
        let millis = (self.initial_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.max_delay)
    }

    /// Whether retry number `attempt` (0-based) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What the owner of a [`ConnectionManager`] has to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A transport is open; everything desired must be (re-)joined.
    Connected,
    /// One inbound frame, in arrival order.
    Frame(String),
    /// The transport is gone. `retry_in` is the scheduled backoff, or `None`
    /// if the manager gave up and is now disconnected.
    Lost {
        reason: String,
        retry_in: Option<Duration>,
    },
}

struct Opened {
    epoch: u64,
    result: Result<Transport>,
}

enum Polled {
    Opened(Opened),
    Frame(Option<String>),
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// Owns the one transport to the market-data service.
///
/// Outbound frames sent while no transport is open are **dropped**
/// ([`send`](Self::send) returns `false`): whatever must be joined is
/// re-derived from the desired feed set once the connection is back.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    status: ConnectionStatus,
    epoch: u64,
    attempt: u32,
    outbound: Option<mpsc::UnboundedSender<String>>,
    inbound: Option<mpsc::UnboundedReceiver<String>>,
    opening: Option<JoinHandle<()>>,
    opened_tx: mpsc::UnboundedSender<Opened>,
    opened_rx: mpsc::UnboundedReceiver<Opened>,
    stats: ConnectionStats,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        connect_timeout: Duration,
    ) -> Self {
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            policy,
            connect_timeout,
            status: ConnectionStatus::Disconnected,
            epoch: 0,
            attempt: 0,
            outbound: None,
            inbound: None,
            opening: None,
            opened_tx,
            opened_rx,
            stats: ConnectionStats::default(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start opening a transport.
    ///
    /// No-op while connecting or connected, so at most one transport exists.
    /// Must be called inside a Tokio runtime.
    pub fn connect(&mut self) {
        if self.status != ConnectionStatus::Disconnected {
            tracing::debug!(status = %self.status, "connect() ignored");
            return;
        }
        self.attempt = 0;
        self.begin_attempt(Duration::ZERO);
    }

    /// Tear the transport down and stay disconnected.
    ///
    /// Pending opens are cancelled and their results ignored.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.opening.take() {
            task.abort();
        }
        self.outbound = None;
        self.inbound = None;
        self.epoch += 1;
        self.attempt = 0;
        if self.status != ConnectionStatus::Disconnected {
            tracing::info!(epoch = self.epoch, "Connection closed by client");
        }
        self.status = ConnectionStatus::Disconnected;
    }

    /// Send a text frame if connected; otherwise drop it and return `false`.
    pub fn send(&mut self, frame: String) -> bool {
        let sent = match (&self.outbound, self.status) {
            (Some(tx), ConnectionStatus::Connected) => tx.send(frame).is_ok(),
            _ => false,
        };
        if sent {
            self.stats.frames_sent += 1;
        } else {
            self.stats.frames_dropped += 1;
            tracing::debug!(status = %self.status, "Dropping outbound frame, no open transport");
        }
        sent
    }

    /// Wait for the next lifecycle change or inbound frame.
    ///
    /// Cancel-safe: nothing is consumed unless an event is returned.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        loop {
            let polled = tokio::select! {
                Some(opened) = self.opened_rx.recv() => Polled::Opened(opened),
                frame = next_frame(&mut self.inbound) => Polled::Frame(frame),
            };

            match polled {
                Polled::Opened(Opened { epoch, result }) => {
                    if epoch != self.epoch || self.status != ConnectionStatus::Connecting {
                        tracing::debug!(epoch, current = self.epoch, "Ignoring superseded connect result");
                        continue;
                    }
                    self.opening = None;
                    match result {
                        Ok(transport) => return self.on_opened(transport),
                        Err(e) => return self.on_lost(e),
                    }
                }
                Polled::Frame(Some(text)) => {
                    self.stats.frames_received += 1;
                    return ConnectionEvent::Frame(text);
                }
                Polled::Frame(None) => {
                    return self.on_lost(FeedError::ConnectionClosed("transport stream ended".into()));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn begin_attempt(&mut self, delay: Duration) {
        self.epoch += 1;
        self.status = ConnectionStatus::Connecting;

        let epoch = self.epoch;
        let connector = Arc::clone(&self.connector);
        let timeout = self.connect_timeout;
        let opened_tx = self.opened_tx.clone();

        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = match tokio::time::timeout(timeout, connector.connect()).await {
                Ok(result) => result,
                Err(_) => Err(FeedError::ConnectTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            let _ = opened_tx.send(Opened { epoch, result });
        });

        if let Some(previous) = self.opening.replace(task) {
            previous.abort();
        }
        tracing::debug!(epoch, delay_ms = delay.as_millis() as u64, "Connection attempt scheduled");
    }

    fn on_opened(&mut self, transport: Transport) -> ConnectionEvent {
        if self.stats.transports_opened > 0 {
            self.stats.reconnects += 1;
        }
        self.stats.transports_opened += 1;
        self.outbound = Some(transport.outbound);
        self.inbound = Some(transport.inbound);
        self.status = ConnectionStatus::Connected;
        self.attempt = 0;

        tracing::info!(
            epoch = self.epoch,
            reconnects = self.stats.reconnects,
            "Connection established"
        );
        ConnectionEvent::Connected
    }

    /// Only transport errors are retried; anything else (a bad endpoint, a
    /// misbehaving connector) would fail the same way again.
    fn on_lost(&mut self, error: FeedError) -> ConnectionEvent {
        self.outbound = None;
        self.inbound = None;
        let reason = error.to_string();

        if error.is_transport() && self.policy.allows(self.attempt) {
            let delay = self.policy.delay_for(self.attempt);
            self.attempt += 1;
            tracing::warn!(
                epoch = self.epoch,
                attempt = self.attempt,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "Connection lost, reconnecting"
            );
            self.begin_attempt(delay);
            ConnectionEvent::Lost {
                reason,
                retry_in: Some(delay),
            }
        } else {
            tracing::error!(
                epoch = self.epoch,
                attempts = self.attempt,
                transport = error.is_transport(),
                reason = %reason,
                "Connection lost, giving up"
            );
            self.epoch += 1;
            self.status = ConnectionStatus::Disconnected;
            ConnectionEvent::Lost {
                reason,
                retry_in: None,
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.opening.take() {
            task.abort();
        }
    }
}

async fn next_frame(inbound: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use super::*;

    /// Hands out in-memory transports and keeps the far ends.
    #[derive(Default)]
    struct LoopbackConnector {
        connects: AtomicUsize,
        fail_first: AtomicUsize,
        far_ends: Mutex<Vec<(mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>)>>,
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        async fn connect(&self) -> Result<Transport> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(FeedError::ConnectionClosed("refused".into()));
            }
            let (transport, out_rx, in_tx) = Transport::channel();
            self.far_ends.lock().unwrap().push((out_rx, in_tx));
            Ok(transport)
        }
    }

    /// Never finishes opening.
    struct StalledConnector;

    #[async_trait]
    impl Connector for StalledConnector {
        async fn connect(&self) -> Result<Transport> {
            std::future::pending().await
        }
    }

    /// Fails every open with `error`.
    struct FailingConnector {
        connects: AtomicUsize,
        error: fn() -> FeedError,
    }

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self) -> Result<Transport> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Err((self.error)())
        }
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            ..ReconnectPolicy::default()
        }
    }

    async fn next(manager: &mut ConnectionManager) -> ConnectionEvent {
        timeout(Duration::from_secs(2), manager.next_event())
            .await
            .expect("connection event")
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            multiplier: 2,
            ..ReconnectPolicy::default()
        };
        let delays: Vec<u64> = (0..6).map(|a| policy.delay_for(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(policy.delay_for(200), Duration::from_millis(1_000));
    }

    #[test]
    fn attempts_are_bounded_when_configured() {
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        assert!(policy.allows(0) && policy.allows(1));
        assert!(!policy.allows(2));
        assert!(!ReconnectPolicy::disabled().allows(0));
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let connector = Arc::new(LoopbackConnector::default());
        let mut manager =
            ConnectionManager::new(connector.clone(), fast_policy(), Duration::from_secs(1));

        manager.connect();
        manager.connect();
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert_eq!(next(&mut manager).await, ConnectionEvent::Connected);
        manager.connect();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stats().transports_opened, 1);
    }

    #[tokio::test]
    async fn send_drops_frames_while_disconnected() {
        let connector = Arc::new(LoopbackConnector::default());
        let mut manager = ConnectionManager::new(connector, fast_policy(), Duration::from_secs(1));

        assert!(!manager.send("hello".into()));
        assert_eq!(manager.stats().frames_dropped, 1);
    }

    #[tokio::test]
    async fn frames_arrive_in_order_and_loss_triggers_reconnect() {
        let connector = Arc::new(LoopbackConnector::default());
        let mut manager =
            ConnectionManager::new(connector.clone(), fast_policy(), Duration::from_secs(1));
        manager.connect();
        assert_eq!(next(&mut manager).await, ConnectionEvent::Connected);

        assert!(manager.send("out".into()));
        let (mut out_rx, in_tx) = connector.far_ends.lock().unwrap().pop().unwrap();
        assert_eq!(out_rx.recv().await.as_deref(), Some("out"));

        in_tx.send("a".into()).unwrap();
        in_tx.send("b".into()).unwrap();
        assert_eq!(next(&mut manager).await, ConnectionEvent::Frame("a".into()));
        assert_eq!(next(&mut manager).await, ConnectionEvent::Frame("b".into()));

        drop(in_tx);
        assert!(matches!(
            next(&mut manager).await,
            ConnectionEvent::Lost { retry_in: Some(_), .. }
        ));
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert_eq!(next(&mut manager).await, ConnectionEvent::Connected);
        assert_eq!(manager.stats().reconnects, 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_opens_are_retried() {
        let connector = Arc::new(LoopbackConnector::default());
        connector.fail_first.store(2, Ordering::SeqCst);
        let mut manager =
            ConnectionManager::new(connector.clone(), fast_policy(), Duration::from_secs(1));
        manager.connect();

        assert!(matches!(next(&mut manager).await, ConnectionEvent::Lost { .. }));
        assert!(matches!(next(&mut manager).await, ConnectionEvent::Lost { .. }));
        assert_eq!(next(&mut manager).await, ConnectionEvent::Connected);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_when_reconnect_disabled() {
        let connector = Arc::new(LoopbackConnector::default());
        connector.fail_first.store(1, Ordering::SeqCst);
        let mut manager = ConnectionManager::new(
            connector,
            ReconnectPolicy::disabled(),
            Duration::from_secs(1),
        );
        manager.connect();

        assert!(matches!(
            next(&mut manager).await,
            ConnectionEvent::Lost { retry_in: None, .. }
        ));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_discards_pending_open() {
        let connector = Arc::new(LoopbackConnector::default());
        let mut manager =
            ConnectionManager::new(connector, fast_policy(), Duration::from_secs(1));
        manager.connect();
        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        // nothing may surface from the aborted attempt
        assert!(timeout(Duration::from_millis(50), manager.next_event()).await.is_err());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_open_times_out() {
        let mut manager = ConnectionManager::new(
            Arc::new(StalledConnector),
            ReconnectPolicy::disabled(),
            Duration::from_millis(1_000),
        );
        manager.connect();

        match next(&mut manager).await {
            ConnectionEvent::Lost { reason, retry_in } => {
                assert_eq!(reason, FeedError::ConnectTimeout { timeout_ms: 1_000 }.to_string());
                assert_eq!(retry_in, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_opens_are_retried() {
        let mut manager = ConnectionManager::new(
            Arc::new(StalledConnector),
            fast_policy(),
            Duration::from_millis(100),
        );
        manager.connect();

        assert!(matches!(
            next(&mut manager).await,
            ConnectionEvent::Lost { retry_in: Some(_), .. }
        ));
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let connector = Arc::new(FailingConnector {
            connects: AtomicUsize::new(0),
            error: || FeedError::ConnectionClosed("refused".into()),
        });
        let policy = ReconnectPolicy {
            max_attempts: 2,
            ..fast_policy()
        };
        let mut manager = ConnectionManager::new(connector.clone(), policy, Duration::from_secs(1));
        manager.connect();

        let mut retries = Vec::new();
        loop {
            match next(&mut manager).await {
                ConnectionEvent::Lost { retry_in, .. } => {
                    retries.push(retry_in);
                    if retry_in.is_none() {
                        break;
                    }
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        assert_eq!(
            retries,
            vec![Some(Duration::from_millis(5)), Some(Duration::from_millis(10)), None]
        );
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transport_failures_are_not_retried() {
        let connector = Arc::new(FailingConnector {
            connects: AtomicUsize::new(0),
            error: || FeedError::InvalidArgument("bad endpoint".into()),
        });
        let mut manager =
            ConnectionManager::new(connector.clone(), fast_policy(), Duration::from_secs(1));
        manager.connect();

        assert!(matches!(
            next(&mut manager).await,
            ConnectionEvent::Lost { retry_in: None, .. }
        ));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }
}
