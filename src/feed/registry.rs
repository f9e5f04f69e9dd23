//! Feed registry: reconciles the desired feed set with the joined one.
//!
//! The registry is a pure state machine: every input returns the protocol
//! commands to send, and nothing here touches the transport. Per feed it
//! tracks
//!
//! ```text
//! Unjoined ──join──▶ Joining ──ack──▶ Joined ──leave──▶ Leaving ──ack──▶ Unjoined
//! ```
//!
//! With [`AckMode::Optimistic`] the `Joining`/`Leaving` states are skipped and
//! feeds are marked joined or left when the command is issued.
//!
//! At most one join or leave is in flight per feed. Desired-set changes that
//! arrive while a command is pending are applied when its acknowledgment
//! comes back, so the latest desired set always wins.

use std::collections::BTreeMap;

use crate::types::feed::{Feed, FeedSet};

/// How join/leave completion is detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// Mark feeds joined/left as soon as the command is sent.
    ///
    /// Tracking can drift from the server's view until a reconnect forces a
    /// resync.
    #[default]
    Optimistic,
    /// Wait for `joined`/`left` frames from the service.
    Acknowledged,
}

/// Protocol-level state of one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Joining,
    Joined,
    Leaving,
}

/// A protocol command to send for one feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    Join(Feed),
    Leave(Feed),
}

impl FeedCommand {
    pub fn feed(&self) -> &Feed {
        match self {
            Self::Join(feed) | Self::Leave(feed) => feed,
        }
    }
}

/// Result of one registry input.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Commands to send, in order.
    pub commands: Vec<FeedCommand>,
    /// Feeds whose leave completed during this step.
    pub released: Vec<Feed>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.released.is_empty()
    }

    fn merge(&mut self, other: Reconciliation) {
        self.commands.extend(other.commands);
        self.released.extend(other.released);
    }
}

/// Tracks desired vs. joined feeds for one connection.
#[derive(Debug, Default)]
pub struct FeedRegistry {
    ack_mode: AckMode,
    connected: bool,
    desired: FeedSet,
    states: BTreeMap<Feed, FeedState>,
}

impl FeedRegistry {
    pub fn new(ack_mode: AckMode) -> Self {
        Self {
            ack_mode,
            ..Self::default()
        }
    }

    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    pub fn desired(&self) -> &FeedSet {
        &self.desired
    }

    /// Feeds the server currently has joined for this connection.
    pub fn joined(&self) -> FeedSet {
        self.feeds_in(FeedState::Joined)
    }

    /// Feeds with a join or leave awaiting acknowledgment.
    pub fn pending(&self) -> FeedSet {
        self.states
            .iter()
            .filter(|(_, s)| matches!(s, FeedState::Joining | FeedState::Leaving))
            .map(|(f, _)| f.clone())
            .collect()
    }

    /// Protocol state of `feed`; `None` means unjoined.
    pub fn state(&self, feed: &Feed) -> Option<FeedState> {
        self.states.get(feed).copied()
    }

    /// Whether joined equals desired with nothing in flight.
    pub fn is_converged(&self) -> bool {
        !self.connected
            || (self.pending().is_empty() && self.joined() == self.desired)
    }

    /// Replace the desired set.
    ///
    /// While disconnected the new set is only recorded; joins are deferred
    /// until [`on_connected`](Self::on_connected).
    pub fn set_desired(&mut self, feeds: FeedSet) -> Reconciliation {
        self.desired = feeds;
        self.reconcile()
    }

    /// The transport opened: join everything desired.
    pub fn on_connected(&mut self) -> Reconciliation {
        self.connected = true;
        self.states.clear();
        self.reconcile()
    }

    /// The transport went away: the server forgets every join.
    ///
    /// Returns the feeds that had protocol state.
    pub fn on_disconnected(&mut self) -> Vec<Feed> {
        self.connected = false;
        std::mem::take(&mut self.states).into_keys().collect()
    }

    /// The service confirmed a join.
    pub fn on_join_ack(&mut self, feed: &Feed) -> Reconciliation {
        match self.states.get(feed).copied() {
            Some(FeedState::Joining) => {
                self.states.insert(feed.clone(), FeedState::Joined);
            }
            other => {
                tracing::debug!(feed = %feed, state = ?other, "Ignoring unexpected join ack");
                return Reconciliation::default();
            }
        }
        self.reconcile()
    }

    /// The service confirmed a leave.
    pub fn on_leave_ack(&mut self, feed: &Feed) -> Reconciliation {
        if self.states.get(feed) != Some(&FeedState::Leaving) {
            tracing::debug!(feed = %feed, "Ignoring unexpected leave ack");
            return Reconciliation::default();
        }
        self.states.remove(feed);

        let mut out = Reconciliation {
            commands: Vec::new(),
            released: vec![feed.clone()],
        };
        out.merge(self.reconcile());
        out
    }

    fn feeds_in(&self, wanted: FeedState) -> FeedSet {
        self.states
            .iter()
            .filter(|(_, s)| **s == wanted)
            .map(|(f, _)| f.clone())
            .collect()
    }

    /// Issue whatever commands move the current state toward `desired`.
    ///
    /// Feeds with a command in flight are skipped; their acknowledgment
    /// triggers another pass.
    fn reconcile(&mut self) -> Reconciliation {
        let mut out = Reconciliation::default();
        if !self.connected {
            return out;
        }

        let to_leave: Vec<Feed> = self
            .states
            .iter()
            .filter(|(f, s)| **s == FeedState::Joined && !self.desired.contains(*f))
            .map(|(f, _)| f.clone())
            .collect();

        for feed in to_leave {
            match self.ack_mode {
                AckMode::Optimistic => {
                    self.states.remove(&feed);
                    out.released.push(feed.clone());
                }
                AckMode::Acknowledged => {
                    self.states.insert(feed.clone(), FeedState::Leaving);
                }
            }
            out.commands.push(FeedCommand::Leave(feed));
        }

        for feed in &self.desired {
            if self.states.contains_key(feed) {
                continue;
            }
            let state = match self.ack_mode {
                AckMode::Optimistic => FeedState::Joined,
                AckMode::Acknowledged => FeedState::Joining,
            };
            self.states.insert(feed.clone(), state);
            out.commands.push(FeedCommand::Join(feed.clone()));
        }

        out
    }
}
