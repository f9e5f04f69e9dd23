//! Fan-out cache: the last payload per feed and its local subscribers.
//!
//! Every feed has at most one entry holding the latest accepted update, the
//! receipt sequence number it was accepted with, and the listeners to notify.
//! Any number of listeners share one entry, so local subscriptions never
//! translate into extra network joins.
//!
//! Sequence numbers are strictly increasing per entry. An entry marked
//! *stale* (its feed was left, or the transport was replaced) restarts its
//! counter: the next update is accepted whatever its sequence and overwrites
//! the old payload. Until then, late subscribers get the old payload with
//! [`FeedUpdate::stale`] set. A left feed's entry is evicted as soon as its
//! last subscriber goes away.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::types::feed::Feed;
use crate::types::market::Payload;

/// One accepted update as seen by subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedUpdate {
    pub feed: Feed,
    pub seq: u64,
    pub payload: Arc<Payload>,
    /// Replayed from a previous session; a fresh update will replace it.
    pub stale: bool,
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscription({})", self.0)
    }
}

/// A subscriber callback. Returning `false` unregisters the listener, which
/// is how channel-backed listeners drop out once their receiver is gone.
pub type Listener = Box<dyn FnMut(&FeedUpdate) -> bool + Send>;

/// Outcome of [`FanoutCache::on_payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Stored and pushed to this many subscribers.
    Accepted { subscribers: usize },
    /// Sequence did not advance past `last_seq`; nothing changed.
    Stale { last_seq: u64 },
}

#[derive(Default)]
struct CacheEntry {
    latest: Option<FeedUpdate>,
    last_seq: u64,
    stale: bool,
    released: bool,
    subscribers: Vec<(SubscriptionId, Listener)>,
}

impl CacheEntry {
    fn baseline(&self) -> u64 {
        if self.stale { 0 } else { self.last_seq }
    }

    /// Nothing left worth keeping once the last subscriber is gone.
    fn is_disposable(&self) -> bool {
        self.subscribers.is_empty() && (self.released || self.latest.is_none())
    }
}

/// Latest value per feed plus subscriber fan-out.
#[derive(Default)]
pub struct FanoutCache {
    entries: HashMap<Feed, CacheEntry>,
    next_id: u64,
}

impl fmt::Debug for FanoutCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (feed, entry) in &self.entries {
            map.entry(
                &feed.room(),
                &format_args!(
                    "seq={} stale={} subscribers={}",
                    entry.last_seq,
                    entry.stale,
                    entry.subscribers.len()
                ),
            );
        }
        map.finish()
    }
}

impl FanoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an update for `feed`.
    ///
    /// Accepted only if `seq` is strictly greater than the entry's last
    /// accepted sequence (zero for a missing or stale entry). An accepted
    /// update replaces the entry and is pushed to every subscriber in
    /// registration order.
    pub fn on_payload(&mut self, feed: Feed, payload: Payload, seq: u64) -> Delivery {
        let entry = self.entries.entry(feed.clone()).or_default();

        let baseline = entry.baseline();
        if seq <= baseline {
            return Delivery::Stale { last_seq: baseline };
        }

        let update = FeedUpdate {
            feed,
            seq,
            payload: Arc::new(payload),
            stale: false,
        };
        entry.last_seq = seq;
        entry.stale = false;
        entry.released = false;
        entry.subscribers.retain_mut(|(_, listener)| listener(&update));
        entry.latest = Some(update);

        Delivery::Accepted {
            subscribers: entry.subscribers.len(),
        }
    }

    /// The sequence number a sequence-less update for `feed` is stamped with.
    ///
    /// `None` once the counter is exhausted; it restarts when the entry goes
    /// stale.
    pub fn next_sequence(&self, feed: &Feed) -> Option<u64> {
        self.entries
            .get(feed)
            .map_or(Some(1), |e| e.baseline().checked_add(1))
    }

    /// Register `listener` for `feed`.
    ///
    /// The cached value, if any, is delivered before this returns, flagged
    /// [`stale`](FeedUpdate::stale) if it predates the current session.
    pub fn subscribe(&mut self, feed: Feed, mut listener: Listener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);

        let entry = self.entries.entry(feed).or_default();
        let keep = match &entry.latest {
            Some(update) if entry.stale => listener(&FeedUpdate {
                stale: true,
                ..update.clone()
            }),
            Some(update) => listener(update),
            None => true,
        };
        if keep {
            entry.subscribers.push((id, listener));
        }
        id
    }

    /// Remove a listener. Returns whether it was registered.
    ///
    /// Never affects the feed's network subscription. Removing the last
    /// subscriber of a left feed (or of one that never got data) evicts it.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some((feed, entry)) = self
            .entries
            .iter_mut()
            .find(|(_, e)| e.subscribers.iter().any(|(sid, _)| *sid == id))
        else {
            return false;
        };
        entry.subscribers.retain(|(sid, _)| *sid != id);
        if entry.is_disposable() {
            let feed = feed.clone();
            self.entries.remove(&feed);
        }
        true
    }

    /// Latest payload for `feed`.
    pub fn get(&self, feed: &Feed) -> Option<Arc<Payload>> {
        self.latest(feed).map(|u| Arc::clone(&u.payload))
    }

    /// Latest update (payload plus sequence) for `feed`.
    pub fn latest(&self, feed: &Feed) -> Option<&FeedUpdate> {
        self.entries.get(feed).and_then(|e| e.latest.as_ref())
    }

    /// Whether `feed` has an entry whose sequence counter will restart.
    pub fn is_stale(&self, feed: &Feed) -> bool {
        self.entries.get(feed).is_some_and(|e| e.stale)
    }

    pub fn subscriber_count(&self, feed: &Feed) -> usize {
        self.entries.get(feed).map_or(0, |e| e.subscribers.len())
    }

    /// Number of feeds with an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The feed was left: evict its entry, or mark it stale if consumers are
    /// still attached so they keep the last known data.
    pub fn release(&mut self, feed: &Feed) {
        let evict = match self.entries.get_mut(feed) {
            Some(entry) if entry.subscribers.is_empty() => true,
            Some(entry) => {
                entry.stale = true;
                entry.released = true;
                false
            }
            None => false,
        };
        if evict {
            self.entries.remove(feed);
        }
    }

    /// The transport was replaced: every entry keeps its payload but restarts
    /// its sequence counter.
    pub fn mark_all_stale(&mut self) {
        for entry in self.entries.values_mut() {
            entry.stale = true;
        }
    }
}
