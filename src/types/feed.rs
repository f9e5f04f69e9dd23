//! Feed identity: the three logical streams multiplexed over one connection.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{GLOBAL_TABLE_SIZE, GLOBAL_TOP_SIZE, feed_ids};
use crate::error::{FeedError, Result};

/// A deterministic, ordered set of feeds.
pub type FeedSet = BTreeSet<Feed>;

// ---------------------------------------------------------------------------
// Asset identifier
// ---------------------------------------------------------------------------

/// Identifier of one asset as used by the market-data service (e.g. `"bitcoin"`).
///
/// Identifiers are trimmed and lower-cased on construction so that `/Bitcoin`
/// and `/bitcoin` resolve to the same feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(String);

impl AssetId {
    /// Create a normalized asset identifier.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(FeedError::InvalidArgument("asset id must not be empty".into()));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(FeedError::InvalidArgument(format!(
                "asset id must not contain whitespace: {id:?}"
            )));
        }
        Ok(Self(id.to_ascii_lowercase()))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// One logical, independently subscribable stream of market data.
///
/// On the wire a feed is addressed by its room identifier:
///
/// | Variant              | Room                      |
/// |----------------------|---------------------------|
/// | `GlobalTop(5)`       | `global-top:5`            |
/// | `GlobalTable`        | `global-table`            |
/// | `AssetHistory(btc)`  | `asset-history:btc`       |
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Feed {
    /// Small ranked set of the top `k` assets, subscribed for the whole session.
    GlobalTop(usize),
    /// Large ranked table, subscribed while the landing view is active.
    GlobalTable,
    /// Price history of one asset, subscribed while its detail view is active.
    AssetHistory(AssetId),
}

/// The payload shape a feed carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// A ranked list of asset snapshots.
    Ranked,
    /// A timestamp-ordered list of price points.
    History,
}

impl Feed {
    /// The always-on top movers feed (`GlobalTop(5)`).
    pub fn top() -> Self {
        Self::GlobalTop(GLOBAL_TOP_SIZE)
    }

    /// The price-history feed for `asset`.
    pub fn asset(asset: impl AsRef<str>) -> Result<Self> {
        AssetId::new(asset).map(Self::AssetHistory)
    }

    /// Payload shape carried by this feed.
    pub fn kind(&self) -> FeedKind {
        match self {
            Self::GlobalTop(_) | Self::GlobalTable => FeedKind::Ranked,
            Self::AssetHistory(_) => FeedKind::History,
        }
    }

    /// Maximum number of ranked entries kept for this feed, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            Self::GlobalTop(k) => Some(*k),
            Self::GlobalTable => Some(GLOBAL_TABLE_SIZE),
            Self::AssetHistory(_) => None,
        }
    }

    /// The room identifier used in protocol frames.
    pub fn room(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GlobalTop(k) => write!(f, "{}:{k}", feed_ids::GLOBAL_TOP),
            Self::GlobalTable => f.write_str(feed_ids::GLOBAL_TABLE),
            Self::AssetHistory(id) => write!(f, "{}:{id}", feed_ids::ASSET_HISTORY),
        }
    }
}

impl FromStr for Feed {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self> {
        let (tag, arg) = match s.split_once(':') {
            Some((tag, arg)) => (tag, Some(arg)),
            None => (s, None),
        };

        match (tag, arg) {
            (feed_ids::GLOBAL_TABLE, None) => Ok(Self::GlobalTable),
            (feed_ids::GLOBAL_TOP, Some(k)) => k
                .parse::<usize>()
                .ok()
                .filter(|k| *k > 0)
                .map(Self::GlobalTop)
                .ok_or_else(|| FeedError::UnknownFeed(s.to_owned())),
            (feed_ids::ASSET_HISTORY, Some(id)) => {
                AssetId::new(id).map(Self::AssetHistory).map_err(|_| FeedError::UnknownFeed(s.to_owned()))
            }
            _ => Err(FeedError::UnknownFeed(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Feed {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Feed> for String {
    fn from(feed: Feed) -> Self {
        feed.to_string()
    }
}
