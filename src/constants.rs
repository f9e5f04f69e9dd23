//! Constants for the price feed coordinator.
//!
//! Contains the default endpoint, feed sizes, wire identifiers and the
//! reconnection defaults. These are used internally by the coordinator and
//! the WebSocket connector, but are also exported for advanced usage.

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Default market-data push endpoint (local development service).
pub const DEFAULT_FEED_URL: &str = "ws://localhost:8001/ws";

/// Environment variable read by the `feed_watch` binary for the endpoint.
pub const FEED_URL_ENV: &str = "PRICEFEED_URL";

// ---------------------------------------------------------------------------
// Feed sizes
// ---------------------------------------------------------------------------

/// Number of assets in the always-on top movers feed.
pub const GLOBAL_TOP_SIZE: usize = 5;

/// Number of assets in the landing-view table feed.
pub const GLOBAL_TABLE_SIZE: usize = 50;

// ---------------------------------------------------------------------------
// Wire identifiers
// ---------------------------------------------------------------------------

/// Feed identifier prefixes used in join/leave/update frames.
pub mod feed_ids {
    /// `global-top:<k>`
    pub const GLOBAL_TOP: &str = "global-top";
    /// `global-table`
    pub const GLOBAL_TABLE: &str = "global-table";
    /// `asset-history:<asset id>`
    pub const ASSET_HISTORY: &str = "asset-history";
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Inbound frames the coordinator handles in a row before it checks for a
/// pending command.
pub const MAX_FRAMES_PER_TURN: usize = 64;

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

/// Reconnection and connect-timeout defaults.
pub mod reconnect {
    /// First retry delay after an unexpected transport loss.
    pub const INITIAL_DELAY_MS: u64 = 500;
    /// Upper bound for the retry delay.
    pub const MAX_DELAY_MS: u64 = 30_000;
    /// Exponential growth factor between attempts.
    pub const BACKOFF_MULTIPLIER: u32 = 2;
    /// Maximum attempts before giving up (0 = unlimited).
    pub const MAX_ATTEMPTS: u32 = 0;
    /// Time allowed for one transport to open.
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
}
