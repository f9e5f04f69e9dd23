//! Data types shared by the coordinator and its consumers.
//!
//! ## Organization
//!
//! - [`feed`]: Feed identity, wire room identifiers, and feed sets
//! - [`market`]: Asset snapshots, price points, and update payloads
//! - [`rates`]: Exchange-rate lookup interface for display conversion
//!
//! The most used items are re-exported at the module root.

pub mod feed;
pub mod market;
pub mod rates;

pub use feed::{AssetId, Feed, FeedKind, FeedSet};
pub use market::{AssetSnapshot, Payload, PricePoint};
pub use rates::{ExchangeRate, RateLookup, RateTable};
