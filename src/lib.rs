//! # pricefeed-rs
//!
//! A real-time subscription coordinator for a live cryptocurrency price
//! dashboard. One WebSocket connection multiplexes three kinds of feeds:
//!
//! - `GlobalTop(5)`: the top movers, wanted by every view
//! - `GlobalTable`: the landing-page market table
//! - `AssetHistory(id)`: price history for the asset being viewed
//!
//! The coordinator joins exactly the feeds the active view needs, re-joins
//! them after a reconnect, and fans every accepted update out to any number
//! of local subscribers from one cached copy.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pricefeed_rs::{CoordinatorBuilder, Feed};
//!
//! #[tokio::main]
//! async fn main() -> pricefeed_rs::Result<()> {
//!     let coordinator = CoordinatorBuilder::new("ws://localhost:8001/ws").start()?;
//!     let handle = coordinator.handle();
//!
//!     handle.navigate_path("/")?;
//!     let mut table = handle.subscribe(Feed::GlobalTable).await?;
//!     if let Some(update) = table.recv().await {
//!         println!("{} assets", update.payload.len());
//!     }
//!
//!     coordinator.shutdown().await
//! }
//! ```

pub mod constants;
pub mod coordinator;
pub mod error;
pub mod feed;
pub mod types;
pub mod ws;

/// Re-export the coordinator entry points at crate root for convenience.
pub use coordinator::{
    CoordinatorBuilder, CoordinatorConfig, CoordinatorHandle, CoordinatorStatus, FeedCoordinator,
    FeedSubscription,
};
/// Re-export the error type and Result alias.
pub use error::{FeedError, Result};
pub use feed::registry::AckMode;
pub use feed::view::View;
pub use types::{Feed, FeedSet, Payload};
