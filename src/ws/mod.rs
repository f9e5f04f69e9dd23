//! Push transport plumbing.
//!
//! ## [`connection`]: Connection Manager
//!
//! Owns the single transport to the market-data service: idempotent connect,
//! explicit disconnect, exponential-backoff reconnects, and an epoch counter
//! so results from superseded attempts are ignored.
//!
//! ## [`transport`]: Transports
//!
//! The [`Connector`](transport::Connector) trait and its `tokio-tungstenite`
//! implementation. A transport is a pair of text-frame channels, which keeps
//! the rest of the crate independent of the socket library.
//!
//! ## [`protocol`]: Wire Frames
//!
//! JSON `join`/`leave` requests and `update`/`joined`/`left`/`error` frames.

pub mod connection;
pub mod protocol;
pub mod transport;
