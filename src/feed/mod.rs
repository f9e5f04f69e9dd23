//! Feed bookkeeping: what the UI wants, what the server has, what we cached.
//!
//! ## [`view`]: View Binding
//!
//! Maps the active logical view to the set of feeds it needs.
//!
//! ## [`registry`]: Feed Registry
//!
//! Diffs the desired feed set against the joined one and emits join/leave
//! commands, one in flight per feed.
//!
//! ## [`cache`]: Fan-out Cache
//!
//! Holds the latest payload per feed and pushes accepted updates to every
//! local subscriber.
//!
//! All three are synchronous state machines; the
//! [`coordinator`](crate::coordinator) event loop drives them.

pub mod cache;
pub mod registry;
pub mod view;
