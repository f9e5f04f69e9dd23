//! Error types for the `pricefeed-rs` crate.
//!
//! All fallible operations in this crate return [`Result<T>`], which is an
//! alias for `std::result::Result<T, FeedError>`.
//!
//! [`FeedError`] covers:
//! - **Transport errors**: WebSocket failures, connect timeouts, closed transports
//! - **Protocol errors**: Malformed or mismatched inbound frames
//! - **JSON errors**: Frame (de)serialization failures
//! - **URL errors**: Malformed endpoint URLs
//! - **Invalid arguments**: Client-side validation errors
//! - **Coordinator stopped**: The event loop is no longer running
//!
//! None of these ever reach feed consumers: transport errors are absorbed by
//! the reconnection policy and protocol errors discard the offending frame.

/// All possible errors produced by `pricefeed-rs`.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// A WebSocket-level error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The transport did not open within the configured timeout.
    #[error("connect timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The transport closed underneath a pending operation.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// An inbound frame was well-formed JSON but violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A feed identifier could not be parsed.
    #[error("unknown feed identifier: {0}")]
    UnknownFeed(String),

    /// Failed to (de)serialize a JSON frame.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error building or parsing a URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The coordinator event loop has shut down.
    #[error("coordinator is not running")]
    CoordinatorStopped,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

impl FeedError {
    /// Whether the error belongs to the transport class, i.e. is recovered by
    /// reconnecting rather than by discarding a frame.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::ConnectTimeout { .. } | Self::ConnectionClosed(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FeedError>;
