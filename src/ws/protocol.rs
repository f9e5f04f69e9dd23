//! JSON frames exchanged with the market-data service.
//!
//! Every frame is a text message with a `type` tag:
//!
//! ```text
//! → {"type":"join","feed":"asset-history:bitcoin"}
//! → {"type":"leave","feed":"global-table"}
//! ← {"type":"update","feed":"global-top:5","seq":42,"payload":{"cryptos":[...]}}
//! ← {"type":"update","feed":"asset-history:bitcoin","payload":{"data":[...]}}
//! ← {"type":"joined","feed":"global-table"}
//! ← {"type":"left","feed":"global-table"}
//! ← {"type":"error","message":"..."}
//! ```
//!
//! `seq` is optional; sequence-less updates are stamped locally on receipt.
//! `joined`/`left` are only sent by services that acknowledge room changes.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::feed::registry::FeedCommand;
use crate::types::feed::Feed;
use crate::types::market::Payload;

/// A frame sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join { feed: Feed },
    Leave { feed: Feed },
}

impl From<FeedCommand> for ClientFrame {
    fn from(cmd: FeedCommand) -> Self {
        match cmd {
            FeedCommand::Join(feed) => Self::Join { feed },
            FeedCommand::Leave(feed) => Self::Leave { feed },
        }
    }
}

/// A frame received from the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Update {
        feed: Feed,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq: Option<u64>,
        payload: Payload,
    },
    Joined {
        feed: Feed,
    },
    Left {
        feed: Feed,
    },
    Error {
        message: String,
    },
}

/// Serialize an outbound frame.
pub fn encode(frame: &ClientFrame) -> Result<String> {
    Ok(serde_json::to_string(frame)?)
}

/// Parse an inbound frame.
///
/// Unknown frame types, unknown feed identifiers and payloads of the wrong
/// shape are all rejected here; the caller discards the frame.
pub fn decode(text: &str) -> Result<ServerFrame> {
    Ok(serde_json::from_str(text)?)
}
