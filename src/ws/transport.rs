//! Transport abstraction and the WebSocket connector.
//!
//! A [`Connector`] opens one [`Transport`]: a pair of text-frame channels.
//! Closing the inbound channel signals transport loss; dropping the outbound
//! sender closes the transport. The coordinator only ever talks to these
//! channels, so tests can plug in an in-memory connector.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::{FeedError, Result};

/// An open transport, as text-frame channels.
#[derive(Debug)]
pub struct Transport {
    /// Frames to write to the service.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames read from the service, in arrival order. Closed on loss.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

impl Transport {
    /// Build a transport plus the far ends of both channels.
    ///
    /// The far ends are what a connector implementation pumps into and out of.
    pub fn channel() -> (
        Self,
        mpsc::UnboundedReceiver<String>,
        mpsc::UnboundedSender<String>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            out_rx,
            in_tx,
        )
    }
}

/// Opens transports to the market-data service.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a fresh transport.
    async fn connect(&self) -> Result<Transport>;
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
}

impl WebSocketConnector {
    /// Create a connector for `url`.
    ///
    /// `http://` and `https://` URLs are mapped to `ws://` and `wss://`.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: normalize_ws_url(url)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Transport> {
        let (ws, _resp) = connect_async(self.url.as_str()).await?;
        let (mut write, mut read) = ws.split();
        let (transport, mut out_rx, in_tx) = Transport::channel();

        tracing::info!(url = %self.url, "Connected to market-data WebSocket");

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    tracing::warn!(error = %e, "WebSocket write failed");
                    return;
                }
            }
            // outbound sender dropped: the manager is done with this transport
            let _ = write.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text.to_string(),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!(len = data.len(), "Dropping non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "WebSocket closed by server");
                        break;
                    }
                    // ping/pong handled by tungstenite
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                };
                if in_tx.send(text).is_err() {
                    break;
                }
            }
        });

        Ok(transport)
    }
}

/// Validate `raw` and map HTTP schemes onto their WebSocket equivalents.
pub fn normalize_ws_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(FeedError::InvalidArgument(format!(
                "unsupported URL scheme for a push connection: {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| FeedError::InvalidArgument(format!("cannot use {scheme} for {raw}")))?;
    Ok(url)
}
