//! Transport seam of the [`ConnectionManager`](crate::client::ConnectionManager).
//!
//! A [`Connector`] opens one link and hands it back as a pair of channels; the manager never
//! touches sockets directly, which keeps it testable with scripted connectors.

use futures::{SinkExt, StreamExt, future::BoxFuture};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Failure to open or use a link.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The server could not be reached or refused the handshake.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The link is gone.
    #[error("link closed")]
    Closed,
}

/// Something observed on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Message(String),
    /// The link ended. `by_server` is set when the server closed it deliberately.
    Closed { by_server: bool },
}

/// Open link: frames pushed into `outbound` are written in order, inbound frames and the final
/// close arrive on `inbound`. Dropping `outbound` closes the link.
#[derive(Debug)]
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport {
    /// Queue a frame on the link.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }
}

/// Factory for links to one server.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'static, Result<Transport, TransportError>>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Connector for a `ws://` or `wss://` endpoint, usually ending in `/ws`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Transport, TransportError>> {
        let url = self.url.clone();
        Box::pin(async move {
            let (stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|err| TransportError::Connect(err.to_string()))?;
            let (mut sink, mut source) = stream.split();
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

            tokio::spawn(async move {
                while let Some(frame) = outbound_rx.recv().await {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                let closed = loop {
                    match source.next().await {
                        Some(Ok(Message::Text(text))) => {
                            let event = TransportEvent::Message(text.as_str().to_owned());
                            if inbound_tx.send(event).is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) => break TransportEvent::Closed { by_server: true },
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            debug!(error = %err, "websocket link failed");
                            break TransportEvent::Closed { by_server: false };
                        }
                        None => break TransportEvent::Closed { by_server: false },
                    }
                };
                let _ = inbound_tx.send(closed);
            });

            debug!(%url, "websocket link open");
            Ok(Transport {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        })
    }
}
