//! Socket abstraction under the reconnect manager.
//!
//! A [`Connector`] opens one socket and hands back a pair of channels. The
//! manager never touches the socket object itself, so tests can drive it
//! with an in-process connector.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::errors::{ClientError, Result};

/// Upper bound on flushing the close handshake to a peer that stopped reading.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Manager → socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    /// Text message.
    Text(String),
    /// Close handshake; nothing is written after it.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Socket → manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    /// Text message.
    Text(String),
    /// Transport error; a `Closed` follows.
    Error(String),
    /// Socket ended. `code` is `None` when no close frame was received.
    Closed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
}

/// Channels bound to one open socket.
#[derive(Debug)]
pub struct SocketChannels {
    /// Writes to the socket. Dropping it closes the socket.
    pub outgoing: mpsc::UnboundedSender<Outgoing>,
    /// Reads from the socket.
    pub incoming: mpsc::UnboundedReceiver<Incoming>,
}

/// Opens sockets for the manager.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open `url` offering `protocols`. Resolves once the socket is open.
    async fn connect(&self, url: &str, protocols: &[String]) -> Result<SocketChannels>;
}

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str, protocols: &[String]) -> Result<SocketChannels> {
        let mut request = url.into_client_request().map_err(|e| ClientError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        if !protocols.is_empty() {
            let value = HeaderValue::from_str(&protocols.join(", "))
                .map_err(|e| ClientError::InvalidProtocol(e.to_string()))?;
            let _ = request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (ws, _response) = connect_async(request).await.map_err(|e| ClientError::Connect {
            url: url.to_owned(),
            source: Box::new(e),
        })?;
        debug!(url, "socket open");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Incoming>();

        let writer_events = in_tx.clone();
        let _writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                match msg {
                    Outgoing::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            let _ = writer_events.send(Incoming::Error(e.to_string()));
                            break;
                        }
                    }
                    Outgoing::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        break;
                    }
                }
            }
            let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, sink.close()).await;
        });

        let _reader = tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    // Manager let go of the socket; drop the read half so the
                    // connection is released even if the peer never answers.
                    () = in_tx.closed() => return,
                    msg = stream.next() => msg,
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(Incoming::Text(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((None, String::new()), |f| {
                            (Some(u16::from(f.code)), f.reason.as_str().to_owned())
                        });
                        let _ = in_tx.send(Incoming::Closed { code, reason });
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let _ = in_tx.send(Incoming::Error(e.to_string()));
                        break;
                    }
                    None => break,
                }
            }
            let _ = in_tx.send(Incoming::Closed {
                code: None,
                reason: String::new(),
            });
        });

        Ok(SocketChannels {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
