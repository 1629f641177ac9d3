//! WebSocket connector bridging a socket onto an ordered channel pair.
//!
//! DESIGN
//! ======
//! The connection manager never touches a socket directly. It holds a
//! `SocketLink`: an outbound text sender and an inbound event receiver. The
//! real connector spawns a pump task that owns the tungstenite stream and
//! runs a send loop and a receive loop until either side finishes. Dropping
//! the link closes the socket.
//!
//! The pump reports exactly one `SocketEvent::Closed`, whatever ended the
//! connection (close frame, transport error, end of stream).

#[cfg(test)]
#[path = "socket_test.rs"]
mod socket_test;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("websocket connect failed: {0}")]
    Connect(Box<tokio_tungstenite::tungstenite::Error>),
}

/// Something that happened on the socket, in delivery order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    Closed { reason: Option<String> },
}

/// Client side of an open socket.
#[derive(Debug)]
pub struct SocketLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Far side of a [`SocketLink`]: whatever moves bytes on the wire.
#[derive(Debug)]
pub struct SocketRemote {
    pub sent: mpsc::UnboundedReceiver<String>,
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

impl SocketLink {
    /// Create a connected link/remote pair.
    #[must_use]
    pub fn pair() -> (Self, SocketRemote) {
        let (outbound, sent) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        (Self { outbound, inbound }, SocketRemote { sent, events })
    }

    /// Queue a text frame. Returns `false` if the socket is gone.
    pub fn send_text(&self, text: String) -> bool {
        self.outbound.send(text).is_ok()
    }
}

/// Opens sockets for the connection manager.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Perform the WebSocket handshake at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails.
    async fn open(&self, url: &str) -> Result<SocketLink, SocketError>;
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait::async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &str) -> Result<SocketLink, SocketError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|error| SocketError::Connect(Box::new(error)))?;
        let (link, remote) = SocketLink::pair();
        tokio::spawn(pump(stream, remote));
        Ok(link)
    }
}

type Stream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn pump(stream: Stream, mut remote: SocketRemote) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            outgoing = remote.sent.recv() => {
                let Some(text) = outgoing else {
                    // Link dropped by the owner: close politely.
                    debug!("socket link dropped; closing");
                    let _ = write.send(Message::Close(None)).await;
                    return;
                };
                if let Err(error) = write.send(Message::Text(text.into())).await {
                    warn!(error = %error, "socket send failed");
                    let _ = remote.events.send(SocketEvent::Closed { reason: Some(error.to_string()) });
                    return;
                }
            }
            incoming = read.next() => {
                let event = match incoming {
                    Some(Ok(Message::Text(text))) => SocketEvent::Text(text.as_str().to_owned()),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.as_str().to_owned()).filter(|r| !r.is_empty());
                        SocketEvent::Closed { reason }
                    }
                    // Binary frames are not part of the protocol; tungstenite
                    // answers transport-level pings itself.
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => SocketEvent::Closed { reason: Some(error.to_string()) },
                    None => SocketEvent::Closed { reason: None },
                };
                let closed = matches!(event, SocketEvent::Closed { .. });
                if remote.events.send(event).is_err() {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                }
                if closed {
                    return;
                }
            }
        }
    }
}
