//! Shared value types for threads, messages and transport events.
//!
//! SYSTEM CONTEXT
//! ==============
//! `frames` owns the wire schema; these types are the client-side projection
//! the connection manager publishes and the reconciler stores.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use std::fmt;
use std::time::Duration;

use frames::{HistoryRecord, MessagePayload};
use uuid::Uuid;

/// Identifier of a chat thread, as assigned by the backend.
pub type ThreadId = i64;

/// Identity of a message inside a thread sequence.
///
/// Server ids and provisional ids live in disjoint spaces, so a provisional
/// entry can never collide with a confirmed one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Assigned by the backend once the message is persisted.
    Server(i64),
    /// Generated locally for an optimistic entry that is not confirmed yet.
    Provisional(Uuid),
}

impl MessageId {
    #[must_use]
    pub fn is_provisional(self) -> bool {
        matches!(self, Self::Provisional(_))
    }

    #[must_use]
    pub fn server_id(self) -> Option<i64> {
        match self {
            Self::Server(id) => Some(id),
            Self::Provisional(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Provisional(id) => write!(f, "local-{id}"),
        }
    }
}

/// One reconciled entry of a thread transcript.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadMessage {
    pub id: MessageId,
    pub content: String,
    pub is_bot: bool,
    pub timestamp: String,
}

impl From<&MessagePayload> for ThreadMessage {
    fn from(payload: &MessagePayload) -> Self {
        Self {
            id: MessageId::Server(payload.message_id),
            content: payload.content.clone(),
            is_bot: payload.is_bot,
            timestamp: payload.timestamp.clone(),
        }
    }
}

impl From<&HistoryRecord> for ThreadMessage {
    fn from(record: &HistoryRecord) -> Self {
        Self {
            id: MessageId::Server(record.id),
            content: record.content.clone(),
            is_bot: record.is_bot,
            timestamp: record.timestamp.clone(),
        }
    }
}

impl From<&OutboundMessage> for ThreadMessage {
    fn from(outbound: &OutboundMessage) -> Self {
        Self {
            id: MessageId::Provisional(outbound.provisional_id),
            content: outbound.content.clone(),
            is_bot: false,
            timestamp: outbound.timestamp.clone(),
        }
    }
}

/// A user message written to the socket, with the local id used for its
/// optimistic entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub provisional_id: Uuid,
    pub thread_id: ThreadId,
    pub content: String,
    pub timestamp: String,
}

/// Lifecycle state of the connection manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket; entered at startup and after teardown.
    #[default]
    Idle,
    /// Token request or socket handshake in flight.
    Connecting,
    /// Socket established.
    Open,
    /// Teardown in progress.
    Closing,
    /// Last attempt failed or the socket dropped; a retry timer is armed.
    ReconnectScheduled,
}

/// Typed event published by the connection manager to its subscribers.
///
/// Heartbeat traffic is absorbed by the manager and never appears here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Socket opened; connectivity restored.
    Connected,
    /// An open socket closed or went silent.
    Disconnected { reason: Option<String> },
    /// A retry timer was armed.
    ReconnectScheduled { delay: Duration },
    /// A token fetch or handshake failed. Non-fatal.
    ConnectionError { message: String },
    /// The server sent an `error` frame. The socket stays open.
    ServerError { message: String },
    /// Credentials could not be refreshed. The manager is now idle.
    AuthExpired,
    /// A `message` frame from the server, in delivery order.
    Message(MessagePayload),
    /// A user message was written to the socket.
    Sent(OutboundMessage),
    /// Explicit teardown completed.
    TornDown,
}
