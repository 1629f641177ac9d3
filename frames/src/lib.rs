//! Shared frame model and JSON codec for the chat socket.
//!
//! This crate owns the wire representation used by the transport library and
//! the CLI. Socket frames are JSON objects discriminated by a `type` field;
//! history records share the message payload fields but come from the HTTP
//! history endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error returned by [`decode_inbound`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not JSON, or a required field is absent or mistyped.
    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),
    /// The frame is not an object carrying a string `type` field.
    #[error("frame has no `type` field")]
    MissingType,
    /// The `type` field names a frame this client does not understand.
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

/// Frame types this client accepts from the server.
const INBOUND_TYPES: [&str; 4] = ["ping", "pong", "error", "message"];

/// A frame received from the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundFrame {
    /// Server liveness probe; must be answered with [`OutboundFrame::Pong`].
    Ping,
    /// Liveness answer.
    Pong,
    /// Protocol-level error, shown to the user. The connection stays open.
    Error(ErrorPayload),
    /// A persisted chat message, either an echo of our own send or a bot reply.
    Message(MessagePayload),
}

/// Payload of an `error` frame.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description. The backend sends this as `message`.
    #[serde(default, alias = "message")]
    pub content: Option<String>,
}

/// Payload of an inbound `message` frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    /// Thread the message belongs to.
    pub thread_id: i64,
    /// Server-assigned message identifier.
    pub message_id: i64,
    /// Message body.
    pub content: String,
    /// True for assistant replies.
    pub is_bot: bool,
    /// Server timestamp, passed through verbatim.
    pub timestamp: String,
}

/// A frame sent by this client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Answer to a server `ping`.
    Pong,
    /// A user-authored chat message.
    Message(SendPayload),
}

/// Payload of an outbound `message` frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendPayload {
    /// Target thread.
    pub thread_id: i64,
    /// Message body.
    pub content: String,
    /// Always `false` for client-authored messages.
    pub is_bot: bool,
    /// Client clock at send time (RFC 3339).
    pub timestamp: String,
}

/// One entry of `GET /chat/threads/{id}/messages`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Server-assigned message identifier.
    #[serde(alias = "message_id")]
    pub id: i64,
    /// Owning thread, when the endpoint includes it.
    #[serde(default)]
    pub thread_id: Option<i64>,
    /// Message body.
    pub content: String,
    /// True for assistant replies.
    #[serde(default)]
    pub is_bot: bool,
    /// Server timestamp, passed through verbatim.
    #[serde(default, alias = "created_at")]
    pub timestamp: String,
}

/// Decode one text frame from the socket.
///
/// # Errors
///
/// Returns [`CodecError::MissingType`] when the frame is not an object with a
/// string `type`, [`CodecError::UnknownType`] for types outside the protocol,
/// and [`CodecError::Decode`] for invalid JSON or missing payload fields.
pub fn decode_inbound(text: &str) -> Result<InboundFrame, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        return Err(CodecError::MissingType);
    };
    if !INBOUND_TYPES.contains(&kind) {
        return Err(CodecError::UnknownType(kind.to_owned()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Encode a frame for the socket.
#[must_use]
pub fn encode_outbound(frame: &OutboundFrame) -> String {
    // Serializing these plain structs cannot fail: no maps with non-string
    // keys and no fallible `Serialize` impls are involved.
    serde_json::to_string(frame).unwrap_or_default()
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
