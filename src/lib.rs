//! # threadline
//!
//! Real-time session transport for a chat client: one persistent socket per
//! session, authenticated with a single-use token from the HTTP API, kept
//! alive with an in-band heartbeat and reconnected with backoff when it
//! drops. Server frames, fetched history and optimistic local sends are
//! merged into one duplicate-free sequence per thread.
//!
//! Start with [`ChatSession::start`]; lower layers are public for callers
//! that need to drive the connection themselves.

pub mod api;
pub mod backoff;
pub mod config;
pub mod connection;
pub mod heartbeat;
pub mod reconcile;
pub mod session;
pub mod socket;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use api::{ApiClient, ApiError, ChatApi, SessionToken};
pub use config::{ClientConfig, ConfigError, TransportConfig};
pub use connection::{ConnectionManager, SendError};
pub use reconcile::{Applied, MessageReconciler};
pub use session::{ChatSession, Notification, SessionError};
pub use socket::{Connector, SocketError, SocketEvent, SocketLink, TungsteniteConnector};
pub use store::ThreadMessageStore;
pub use types::{ConnectionState, MessageId, OutboundMessage, ThreadId, ThreadMessage, TransportEvent};
