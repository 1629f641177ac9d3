//! Explicit chat session: one connection, one reconciler, one store.
//!
//! SYSTEM CONTEXT
//! ==============
//! `ChatSession::start` wires the pieces together and owns their lifetime:
//!
//! - a [`ConnectionManager`] driving the socket,
//! - an event pump, the only consumer of transport events, which feeds the
//!   reconciler and turns lifecycle events into user-facing notifications,
//! - the [`MessageReconciler`] and the [`ThreadMessageStore`] it writes.
//!
//! Presentation code reads the store and listens on `notifications()`; it
//! never sees heartbeat traffic or raw frames.
//!
//! Authentication expiry is fatal. Whether it comes from a token fetch or a
//! history fetch, the session tears the connection down, clears every
//! thread and publishes `Notification::AuthExpired`.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ChatApi};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, SendError};
use crate::reconcile::MessageReconciler;
use crate::socket::Connector;
use crate::store::ThreadMessageStore;
use crate::types::{ConnectionState, MessageId, ThreadId, ThreadMessage, TransportEvent};

const NOTIFICATION_CAPACITY: usize = 64;

/// Non-blocking, user-facing status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Connected,
    Reconnecting { delay: Duration },
    ConnectionError { message: String },
    ServerError { message: String },
    AuthExpired,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Api(ApiError),
    #[error("authentication expired")]
    AuthExpired,
    #[error("session has shut down")]
    Shutdown,
}

impl From<SendError> for SessionError {
    fn from(error: SendError) -> Self {
        match error {
            SendError::NotConnected => Self::NotConnected,
            SendError::Shutdown => Self::Shutdown,
        }
    }
}

pub struct ChatSession {
    connection: ConnectionManager,
    api: Arc<dyn ChatApi>,
    reconciler: Arc<Mutex<MessageReconciler>>,
    store: ThreadMessageStore,
    notifications: broadcast::Sender<Notification>,
    pump: JoinHandle<()>,
}

impl ChatSession {
    /// Spawn the connection manager and event pump, then start connecting.
    #[must_use]
    pub fn start(config: ClientConfig, api: Arc<dyn ChatApi>, connector: Arc<dyn Connector>) -> Self {
        let store = ThreadMessageStore::new();
        let reconciler = Arc::new(Mutex::new(MessageReconciler::new(store.clone(), config.transport.pair_window)));
        let connection = ConnectionManager::spawn(config, Arc::clone(&api), connector);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let pump = tokio::spawn(pump(
            connection.subscribe(),
            connection.clone(),
            Arc::clone(&reconciler),
            notifications.clone(),
        ));
        connection.connect();
        info!("chat session started");

        Self { connection, api, reconciler, store, notifications, pump }
    }

    /// Load a thread's history and make sure the socket is live.
    ///
    /// Frames for the thread that arrive while the history is loading are
    /// held and applied after it, so nothing is lost or duplicated.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AuthExpired`] (after tearing the session down)
    /// when credentials cannot be refreshed, or [`SessionError::Api`] for
    /// other fetch failures.
    pub async fn open_thread(&self, thread_id: ThreadId) -> Result<Arc<[ThreadMessage]>, SessionError> {
        self.connection.connect();
        lock(&self.reconciler).begin_seed(thread_id);

        match self.api.thread_history(thread_id).await {
            Ok(history) => {
                let mut reconciler = lock(&self.reconciler);
                if !reconciler.is_loading(thread_id) {
                    debug!(thread_id, "thread left while history was loading");
                    return Ok(self.store.get(thread_id));
                }
                let replayed = reconciler.complete_seed(thread_id, &history);
                drop(reconciler);
                info!(thread_id, history = history.len(), replayed = replayed.len(), "thread opened");
                Ok(self.store.get(thread_id))
            }
            Err(ApiError::AuthExpired) => {
                lock(&self.reconciler).abort_seed(thread_id);
                expire(&self.connection, &self.reconciler, &self.notifications).await;
                Err(SessionError::AuthExpired)
            }
            Err(error) => {
                lock(&self.reconciler).abort_seed(thread_id);
                warn!(thread_id, error = %error, "history fetch failed");
                Err(SessionError::Api(error))
            }
        }
    }

    /// Send a user message and show it immediately as a provisional entry.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] unless the socket is open; a
    /// connection attempt is started and nothing is queued.
    pub async fn send(&self, thread_id: ThreadId, content: impl Into<String>) -> Result<MessageId, SessionError> {
        let outbound = self.connection.send(thread_id, content).await?;
        lock(&self.reconciler).insert_provisional(&outbound);
        Ok(MessageId::Provisional(outbound.provisional_id))
    }

    #[must_use]
    pub fn messages(&self, thread_id: ThreadId) -> Arc<[ThreadMessage]> {
        self.store.get(thread_id)
    }

    #[must_use]
    pub fn store(&self) -> &ThreadMessageStore {
        &self.store
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    #[must_use]
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Drop a thread's messages; reopening it fetches history again. A
    /// history fetch still in flight for the thread is discarded.
    pub fn leave_thread(&self, thread_id: ThreadId) {
        lock(&self.reconciler).forget(thread_id);
        debug!(thread_id, "left thread");
    }

    /// Tear down, clear every thread and end the server session.
    pub async fn logout(&self) {
        self.connection.teardown().await;
        lock(&self.reconciler).reset();
        if let Err(error) = self.api.logout().await {
            warn!(error = %error, "logout request failed");
        }
        info!("logged out");
    }

    /// Tear down the connection without contacting the server. Stored
    /// messages are kept.
    pub async fn shutdown(&self) {
        self.connection.teardown().await;
        info!("chat session shut down");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn lock(reconciler: &Mutex<MessageReconciler>) -> MutexGuard<'_, MessageReconciler> {
    reconciler.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn expire(
    connection: &ConnectionManager,
    reconciler: &Mutex<MessageReconciler>,
    notifications: &broadcast::Sender<Notification>,
) {
    warn!("authentication expired; ending session");
    connection.teardown().await;
    lock(reconciler).reset();
    let _ = notifications.send(Notification::AuthExpired);
}

async fn pump(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    connection: ConnectionManager,
    reconciler: Arc<Mutex<MessageReconciler>>,
    notifications: broadcast::Sender<Notification>,
) {
    while let Some(event) = events.recv().await {
        let notification = match event {
            TransportEvent::Message(payload) => {
                lock(&reconciler).apply_inbound(&payload);
                continue;
            }
            TransportEvent::Sent(outbound) => {
                lock(&reconciler).insert_provisional(&outbound);
                continue;
            }
            TransportEvent::AuthExpired => {
                expire(&connection, &reconciler, &notifications).await;
                continue;
            }
            TransportEvent::Disconnected { .. } | TransportEvent::TornDown => continue,
            TransportEvent::Connected => Notification::Connected,
            TransportEvent::ReconnectScheduled { delay } => Notification::Reconnecting { delay },
            TransportEvent::ConnectionError { message } => Notification::ConnectionError { message },
            TransportEvent::ServerError { message } => Notification::ServerError { message },
        };
        let _ = notifications.send(notification);
    }
}
