//! Connection manager: one persistent socket per session.
//!
//! DESIGN
//! ======
//! `ConnectionManager::spawn` starts a driver task that owns every piece of
//! connection state. The handle talks to it over a command channel; the
//! driver handles one event at a time to completion in a `select!` loop:
//!
//! - commands from handles (connect / send / teardown)
//! - completions of spawned work (connection attempt, reconnect timer)
//! - events from the open socket
//! - the heartbeat idle deadline
//!
//! Only the attempt task and the timer suspend. Both carry the generation
//! they were started under and re-enter the loop as internal events; a
//! completion from a superseded generation is discarded, and a socket opened
//! by a stale attempt is dropped on the spot.
//!
//! LIFECYCLE
//! =========
//! Idle → Connecting → Open → (close) → ReconnectScheduled → Connecting ...
//! Any state → Closing → Idle on teardown. Auth expiry → Idle, no retry.

#[cfg(test)]
#[path = "connection_test.rs"]
mod connection_test;

use std::future;
use std::sync::{Arc, Mutex, PoisonError};

use frames::{InboundFrame, OutboundFrame, SendPayload, decode_inbound, encode_outbound};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{ApiError, ChatApi};
use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::heartbeat::{Heartbeat, Screened, screen};
use crate::socket::{Connector, SocketError, SocketEvent, SocketLink};
use crate::types::{ConnectionState, OutboundMessage, ThreadId, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("connection manager has shut down")]
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("token request failed: {0}")]
    Token(ApiError),
    #[error("{0}")]
    Handshake(SocketError),
    #[error("connection attempt timed out")]
    Timeout,
}

// =============================================================================
// OBSERVERS
// =============================================================================

/// Lossless fan-out of transport events. Closed receivers are pruned on
/// the next publish.
#[derive(Clone, Default)]
struct Observers(Arc<Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>>);

impl Observers {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
        rx
    }

    fn publish(&self, event: &TransportEvent) {
        let mut observers = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

// =============================================================================
// HANDLE
// =============================================================================

enum Command {
    Connect,
    Send { thread_id: ThreadId, content: String, reply: oneshot::Sender<Result<OutboundMessage, SendError>> },
    Teardown { done: oneshot::Sender<()> },
}

/// Handle to the connection driver. Cheap to clone; the driver stops once
/// every handle is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    observers: Observers,
}

impl ConnectionManager {
    /// Spawn the driver task. The manager starts `Idle`.
    #[must_use]
    pub fn spawn(config: ClientConfig, api: Arc<dyn ChatApi>, connector: Arc<dyn Connector>) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let observers = Observers::default();

        let driver = Driver::new(Arc::new(config), api, connector, state_tx, observers.clone(), internal_tx);
        tokio::spawn(driver.run(commands_rx, internal_rx));

        Self { commands, state, observers }
    }

    /// Ensure a socket is open or being opened. No-op while connecting or open.
    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    /// Write a user message to the open socket.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotConnected`] unless the socket is open, after
    /// triggering one connection attempt. Nothing is queued.
    pub async fn send(&self, thread_id: ThreadId, content: impl Into<String>) -> Result<OutboundMessage, SendError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { thread_id, content: content.into(), reply })
            .map_err(|_| SendError::Shutdown)?;
        rx.await.map_err(|_| SendError::Shutdown)?
    }

    /// Cancel timers and in-flight work, close the socket and go `Idle`.
    /// No automatic reconnection happens until [`ConnectionManager::connect`].
    pub async fn teardown(&self) {
        let (done, rx) = oneshot::channel();
        if self.commands.send(Command::Teardown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Receive every event published from now on, in order.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.observers.subscribe()
    }
}

// =============================================================================
// DRIVER
// =============================================================================

enum Internal {
    Opened { attempt: u64, result: Result<SocketLink, AttemptError> },
    ReconnectDue { generation: u64 },
}

enum Event {
    Command(Command),
    Internal(Internal),
    Socket(SocketEvent),
    IdleTimeout,
    Stop,
}

struct Driver {
    config: Arc<ClientConfig>,
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn Connector>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    observers: Observers,
    internal_tx: mpsc::UnboundedSender<Internal>,
    socket: Option<SocketLink>,
    attempt: u64,
    in_flight: Option<JoinHandle<()>>,
    timer_generation: u64,
    timer: Option<JoinHandle<()>>,
    backoff: Backoff,
    heartbeat: Heartbeat,
}

impl Driver {
    fn new(
        config: Arc<ClientConfig>,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn Connector>,
        state_tx: watch::Sender<ConnectionState>,
        observers: Observers,
        internal_tx: mpsc::UnboundedSender<Internal>,
    ) -> Self {
        let backoff = Backoff::from_config(&config.transport);
        let heartbeat = Heartbeat::new(config.transport.idle_timeout);
        Self {
            config,
            api,
            connector,
            state: ConnectionState::Idle,
            state_tx,
            observers,
            internal_tx,
            socket: None,
            attempt: 0,
            in_flight: None,
            timer_generation: 0,
            timer: None,
            backoff,
            heartbeat,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            let deadline = self.heartbeat.deadline();
            let event = tokio::select! {
                command = commands.recv() => command.map_or(Event::Stop, Event::Command),
                Some(completion) = internal.recv() => Event::Internal(completion),
                socket_event = next_socket_event(self.socket.as_mut()) => Event::Socket(socket_event),
                () = idle_deadline(deadline) => Event::IdleTimeout,
            };

            match event {
                Event::Command(Command::Connect) => self.connect(),
                Event::Command(Command::Send { thread_id, content, reply }) => {
                    let _ = reply.send(self.send(thread_id, content));
                }
                Event::Command(Command::Teardown { done }) => {
                    self.teardown();
                    self.publish(&TransportEvent::TornDown);
                    let _ = done.send(());
                }
                Event::Internal(Internal::Opened { attempt, result }) => self.on_opened(attempt, result),
                Event::Internal(Internal::ReconnectDue { generation }) => self.on_reconnect_due(generation),
                Event::Socket(SocketEvent::Text(text)) => self.on_text(&text),
                Event::Socket(SocketEvent::Closed { reason }) => self.on_closed(reason),
                Event::IdleTimeout => {
                    warn!(attempt = self.attempt, "no inbound traffic within idle timeout; dropping socket");
                    self.on_closed(Some("idle timeout".to_owned()));
                }
                Event::Stop => break,
            }
        }

        self.teardown();
        debug!("connection driver stopped");
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "connection state");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn publish(&self, event: &TransportEvent) {
        self.observers.publish(event);
    }

    // -------------------------------------------------------------------------
    // CONNECT
    // -------------------------------------------------------------------------

    fn connect(&mut self) {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            return;
        }
        self.cancel_timer();
        self.attempt += 1;
        let attempt = self.attempt;
        self.set_state(ConnectionState::Connecting);
        info!(attempt, "connecting");

        let config = Arc::clone(&self.config);
        let api = Arc::clone(&self.api);
        let connector = Arc::clone(&self.connector);
        let tx = self.internal_tx.clone();
        self.in_flight = Some(tokio::spawn(async move {
            let timeout = config.transport.connect_timeout;
            let result = tokio::time::timeout(timeout, open_socket(&config, api.as_ref(), connector.as_ref()))
                .await
                .unwrap_or(Err(AttemptError::Timeout));
            let _ = tx.send(Internal::Opened { attempt, result });
        }));
    }

    fn on_opened(&mut self, attempt: u64, result: Result<SocketLink, AttemptError>) {
        if attempt != self.attempt || self.state != ConnectionState::Connecting {
            debug!(attempt, current = self.attempt, "discarding stale connection attempt");
            return;
        }
        self.in_flight = None;

        match result {
            Ok(link) => {
                self.socket = Some(link);
                self.cancel_timer();
                self.backoff.reset();
                self.heartbeat.start(Instant::now());
                self.set_state(ConnectionState::Open);
                info!(attempt, "connected");
                self.publish(&TransportEvent::Connected);
            }
            Err(AttemptError::Token(error)) if error.is_auth_expired() => {
                warn!(attempt, "authentication expired; not reconnecting");
                self.set_state(ConnectionState::Idle);
                self.publish(&TransportEvent::AuthExpired);
            }
            Err(error) => {
                warn!(attempt, error = %error, "connection attempt failed");
                self.publish(&TransportEvent::ConnectionError { message: error.to_string() });
                self.schedule_reconnect();
            }
        }
    }

    // -------------------------------------------------------------------------
    // RECONNECT TIMER
    // -------------------------------------------------------------------------

    /// Arm the reconnect timer unless one is already armed.
    fn schedule_reconnect(&mut self) {
        if self.timer.is_some() {
            debug!("reconnect already scheduled");
            return;
        }
        let delay = self.backoff.next_delay();
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let tx = self.internal_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::ReconnectDue { generation });
        }));

        self.set_state(ConnectionState::ReconnectScheduled);
        info!(?delay, failures = self.backoff.failures(), "reconnect scheduled");
        self.publish(&TransportEvent::ReconnectScheduled { delay });
    }

    fn on_reconnect_due(&mut self, generation: u64) {
        if generation != self.timer_generation || self.timer.is_none() {
            debug!(generation, "discarding stale reconnect timer");
            return;
        }
        self.timer = None;
        if self.state == ConnectionState::ReconnectScheduled {
            self.connect();
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.timer_generation += 1;
    }

    // -------------------------------------------------------------------------
    // SOCKET
    // -------------------------------------------------------------------------

    fn on_text(&mut self, text: &str) {
        let frame = match decode_inbound(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(error = %error, "dropping malformed frame");
                return;
            }
        };
        self.heartbeat.observe(Instant::now());

        match screen(frame) {
            Screened::Reply(reply) => {
                if let Some(socket) = &self.socket {
                    socket.send_text(encode_outbound(&reply));
                }
                debug!("answered ping");
            }
            Screened::Absorbed => {}
            Screened::Forward(InboundFrame::Message(payload)) => {
                self.publish(&TransportEvent::Message(payload));
            }
            Screened::Forward(InboundFrame::Error(payload)) => {
                let message = payload.content.unwrap_or_else(|| "unknown server error".to_owned());
                warn!(%message, "server reported an error");
                self.publish(&TransportEvent::ServerError { message });
            }
            Screened::Forward(InboundFrame::Ping | InboundFrame::Pong) => {}
        }
    }

    fn on_closed(&mut self, reason: Option<String>) {
        self.socket = None;
        self.heartbeat.stop();
        if self.state != ConnectionState::Open {
            return;
        }
        info!(reason = reason.as_deref().unwrap_or(""), "socket closed");
        self.publish(&TransportEvent::Disconnected { reason });
        self.schedule_reconnect();
    }

    fn send(&mut self, thread_id: ThreadId, content: String) -> Result<OutboundMessage, SendError> {
        let Some(socket) = self.socket.as_ref().filter(|_| self.state == ConnectionState::Open) else {
            debug!(thread_id, state = ?self.state, "send while not connected");
            self.connect();
            return Err(SendError::NotConnected);
        };

        let outbound = OutboundMessage {
            provisional_id: Uuid::new_v4(),
            thread_id,
            content,
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        };
        let frame = OutboundFrame::Message(SendPayload {
            thread_id,
            content: outbound.content.clone(),
            is_bot: false,
            timestamp: outbound.timestamp.clone(),
        });
        if !socket.send_text(encode_outbound(&frame)) {
            self.on_closed(Some("socket closed during send".to_owned()));
            return Err(SendError::NotConnected);
        }

        debug!(thread_id, provisional_id = %outbound.provisional_id, "message sent");
        self.publish(&TransportEvent::Sent(outbound.clone()));
        Ok(outbound)
    }

    // -------------------------------------------------------------------------
    // TEARDOWN
    // -------------------------------------------------------------------------

    fn teardown(&mut self) {
        self.set_state(ConnectionState::Closing);
        self.cancel_timer();
        if let Some(task) = self.in_flight.take() {
            task.abort();
        }
        self.attempt += 1;
        self.socket = None;
        self.heartbeat.stop();
        self.backoff.reset();
        self.set_state(ConnectionState::Idle);
        info!("connection torn down");
    }
}

async fn open_socket(
    config: &ClientConfig,
    api: &dyn ChatApi,
    connector: &dyn Connector,
) -> Result<SocketLink, AttemptError> {
    let token = api.connection_token().await.map_err(AttemptError::Token)?;
    let url = config.socket_url(&token.into_inner());
    connector.open(&url).await.map_err(AttemptError::Handshake)
}

async fn next_socket_event(socket: Option<&mut SocketLink>) -> SocketEvent {
    match socket {
        Some(link) => link.inbound.recv().await.unwrap_or(SocketEvent::Closed { reason: None }),
        None => future::pending().await,
    }
}

async fn idle_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}
