//! In-memory backend and socket fakes shared by the connection and session
//! tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frames::HistoryRecord;
use tokio::sync::{Semaphore, mpsc};

use crate::api::{ApiError, ChatApi, SessionToken};
use crate::config::{ClientConfig, TransportConfig};
use crate::socket::{Connector, SocketError, SocketLink, SocketRemote};
use crate::types::{ThreadId, TransportEvent};

pub const API_URL: &str = "http://127.0.0.1:8000";

/// Config with deterministic timing: 1s base, no jitter, no idle timeout.
pub fn config() -> ClientConfig {
    let mut config = ClientConfig::new(API_URL).expect("valid url");
    config.transport = TransportConfig {
        reconnect_base: Duration::from_secs(1),
        reconnect_max: Duration::from_secs(30),
        reconnect_jitter: 0.0,
        idle_timeout: None,
        ..TransportConfig::default()
    };
    config
}

pub fn record(id: i64, content: &str) -> HistoryRecord {
    HistoryRecord { id, thread_id: None, content: content.to_owned(), is_bot: false, timestamp: String::new() }
}

pub fn message_frame(thread_id: ThreadId, message_id: i64, content: &str, is_bot: bool) -> String {
    serde_json::json!({
        "type": "message",
        "thread_id": thread_id,
        "message_id": message_id,
        "content": content,
        "is_bot": is_bot,
        "timestamp": "2024-05-01T12:00:00Z",
    })
    .to_string()
}

/// Wait for the next event, failing instead of hanging.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(300), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

// =============================================================================
// FAKE API
// =============================================================================

pub enum TokenReply {
    Ok,
    Unavailable,
    AuthExpired,
}

#[derive(Default)]
pub struct FakeApi {
    token_calls: AtomicUsize,
    history_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    token_script: Mutex<VecDeque<TokenReply>>,
    token_gate: Option<Semaphore>,
    history_gate: Option<Semaphore>,
    histories: Mutex<HashMap<ThreadId, Vec<HistoryRecord>>>,
    history_auth_expired: AtomicBool,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Token requests block until [`FakeApi::release_token`] is called.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self { token_gate: Some(Semaphore::new(0)), ..Self::default() })
    }

    /// History requests block until [`FakeApi::release_history`] is called.
    pub fn gated_history() -> Arc<Self> {
        Arc::new(Self { history_gate: Some(Semaphore::new(0)), ..Self::default() })
    }

    pub fn release_history(&self) {
        if let Some(gate) = &self.history_gate {
            gate.add_permits(1);
        }
    }

    pub fn release_token(&self) {
        if let Some(gate) = &self.token_gate {
            gate.add_permits(1);
        }
    }

    /// Replies for the next token requests; afterwards every request succeeds.
    pub fn script_tokens(&self, replies: impl IntoIterator<Item = TokenReply>) {
        self.token_script.lock().unwrap().extend(replies);
    }

    pub fn set_history(&self, thread_id: ThreadId, records: Vec<HistoryRecord>) {
        self.histories.lock().unwrap().insert(thread_id, records);
    }

    pub fn expire_history_auth(&self) {
        self.history_auth_expired.store(true, Ordering::SeqCst);
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatApi for FakeApi {
    async fn connection_token(&self) -> Result<SessionToken, ApiError> {
        let call = self.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.token_gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let reply = self.token_script.lock().unwrap().pop_front().unwrap_or(TokenReply::Ok);
        match reply {
            TokenReply::Ok => Ok(SessionToken::new(format!("token-{call}"))),
            TokenReply::Unavailable => Err(ApiError::Status { status: 503, body: "unavailable".to_owned() }),
            TokenReply::AuthExpired => Err(ApiError::AuthExpired),
        }
    }

    async fn thread_history(&self, thread_id: ThreadId) -> Result<Vec<HistoryRecord>, ApiError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.history_gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if self.history_auth_expired.load(Ordering::SeqCst) {
            return Err(ApiError::AuthExpired);
        }
        Ok(self.histories.lock().unwrap().get(&thread_id).cloned().unwrap_or_default())
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// FAKE CONNECTOR
// =============================================================================

/// Connector that hands the far side of every opened link to the test.
pub struct FakeConnector {
    urls: Mutex<Vec<String>>,
    failures: AtomicUsize,
    remotes: mpsc::UnboundedSender<SocketRemote>,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SocketRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { urls: Mutex::new(Vec::new()), failures: AtomicUsize::new(0), remotes }), rx)
    }

    /// Fail the next `count` handshakes.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    /// Handshakes attempted, failed ones included.
    pub fn handshakes(&self) -> usize {
        self.urls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn open(&self, url: &str) -> Result<SocketLink, SocketError> {
        self.urls.lock().unwrap().push(url.to_owned());
        let failing = self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if failing {
            return Err(SocketError::Connect(Box::new(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed,
            )));
        }
        let (link, remote) = SocketLink::pair();
        let _ = self.remotes.send(remote);
        Ok(link)
    }
}
