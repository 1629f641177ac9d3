//! Merge history, server frames and optimistic sends into one transcript.
//!
//! DESIGN
//! ======
//! The reconciler is the only writer of the [`ThreadMessageStore`]. For each
//! thread it keeps a small ledger next to the stored sequence:
//!
//! - seed state: while a history fetch is in flight, inbound frames for the
//!   thread are buffered and replayed after the history lands, so a frame
//!   racing the fetch is never lost;
//! - pending sends: provisional entries still waiting for their echo.
//!
//! PAIRING
//! =======
//! A user (`is_bot == false`) frame pairs with the earliest pending send in
//! the same thread whose content is byte-for-byte equal and which was sent
//! within `pair_window`. A paired frame replaces the provisional entry in
//! place, keeping its position. A frame whose server id is already present
//! is a replay and never touches pending sends.
//!
//! History confirms sends too: when a thread is seeded, each new user record
//! pairs with the earliest matching pending send and the provisional entry
//! is dropped, since its echo may have been lost with the socket.
//!
//! Sequences are arrival-ordered; timestamps are never used for ordering.

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod reconcile_test;

use std::collections::{HashMap, HashSet};
use std::mem;
use std::time::Duration;

use frames::{HistoryRecord, MessagePayload};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::store::ThreadMessageStore;
use crate::types::{MessageId, OutboundMessage, ThreadId, ThreadMessage};

/// What applying one inbound message did to its thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// New entry at the end of the sequence.
    Appended,
    /// Replaced a provisional entry in place.
    Paired,
    /// Server id already present; frame dropped.
    Duplicate,
    /// Thread is being seeded; frame held until the history lands.
    Buffered,
}

#[derive(Debug, Default)]
enum SeedState {
    #[default]
    Unseeded,
    Loading(Vec<MessagePayload>),
    Seeded,
}

#[derive(Debug)]
struct PendingSend {
    id: Uuid,
    content: String,
    sent_at: Instant,
}

#[derive(Debug, Default)]
struct Ledger {
    seed: SeedState,
    pending: Vec<PendingSend>,
    issued: HashSet<Uuid>,
}

impl Ledger {
    fn expire(&mut self, now: Instant, window: Duration) {
        self.pending.retain(|p| now.duration_since(p.sent_at) <= window);
    }

    fn take_match(&mut self, content: &str) -> Option<PendingSend> {
        let index = self.pending.iter().position(|p| p.content == content)?;
        Some(self.pending.remove(index))
    }
}

pub struct MessageReconciler {
    store: ThreadMessageStore,
    ledgers: HashMap<ThreadId, Ledger>,
    pair_window: Duration,
}

impl MessageReconciler {
    #[must_use]
    pub fn new(store: ThreadMessageStore, pair_window: Duration) -> Self {
        Self { store, ledgers: HashMap::new(), pair_window }
    }

    #[must_use]
    pub fn store(&self) -> &ThreadMessageStore {
        &self.store
    }

    #[must_use]
    pub fn is_loading(&self, thread_id: ThreadId) -> bool {
        matches!(self.ledgers.get(&thread_id).map(|l| &l.seed), Some(SeedState::Loading(_)))
    }

    #[cfg(test)]
    pub(crate) fn is_seeded(&self, thread_id: ThreadId) -> bool {
        matches!(self.ledgers.get(&thread_id).map(|l| &l.seed), Some(SeedState::Seeded))
    }

    /// Number of provisional entries still waiting for an echo.
    #[must_use]
    pub fn pending_sends(&self, thread_id: ThreadId) -> usize {
        self.ledgers.get(&thread_id).map_or(0, |l| l.pending.len())
    }

    /// Start buffering inbound frames for a thread whose history is loading.
    pub fn begin_seed(&mut self, thread_id: ThreadId) {
        let ledger = self.ledgers.entry(thread_id).or_default();
        if !matches!(ledger.seed, SeedState::Loading(_)) {
            ledger.seed = SeedState::Loading(Vec::new());
        }
    }

    /// Install fetched history, then replay frames buffered during the fetch.
    ///
    /// History order is authoritative for the messages it contains. Entries
    /// already in the sequence that the history lacks (live frames,
    /// provisional sends) are kept after it in their existing order, except
    /// provisional entries confirmed by a history record.
    pub fn complete_seed(&mut self, thread_id: ThreadId, history: &[HistoryRecord]) -> Vec<Applied> {
        let ledger = self.ledgers.entry(thread_id).or_default();
        let buffered = match mem::replace(&mut ledger.seed, SeedState::Seeded) {
            SeedState::Loading(buffered) => buffered,
            SeedState::Unseeded | SeedState::Seeded => Vec::new(),
        };

        let existing = self.store.get(thread_id);
        let known: HashSet<i64> = existing.iter().filter_map(|m| m.id.server_id()).collect();
        ledger.expire(Instant::now(), self.pair_window);
        let mut confirmed = HashSet::new();
        let mut candidates = HashSet::new();
        for record in history.iter().filter(|r| !r.is_bot && !known.contains(&r.id)) {
            if !candidates.insert(record.id) {
                continue;
            }
            if let Some(pending) = ledger.take_match(&record.content) {
                confirmed.insert(pending.id);
            }
        }

        let mut seen = HashSet::with_capacity(history.len() + existing.len());
        let mut merged = Vec::with_capacity(history.len() + existing.len());
        for record in history {
            if seen.insert(record.id) {
                merged.push(ThreadMessage::from(record));
            }
        }
        for entry in existing.iter() {
            match entry.id {
                MessageId::Server(id) if !seen.insert(id) => {}
                MessageId::Provisional(id) if confirmed.contains(&id) => {}
                _ => merged.push(entry.clone()),
            }
        }
        debug!(
            thread_id,
            history = history.len(),
            confirmed = confirmed.len(),
            buffered = buffered.len(),
            "seeded thread"
        );
        self.store.replace(thread_id, merged);

        buffered.iter().map(|payload| self.apply_live(payload)).collect()
    }

    /// The history fetch failed: stop buffering and apply what was held.
    pub fn abort_seed(&mut self, thread_id: ThreadId) -> Vec<Applied> {
        let Some(ledger) = self.ledgers.get_mut(&thread_id) else {
            return Vec::new();
        };
        let buffered = match mem::take(&mut ledger.seed) {
            SeedState::Loading(buffered) => buffered,
            other => {
                ledger.seed = other;
                return Vec::new();
            }
        };
        buffered.iter().map(|payload| self.apply_live(payload)).collect()
    }

    /// Apply one server `message` frame.
    pub fn apply_inbound(&mut self, payload: &MessagePayload) -> Applied {
        let ledger = self.ledgers.entry(payload.thread_id).or_default();
        if let SeedState::Loading(buffered) = &mut ledger.seed {
            buffered.push(payload.clone());
            debug!(thread_id = payload.thread_id, message_id = payload.message_id, "buffered during seed");
            return Applied::Buffered;
        }
        self.apply_live(payload)
    }

    /// Append the optimistic entry for a send. Idempotent per provisional id.
    ///
    /// Returns `false` if this send was already applied.
    pub fn insert_provisional(&mut self, outbound: &OutboundMessage) -> bool {
        let ledger = self.ledgers.entry(outbound.thread_id).or_default();
        if !ledger.issued.insert(outbound.provisional_id) {
            return false;
        }
        ledger.pending.push(PendingSend {
            id: outbound.provisional_id,
            content: outbound.content.clone(),
            sent_at: Instant::now(),
        });

        let mut messages = self.store.get(outbound.thread_id).to_vec();
        messages.push(ThreadMessage::from(outbound));
        self.store.replace(outbound.thread_id, messages);
        true
    }

    /// Drop everything known about a thread.
    pub fn forget(&mut self, thread_id: ThreadId) {
        self.ledgers.remove(&thread_id);
        self.store.clear(thread_id);
    }

    /// Drop everything (logout).
    pub fn reset(&mut self) {
        self.ledgers.clear();
        self.store.clear_all();
    }

    fn apply_live(&mut self, payload: &MessagePayload) -> Applied {
        let thread_id = payload.thread_id;
        let server_id = MessageId::Server(payload.message_id);
        let window = self.pair_window;
        let mut messages = self.store.get(thread_id).to_vec();
        let ledger = self.ledgers.entry(thread_id).or_default();
        ledger.expire(Instant::now(), window);

        let outcome = if messages.iter().any(|m| m.id == server_id) {
            Applied::Duplicate
        } else {
            let slot = if payload.is_bot {
                None
            } else {
                ledger.take_match(&payload.content).and_then(|pending| {
                    messages.iter().position(|m| m.id == MessageId::Provisional(pending.id))
                })
            };
            match slot {
                Some(index) => {
                    messages[index] = ThreadMessage::from(payload);
                    Applied::Paired
                }
                None => {
                    messages.push(ThreadMessage::from(payload));
                    Applied::Appended
                }
            }
        };

        debug!(thread_id, message_id = payload.message_id, outcome = ?outcome, "applied inbound message");
        if outcome != Applied::Duplicate {
            self.store.replace(thread_id, messages);
        }
        outcome
    }
}
