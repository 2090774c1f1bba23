//! Stale-turn stamps.
//!
//! Each inbound message takes a ticket for its session key. A later message
//! on the same key supersedes every earlier ticket; superseded turns finish
//! their work but drop the reply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Proof that a turn was accepted for a session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTicket {
    key: String,
    stamp: u64,
}

impl TurnTicket {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Latest accepted turn per session key.
#[derive(Debug, Default)]
pub struct TurnStamps {
    next: AtomicU64,
    latest: Mutex<HashMap<String, u64>>,
}

impl TurnStamps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new turn for `key`, superseding any earlier one.
    pub fn begin(&self, key: &str) -> TurnTicket {
        let stamp = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), stamp);
        TurnTicket {
            key: key.to_string(),
            stamp,
        }
    }

    /// Whether `ticket` is still the latest turn for its key.
    pub fn is_current(&self, ticket: &TurnTicket) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ticket.key)
            .map_or(false, |latest| *latest == ticket.stamp)
    }

    /// Forget a key once its latest turn has finished.
    pub fn finish(&self, ticket: &TurnTicket) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        if latest.get(&ticket.key) == Some(&ticket.stamp) {
            latest.remove(&ticket.key);
        }
    }
}
