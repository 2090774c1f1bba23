//! Context for agent turns.
//!
//! - System prompt assembly (agent identity, configured prompt, knowledge)
//! - History windowing that never splits a tool round trip
//! - Session-scoped history buffer for test-mode identities

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::auth::{Clock, SystemClock};
use crate::config::AgentConfig;

use super::message::{Message, Role};

/// Maximum history messages seeded into a turn (prevents unbounded growth).
pub const MAX_HISTORY_MESSAGES: usize = 40;

/// Default idle time before a test-mode session is evicted.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 1800;

/// Build the system prompt for an agent.
pub fn build_system_prompt(agent: &AgentConfig, knowledge: &str) -> String {
    let mut parts = Vec::with_capacity(3);

    let now = Utc::now().format("%Y-%m-%d %H:%M UTC");
    parts.push(format!(
        "# {}\n\nYou are {}, answering on behalf of your organization.\n\n## Current Time\n{}",
        agent.name, agent.name, now
    ));

    if !agent.system_prompt.trim().is_empty() {
        parts.push(agent.system_prompt.trim().to_string());
    }

    if !knowledge.trim().is_empty() {
        parts.push(format!("# Knowledge\n\n{}", knowledge.trim()));
    }

    parts.join("\n\n---\n\n")
}

/// Keep at most `max` trailing messages, starting at a plain user message so
/// a tool_result is never separated from its tool_use.
pub fn window_history(history: &[Message], max: usize) -> &[Message] {
    if history.len() <= max {
        return history;
    }
    let start = history.len() - max;
    let offset = history[start..]
        .iter()
        .position(|m| m.role == Role::User && !m.is_tool_results())
        .unwrap_or(history.len() - start);
    &history[start + offset..]
}

struct SessionEntry {
    messages: Vec<Message>,
    provider_session: Option<String>,
    touched: DateTime<Utc>,
}

/// History for test-mode sessions, evicted after a period of inactivity.
///
/// Owned by one engine; nothing here is process-global.
pub struct SessionBuffer {
    ttl_secs: i64,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionBuffer {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs: ttl_secs as i64,
            clock: Arc::new(SystemClock),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Prior messages and provider session for a key.
    pub fn load(&self, key: &str) -> (Vec<Message>, Option<String>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_expired(&mut entries);
        entries
            .get(key)
            .map(|e| (e.messages.clone(), e.provider_session.clone()))
            .unwrap_or_default()
    }

    /// Append messages to a session and refresh its expiry.
    pub fn append(&self, key: &str, messages: &[Message], provider_session: Option<&str>) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_expired(&mut entries);

        let entry = entries.entry(key.to_string()).or_insert_with(|| SessionEntry {
            messages: Vec::new(),
            provider_session: None,
            touched: now,
        });
        entry.messages.extend_from_slice(messages);
        if let Some(id) = provider_session {
            entry.provider_session = Some(id.to_string());
        }
        entry.touched = now;
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_expired(&mut entries);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&self, entries: &mut HashMap<String, SessionEntry>) {
        let now = self.clock.now();
        let ttl = self.ttl_secs;
        entries.retain(|key, entry| {
            let alive = (now - entry.touched).num_seconds() < ttl;
            if !alive {
                debug!("Evicting idle session {}", key);
            }
            alive
        });
    }
}
