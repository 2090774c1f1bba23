//! Store module - the persistence collaborators the engine reads and writes.
//!
//! Functions and authenticators are managed elsewhere and read here; the
//! only write the engine performs on them is caching refreshed tokens.
//! Conversations hold prior turns, the needs-human flag and contact details.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::Message;
use crate::auth::{Authenticator, CachedToken};
use crate::registry::FunctionDefinition;
use crate::Result;

/// Read access to function definitions.
#[async_trait]
pub trait FunctionStore: Send + Sync {
    /// Definitions callable by an agent.
    async fn functions_for_agent(&self, agent_id: &str) -> Result<Vec<FunctionDefinition>>;
}

/// Authenticator records and their token cache.
#[async_trait]
pub trait AuthenticatorStore: Send + Sync {
    async fn authenticator(&self, id: &str) -> Result<Authenticator>;

    /// Persist a refreshed token and the life time that applies to it.
    async fn save_token(&self, id: &str, token: CachedToken, life_time: u64) -> Result<()>;
}

/// Conversation persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetch a conversation, creating an empty one on first use.
    async fn conversation(&self, id: &str) -> Result<Conversation>;

    async fn append_messages(&self, id: &str, messages: &[Message]) -> Result<()>;

    /// Flag the conversation for a human. Returns `false` when it was
    /// already flagged and still open.
    async fn mark_needs_human(&self, id: &str) -> Result<bool>;

    /// Merge contact fields into the conversation.
    async fn save_contact(&self, id: &str, fields: Map<String, Value>) -> Result<()>;

    async fn set_provider_session(&self, id: &str, session_id: &str) -> Result<()>;
}

/// A persisted conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub needs_human: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub contact: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_session_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Self::default()
        }
    }
}

/// Everything a store holds, in its serialized shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Function definitions keyed by agent id.
    #[serde(default)]
    pub functions: BTreeMap<String, Vec<FunctionDefinition>>,
    #[serde(default)]
    pub authenticators: BTreeMap<String, Authenticator>,
    #[serde(default)]
    pub conversations: BTreeMap<String, Conversation>,
}
