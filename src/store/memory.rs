//! In-memory store

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::agent::Message;
use crate::auth::{Authenticator, CachedToken};
use crate::error::Error;
use crate::registry::FunctionDefinition;
use crate::Result;

use super::{AuthenticatorStore, Conversation, ConversationStore, FunctionStore, StoreDocument};

/// Store kept entirely in memory. Used by tests and as the backing of
/// [`super::FileStore`].
#[derive(Default)]
pub struct InMemoryStore {
    doc: Mutex<StoreDocument>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_document(doc: StoreDocument) -> Self {
        Self { doc: Mutex::new(doc) }
    }

    fn doc(&self) -> MutexGuard<'_, StoreDocument> {
        self.doc.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> StoreDocument {
        self.doc().clone()
    }

    /// Insert or replace a function for an agent, validating it first.
    /// A different function whose name normalizes the same way is rejected.
    pub fn upsert_function(&self, agent_id: &str, mut def: FunctionDefinition) -> Result<()> {
        def.validate()?;
        let mut doc = self.doc();
        let defs = doc.functions.entry(agent_id.to_string()).or_default();
        if let Some(clash) = defs
            .iter()
            .find(|d| d.id != def.id && d.normalized_name == def.normalized_name)
        {
            return Err(Error::Validation(format!(
                "Function {:?} collides with {:?} (both become {})",
                def.name, clash.name, def.normalized_name
            )));
        }
        defs.retain(|d| d.id != def.id);
        defs.push(def);
        Ok(())
    }

    /// Insert or replace an authenticator, validating it first.
    pub fn upsert_authenticator(&self, auth: Authenticator) -> Result<()> {
        auth.validate()?;
        self.doc().authenticators.insert(auth.id.clone(), auth);
        Ok(())
    }

    /// Close a conversation; a later escalation flags it again.
    pub fn close_conversation(&self, id: &str) {
        let mut doc = self.doc();
        let conversation = doc
            .conversations
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id));
        conversation.closed = true;
    }

    fn with_conversation<T>(&self, id: &str, f: impl FnOnce(&mut Conversation) -> T) -> T {
        let mut doc = self.doc();
        let conversation = doc
            .conversations
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id));
        f(conversation)
    }
}

#[async_trait]
impl FunctionStore for InMemoryStore {
    async fn functions_for_agent(&self, agent_id: &str) -> Result<Vec<FunctionDefinition>> {
        Ok(self.doc().functions.get(agent_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl AuthenticatorStore for InMemoryStore {
    async fn authenticator(&self, id: &str) -> Result<Authenticator> {
        self.doc()
            .authenticators
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Unknown authenticator: {id}")))
    }

    async fn save_token(&self, id: &str, token: CachedToken, life_time: u64) -> Result<()> {
        let mut doc = self.doc();
        let auth = doc
            .authenticators
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Unknown authenticator: {id}")))?;
        auth.cached = Some(token);
        auth.life_time = life_time;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn conversation(&self, id: &str) -> Result<Conversation> {
        Ok(self.with_conversation(id, |c| c.clone()))
    }

    async fn append_messages(&self, id: &str, messages: &[Message]) -> Result<()> {
        self.with_conversation(id, |c| c.messages.extend_from_slice(messages));
        Ok(())
    }

    async fn mark_needs_human(&self, id: &str) -> Result<bool> {
        Ok(self.with_conversation(id, |c| {
            if c.needs_human && !c.closed {
                return false;
            }
            c.needs_human = true;
            c.closed = false;
            true
        }))
    }

    async fn save_contact(&self, id: &str, fields: Map<String, Value>) -> Result<()> {
        self.with_conversation(id, |c| c.contact.extend(fields));
        Ok(())
    }

    async fn set_provider_session(&self, id: &str, session_id: &str) -> Result<()> {
        self.with_conversation(id, |c| c.provider_session_id = Some(session_id.to_string()));
        Ok(())
    }
}
