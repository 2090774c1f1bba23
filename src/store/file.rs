//! JSON file store
//!
//! Keeps the whole document in memory and rewrites the file after every
//! mutation, like the config file handling in `config.rs`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::agent::Message;
use crate::auth::{Authenticator, CachedToken};
use crate::error::Error;
use crate::registry::FunctionDefinition;
use crate::Result;

use super::{
    AuthenticatorStore, Conversation, ConversationStore, FunctionStore, InMemoryStore,
    StoreDocument,
};

/// File-backed store
pub struct FileStore {
    path: PathBuf,
    inner: InMemoryStore,
    /// Held across snapshot and write so an older snapshot never lands last.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a store file, starting empty when it does not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        let doc = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Store(format!("Failed to read {}: {e}", path.display()))
            })?;
            serde_json::from_str::<StoreDocument>(&content)?
        } else {
            StoreDocument::default()
        };

        // Run write-time validation on everything loaded from disk.
        let inner = InMemoryStore::new();
        for (agent_id, defs) in doc.functions {
            for def in defs {
                inner.upsert_function(&agent_id, def)?;
            }
        }
        for auth in doc.authenticators.into_values() {
            inner.upsert_authenticator(auth)?;
        }
        let mut snapshot = inner.snapshot();
        snapshot.conversations = doc.conversations;

        Ok(Self {
            path: path.to_path_buf(),
            inner: InMemoryStore::from_document(snapshot),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> StoreDocument {
        self.inner.snapshot()
    }

    pub fn upsert_function(&self, agent_id: &str, def: FunctionDefinition) -> Result<()> {
        self.inner.upsert_function(agent_id, def)?;
        self.persist()
    }

    pub fn upsert_authenticator(&self, auth: Authenticator) -> Result<()> {
        self.inner.upsert_authenticator(auth)?;
        self.persist()
    }

    /// Write the document to disk.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let content = serde_json::to_string_pretty(&self.inner.snapshot())?;
        self.write_file(&content)
            .map_err(|e| Error::Store(format!("Failed to write {}: {e}", self.path.display())))
    }

    fn write_file(&self, content: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, content)?;

        // Cached tokens live in this file.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.path, perms)?;
        }
        Ok(())
    }
}

#[async_trait]
impl FunctionStore for FileStore {
    async fn functions_for_agent(&self, agent_id: &str) -> Result<Vec<FunctionDefinition>> {
        self.inner.functions_for_agent(agent_id).await
    }
}

#[async_trait]
impl AuthenticatorStore for FileStore {
    async fn authenticator(&self, id: &str) -> Result<Authenticator> {
        self.inner.authenticator(id).await
    }

    async fn save_token(&self, id: &str, token: CachedToken, life_time: u64) -> Result<()> {
        self.inner.save_token(id, token, life_time).await?;
        self.persist()
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn conversation(&self, id: &str) -> Result<Conversation> {
        self.inner.conversation(id).await
    }

    async fn append_messages(&self, id: &str, messages: &[Message]) -> Result<()> {
        self.inner.append_messages(id, messages).await?;
        self.persist()
    }

    async fn mark_needs_human(&self, id: &str) -> Result<bool> {
        let changed = self.inner.mark_needs_human(id).await?;
        if changed {
            self.persist()?;
        }
        Ok(changed)
    }

    async fn save_contact(&self, id: &str, fields: Map<String, Value>) -> Result<()> {
        self.inner.save_contact(id, fields).await?;
        self.persist()
    }

    async fn set_provider_session(&self, id: &str, session_id: &str) -> Result<()> {
        self.inner.set_provider_session(id, session_id).await?;
        self.persist()
    }
}
