//! Provider adapters.
//!
//! This module provides:
//! - [`ProviderAdapter`], the one contract every model backend satisfies
//! - [`ProviderRegistry`] for binding an adapter from configuration
//! - Concrete implementations: stateless messages API, hosted assistant threads
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `chat_completions.rs`)
//! 2. Implement `ProviderAdapter`
//! 3. Add a variant to `ProviderConfig` in `config.rs`
//! 4. Add it to `ProviderRegistry::create()`

mod types;

pub mod anthropic;
pub mod assistants;

pub use anthropic::AnthropicAdapter;
pub use assistants::AssistantsAdapter;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::ProviderConfig;
use crate::tools::ToolDefinition;
use crate::Result;

use super::message::{Message, ToolUseRequest};

/// Everything submitted for one model turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub history: &'a [Message],
    pub tools: &'a [ToolDefinition],
    pub system_prompt: &'a str,
}

/// What a model turn produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed(String),
    ToolRequests {
        /// Text the model emitted alongside its tool requests.
        text: Option<String>,
        requests: Vec<ToolUseRequest>,
    },
}

/// Provider-side conversational context, owned by one loop invocation
/// and persisted by the engine between inbound messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSession {
    /// Remote thread id, for providers that keep server-side state.
    pub id: Option<String>,
    /// Remote run waiting for tool outputs.
    pub pending_run: Option<String>,
}

impl ProviderSession {
    pub fn resume(id: Option<String>) -> Self {
        Self {
            id,
            pending_run: None,
        }
    }
}

/// Provider adapter trait - normalizes model backends into one contract.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Submit history, tools and system prompt; get a completion or tool requests.
    async fn submit_turn(
        &self,
        session: &mut ProviderSession,
        turn: TurnRequest<'_>,
    ) -> Result<TurnOutcome>;

    /// Release a remote run left waiting on tool outputs. Called when the
    /// loop stops without a final answer.
    async fn abandon(&self, _session: &mut ProviderSession) -> Result<()> {
        Ok(())
    }

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// Binds a provider adapter from configuration.
///
/// # Example
///
/// ```ignore
/// let provider = ProviderRegistry::create(&config.provider, http)?;
/// let outcome = provider.submit_turn(&mut session, turn).await?;
/// ```
pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Create the adapter for a provider configuration. Called once when
    /// an engine is built.
    pub fn create(config: &ProviderConfig, http: Client) -> Result<Arc<dyn ProviderAdapter>> {
        config.validate()?;
        match config {
            ProviderConfig::Anthropic {
                api_key,
                model,
                api_base,
                max_tokens,
            } => Ok(Arc::new(AnthropicAdapter::new(
                http,
                api_key,
                model,
                api_base,
                *max_tokens,
            ))),
            ProviderConfig::Assistants {
                api_key,
                assistant_id,
                model,
                api_base,
                poll_interval_ms,
                max_polls,
            } => Ok(Arc::new(
                AssistantsAdapter::new(http, api_key, assistant_id, api_base)
                    .with_model(model.clone())
                    .with_polling(
                        std::time::Duration::from_millis(*poll_interval_ms),
                        *max_polls,
                    ),
            )),
        }
    }
}

/// Fake provider for testing.
#[cfg(test)]
pub struct FakeProvider {
    outcomes: std::sync::Mutex<std::collections::VecDeque<TurnOutcome>>,
    seen: std::sync::Mutex<Vec<Vec<Message>>>,
    abandoned: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FakeProvider {
    /// Create with predefined outcomes, returned in order.
    pub fn new(outcomes: Vec<TurnOutcome>) -> Self {
        Self {
            outcomes: std::sync::Mutex::new(outcomes.into()),
            seen: std::sync::Mutex::new(Vec::new()),
            abandoned: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn text(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| TurnOutcome::Completed(r.to_string())).collect())
    }

    pub fn tools(requests: Vec<(&str, &str, serde_json::Value)>) -> TurnOutcome {
        TurnOutcome::ToolRequests {
            text: None,
            requests: requests
                .into_iter()
                .map(|(id, name, input)| ToolUseRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                })
                .collect(),
        }
    }

    /// Histories submitted so far, one per turn.
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }

    /// How many times the loop released this provider's session.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl ProviderAdapter for FakeProvider {
    async fn submit_turn(
        &self,
        session: &mut ProviderSession,
        turn: TurnRequest<'_>,
    ) -> Result<TurnOutcome> {
        self.seen.lock().unwrap().push(turn.history.to_vec());
        session.id.get_or_insert_with(|| "fake-session".to_string());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| crate::error::Error::Provider("No more fake outcomes".to_string()))
    }

    async fn abandon(&self, _session: &mut ProviderSession) -> Result<()> {
        self.abandoned.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_provider() {
        let provider = FakeProvider::text(&["Hello!", "World!"]);
        let mut session = ProviderSession::default();
        let turn = TurnRequest {
            history: &[],
            tools: &[],
            system_prompt: "",
        };

        assert_eq!(
            provider.submit_turn(&mut session, turn).await.unwrap(),
            TurnOutcome::Completed("Hello!".to_string())
        );
        assert_eq!(
            provider.submit_turn(&mut session, turn).await.unwrap(),
            TurnOutcome::Completed("World!".to_string())
        );
        assert!(provider.submit_turn(&mut session, turn).await.is_err());
        assert_eq!(session.id.as_deref(), Some("fake-session"));
    }
}
