//! Engine - the entry point channels call with inbound messages

use std::sync::Arc;

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::auth::AuthenticatorManager;
use crate::collab::{AuditSink, KnowledgeSource, Notifier};
use crate::config::{AgentConfig, Config};
use crate::invoker::HttpInvoker;
use crate::registry::FunctionRegistry;
use crate::store::{AuthenticatorStore, ConversationStore, FunctionStore};
use crate::tools::{EscalateTool, SaveUserInfoTool, ToolContext, ToolDispatcher};
use crate::Result;

use super::context::{
    build_system_prompt, window_history, SessionBuffer, DEFAULT_SESSION_TTL_SECS,
    MAX_HISTORY_MESSAGES,
};
use super::llm::{ProviderAdapter, ProviderRegistry, ProviderSession};
use super::loop_impl::{AgentLoop, LoopInput, LoopOutcome};
use super::message::{InboundMessage, Message, Reply};
use super::stamps::TurnStamps;

/// Dispatcher for a store, with both reserved tools registered.
pub fn build_dispatcher<S>(
    store: Arc<S>,
    http: Client,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
) -> ToolDispatcher
where
    S: FunctionStore + AuthenticatorStore + ConversationStore + 'static,
{
    let auth = Arc::new(AuthenticatorManager::new(store.clone(), http.clone()));
    let invoker = Arc::new(HttpInvoker::new(http, auth));
    let mut dispatcher =
        ToolDispatcher::new(FunctionRegistry::new(store.clone()), invoker, audit);
    dispatcher.register(EscalateTool::new(store.clone(), notifier));
    dispatcher.register(SaveUserInfoTool::new(store));
    dispatcher
}

/// Handles inbound messages for one agent.
pub struct Engine {
    agent: AgentConfig,
    agent_loop: AgentLoop,
    dispatcher: Arc<ToolDispatcher>,
    conversations: Arc<dyn ConversationStore>,
    knowledge: Option<Arc<dyn KnowledgeSource>>,
    stamps: Arc<TurnStamps>,
    sessions: SessionBuffer,
}

impl Engine {
    pub fn new(
        agent: AgentConfig,
        provider: Arc<dyn ProviderAdapter>,
        dispatcher: Arc<ToolDispatcher>,
        conversations: Arc<dyn ConversationStore>,
        max_iterations: usize,
    ) -> Self {
        let stamps = Arc::new(TurnStamps::new());
        Self {
            agent,
            agent_loop: AgentLoop::new(
                provider,
                dispatcher.clone(),
                stamps.clone(),
                max_iterations,
            ),
            dispatcher,
            conversations,
            knowledge: None,
            stamps,
            sessions: SessionBuffer::new(DEFAULT_SESSION_TTL_SECS),
        }
    }

    /// Build an engine from configuration. The provider is bound here and
    /// never re-selected per call.
    pub fn from_config<S>(
        config: &Config,
        store: Arc<S>,
        http: Client,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self>
    where
        S: FunctionStore + AuthenticatorStore + ConversationStore + 'static,
    {
        let provider = ProviderRegistry::create(&config.provider, http.clone())?;
        let dispatcher = Arc::new(build_dispatcher(store.clone(), http, notifier, audit));
        Ok(
            Self::new(config.agent.clone(), provider, dispatcher, store, config.max_iterations)
                .with_sessions(SessionBuffer::new(config.session_ttl_secs)),
        )
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_sessions(mut self, sessions: SessionBuffer) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn agent(&self) -> &AgentConfig {
        &self.agent
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn provider_name(&self) -> &str {
        self.agent_loop.provider_name()
    }

    /// Process one inbound message.
    ///
    /// Returns `None` when the conversation was escalated to a human or a
    /// newer message on the same session superseded this one.
    pub async fn handle_inbound_message(&self, inbound: InboundMessage) -> Result<Option<Reply>> {
        let key = inbound.session_key();
        let ticket = self.stamps.begin(&key);
        let test_mode = inbound.test_mode_identity.is_some();
        let user_message = inbound.to_message();

        let (prior, session_id) = if test_mode {
            let (messages, session_id) = self.sessions.load(&key);
            self.sessions.append(&key, std::slice::from_ref(&user_message), None);
            (messages, session_id)
        } else {
            let conversation = self
                .conversations
                .conversation(&inbound.conversation_id)
                .await?;
            self.conversations
                .append_messages(&inbound.conversation_id, std::slice::from_ref(&user_message))
                .await?;
            (conversation.messages, conversation.provider_session_id)
        };

        let mut history = window_history(&prior, MAX_HISTORY_MESSAGES).to_vec();
        history.push(user_message);
        let seeded = history.len();
        debug!("Seeded {} with {} messages", key, seeded);

        let tools = self.dispatcher.catalog(&self.agent.id).await?;
        let system_prompt = build_system_prompt(&self.agent, &self.knowledge_text().await);
        let ctx = ToolContext {
            agent_id: self.agent.id.clone(),
            organization_id: self.agent.organization_id.clone(),
            conversation_id: inbound.conversation_id.clone(),
        };

        let mut session = ProviderSession::resume(session_id);
        let input = LoopInput {
            ticket: &ticket,
            ctx: &ctx,
            tools: &tools,
            system_prompt: &system_prompt,
        };
        let outcome = self.agent_loop.run(input, &mut session, &mut history).await;
        self.stamps.finish(&ticket);
        let outcome = outcome?;

        if outcome == LoopOutcome::Superseded {
            return Ok(None);
        }

        let produced = &history[seeded..];
        if test_mode {
            self.sessions.append(&key, produced, session.id.as_deref());
        } else {
            self.persist(&inbound.conversation_id, produced, session.id.as_deref()).await?;
        }

        match outcome {
            LoopOutcome::Done(reply_text) => Ok(Some(Reply {
                reply_text,
                provider_session_id: session.id,
            })),
            LoopOutcome::Escalated | LoopOutcome::Superseded => Ok(None),
        }
    }

    async fn persist(
        &self,
        conversation_id: &str,
        produced: &[Message],
        session_id: Option<&str>,
    ) -> Result<()> {
        if !produced.is_empty() {
            self.conversations.append_messages(conversation_id, produced).await?;
        }
        if let Some(id) = session_id {
            self.conversations.set_provider_session(conversation_id, id).await?;
        }
        Ok(())
    }

    async fn knowledge_text(&self) -> String {
        let Some(source) = &self.knowledge else {
            return String::new();
        };
        match source.knowledge_for(&self.agent.id).await {
            Ok(text) => {
                if !text.is_empty() {
                    info!(
                        "Loaded {} chars of knowledge for agent {}",
                        text.len(),
                        self.agent.id
                    );
                }
                text
            }
            Err(e) => {
                warn!("Knowledge unavailable for agent {}: {}", self.agent.id, e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{AssistantsAdapter, FakeProvider, TurnOutcome, TurnRequest};
    use crate::collab::{MemoryAuditSink, RecordingNotifier, StaticKnowledge};
    use crate::store::InMemoryStore;
    use crate::tools::ESCALATE_TOOL;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn engine(store: Arc<InMemoryStore>, provider: Arc<dyn ProviderAdapter>) -> Engine {
        let dispatcher = build_dispatcher(
            store.clone(),
            Client::new(),
            Arc::new(RecordingNotifier::default()),
            Arc::new(MemoryAuditSink::default()),
        );
        Engine::new(AgentConfig::default(), provider, Arc::new(dispatcher), store, 10)
    }

    #[tokio::test]
    async fn test_reply_is_persisted_with_session() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(FakeProvider::text(&["Hi!", "Still here."]));
        let engine = engine(store.clone(), provider.clone());

        let reply = engine
            .handle_inbound_message(InboundMessage::new("c1", "hello"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.reply_text, "Hi!");
        assert_eq!(reply.provider_session_id.as_deref(), Some("fake-session"));

        engine
            .handle_inbound_message(InboundMessage::new("c1", "again"))
            .await
            .unwrap();

        let conversation = store.conversation("c1").await.unwrap();
        assert_eq!(conversation.messages.len(), 4);
        assert_eq!(conversation.provider_session_id.as_deref(), Some("fake-session"));

        // The second turn was seeded with the first one.
        let seen = provider.seen();
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][2].text(), "again");
    }

    #[tokio::test]
    async fn test_test_mode_uses_session_buffer() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(FakeProvider::text(&["one", "two"]));
        let engine = engine(store.clone(), provider.clone());

        let msg = || InboundMessage::new("c1", "hi").test_mode("operator@example.com");
        engine.handle_inbound_message(msg()).await.unwrap();
        engine.handle_inbound_message(msg()).await.unwrap();

        assert!(store.conversation("c1").await.unwrap().messages.is_empty());
        assert_eq!(provider.seen()[1].len(), 3);
    }

    #[tokio::test]
    async fn test_escalation_returns_none() {
        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(FakeProvider::new(vec![FakeProvider::tools(vec![(
            "t1",
            ESCALATE_TOOL,
            json!({}),
        )])]));
        let engine = engine(store.clone(), provider);

        let reply = engine
            .handle_inbound_message(InboundMessage::new("c1", "get me a person"))
            .await
            .unwrap();

        assert!(reply.is_none());
        let conversation = store.conversation("c1").await.unwrap();
        assert!(conversation.needs_human);
        assert_eq!(conversation.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_knowledge_reaches_system_prompt() {
        struct PromptCapture(std::sync::Mutex<String>);

        #[async_trait]
        impl ProviderAdapter for PromptCapture {
            async fn submit_turn(
                &self,
                _session: &mut ProviderSession,
                turn: TurnRequest<'_>,
            ) -> Result<TurnOutcome> {
                *self.0.lock().unwrap() = turn.system_prompt.to_string();
                Ok(TurnOutcome::Completed("ok".to_string()))
            }
            fn name(&self) -> &str {
                "capture"
            }
        }

        let provider = Arc::new(PromptCapture(std::sync::Mutex::new(String::new())));
        let engine = engine(Arc::new(InMemoryStore::new()), provider.clone())
            .with_knowledge(Arc::new(StaticKnowledge("Refunds take 5 days.".to_string())));

        engine
            .handle_inbound_message(InboundMessage::new("c1", "refund?"))
            .await
            .unwrap();
        assert!(provider.0.lock().unwrap().contains("# Knowledge\n\nRefunds take 5 days."));
    }

    #[tokio::test]
    async fn test_newer_message_supersedes_slow_turn() {
        struct SlowProvider;

        #[async_trait]
        impl ProviderAdapter for SlowProvider {
            async fn submit_turn(
                &self,
                _session: &mut ProviderSession,
                turn: TurnRequest<'_>,
            ) -> Result<TurnOutcome> {
                let last = turn.history.last().map(|m| m.text()).unwrap_or_default();
                if last == "first" {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok(TurnOutcome::Completed(format!("re: {last}")))
            }
            fn name(&self) -> &str {
                "slow"
            }
        }

        let engine = engine(Arc::new(InMemoryStore::new()), Arc::new(SlowProvider));
        let (first, second) = tokio::join!(
            engine.handle_inbound_message(InboundMessage::new("c1", "first")),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                engine.handle_inbound_message(InboundMessage::new("c1", "second")).await
            }
        );

        assert!(first.unwrap().is_none());
        assert_eq!(second.unwrap().unwrap().reply_text, "re: second");
    }

    #[tokio::test]
    async fn test_escalation_releases_hosted_run() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/threads")
            .with_status(200)
            .with_body(r#"{"id": "thread_1"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/threads/thread_1/messages")
            .with_status(200)
            .with_body(r#"{"id": "msg_1"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/threads/thread_1/runs")
            .with_status(200)
            .with_body(r#"{"id": "run_1"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/threads/thread_1/runs/run_1")
            .with_status(200)
            .with_body(
                r#"{"id": "run_1", "status": "requires_action", "required_action": {
                    "submit_tool_outputs": {"tool_calls": [{"id": "call_1", "type": "function",
                        "function": {"name": "escalate_to_human", "arguments": "{}"}}]}}}"#,
            )
            .create_async()
            .await;
        let cancel = server
            .mock("POST", "/threads/thread_1/runs/run_1/cancel")
            .with_status(200)
            .with_body(r#"{"id": "run_1", "status": "cancelling"}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = AssistantsAdapter::new(Client::new(), "sk-test", "asst_1", &server.url())
            .with_polling(Duration::from_millis(1), 3);
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(store.clone(), Arc::new(provider));

        let reply = engine
            .handle_inbound_message(InboundMessage::new("c1", "a person please"))
            .await
            .unwrap();

        assert!(reply.is_none());
        cancel.assert_async().await;
        let conversation = store.conversation("c1").await.unwrap();
        assert!(conversation.needs_human);
        assert_eq!(conversation.provider_session_id.as_deref(), Some("thread_1"));
    }
}
