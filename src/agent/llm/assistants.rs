//! Hosted assistant/thread adapter.
//!
//! Conversation state lives server-side in a thread. A turn appends the
//! newest user message (or submits tool outputs to the run waiting on
//! them), starts a run and polls it until it reaches a terminal state.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{ContentBlock, ImageSource, Message, Role, ToolUseRequest};
use super::types::{Created, MessageList, Run, ThreadContent};
use super::{ProviderAdapter, ProviderSession, TurnOutcome, TurnRequest};

pub const ASSISTANTS_API_BASE: &str = "https://api.openai.com/v1";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_MAX_POLLS: u32 = 120;

/// Assistants API client.
#[derive(Clone)]
pub struct AssistantsAdapter {
    http: Client,
    api_key: String,
    assistant_id: String,
    /// Overrides the assistant's own model for each run.
    model: Option<String>,
    api_base: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl AssistantsAdapter {
    pub fn new(http: Client, api_key: &str, assistant_id: &str, api_base: &str) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            assistant_id: assistant_id.to_string(),
            model: None,
            api_base: api_base.trim_end_matches('/').to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.is_empty());
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Assistants API error ({status}): {error_text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse response: {e}")))
    }

    async fn ensure_thread(&self, session: &mut ProviderSession) -> Result<String> {
        if let Some(id) = &session.id {
            return Ok(id.clone());
        }
        let thread: Created = self
            .send(self.request(reqwest::Method::POST, "/threads").json(&json!({})))
            .await?;
        info!("Created thread {}", thread.id);
        session.id = Some(thread.id.clone());
        Ok(thread.id)
    }

    async fn append_user_message(&self, thread_id: &str, message: &Message) -> Result<()> {
        let content = convert_content(message);
        if content.is_empty() {
            return Err(Error::Validation(
                "Nothing to send: message has no text or URL images".to_string(),
            ));
        }
        let _: Created = self
            .send(
                self.request(reqwest::Method::POST, &format!("/threads/{thread_id}/messages"))
                    .json(&json!({"role": "user", "content": content})),
            )
            .await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, turn: &TurnRequest<'_>) -> Result<String> {
        let mut body = json!({ "assistant_id": self.assistant_id });
        if let Some(model) = &self.model {
            body["model"] = json!(model);
        }
        if !turn.system_prompt.is_empty() {
            body["instructions"] = json!(turn.system_prompt);
        }
        if !turn.tools.is_empty() {
            body["tools"] = convert_tools(turn.tools);
        }
        let run: Created = self
            .send(
                self.request(reqwest::Method::POST, &format!("/threads/{thread_id}/runs"))
                    .json(&body),
            )
            .await?;
        debug!("Started run {} on thread {}", run.id, thread_id);
        Ok(run.id)
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        results: &Message,
    ) -> Result<()> {
        let outputs: Vec<Value> = results
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id, content, ..
                } => Some(json!({"tool_call_id": tool_use_id, "output": content})),
                _ => None,
            })
            .collect();

        let _: Run = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
                )
                .json(&json!({ "tool_outputs": outputs })),
            )
            .await?;
        Ok(())
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let run: Run = self
            .send(self.request(
                reqwest::Method::POST,
                &format!("/threads/{thread_id}/runs/{run_id}/cancel"),
            ))
            .await?;
        info!("Cancelled run {} on thread {} ({})", run.id, thread_id, run.status);
        Ok(())
    }

    async fn poll(
        &self,
        session: &mut ProviderSession,
        thread_id: &str,
        run_id: &str,
    ) -> Result<TurnOutcome> {
        for attempt in 0..self.max_polls {
            let run: Run = self
                .send(self.request(
                    reqwest::Method::GET,
                    &format!("/threads/{thread_id}/runs/{run_id}"),
                ))
                .await?;
            debug!("Run {} status {} (poll {})", run.id, run.status, attempt + 1);

            match run.status.as_str() {
                "completed" => {
                    session.pending_run = None;
                    return self
                        .last_assistant_text(thread_id)
                        .await
                        .map(TurnOutcome::Completed);
                }
                "requires_action" => {
                    session.pending_run = Some(run.id.clone());
                    let calls = run
                        .required_action
                        .map(|a| a.submit_tool_outputs.tool_calls)
                        .unwrap_or_default();
                    let requests = calls
                        .into_iter()
                        .map(|call| ToolUseRequest {
                            input: serde_json::from_str(&call.function.arguments)
                                .unwrap_or(Value::String(call.function.arguments)),
                            id: call.id,
                            name: call.function.name,
                        })
                        .collect();
                    return Ok(TurnOutcome::ToolRequests { text: None, requests });
                }
                "failed" | "cancelled" | "expired" | "incomplete" => {
                    session.pending_run = None;
                    let reason = run
                        .last_error
                        .map(|e| match e.code {
                            Some(code) => format!("{code}: {}", e.message),
                            None => e.message,
                        })
                        .unwrap_or_else(|| run.status.clone());
                    return Err(Error::RunFailed(format!(
                        "Run {} ended {}: {}",
                        run.id, run.status, reason
                    )));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }

        Err(Error::RunFailed(format!(
            "Run {run_id} did not finish after {} polls",
            self.max_polls
        )))
    }

    async fn last_assistant_text(&self, thread_id: &str) -> Result<String> {
        let list: MessageList = self
            .send(self.request(
                reqwest::Method::GET,
                &format!("/threads/{thread_id}/messages?order=desc&limit=1"),
            ))
            .await?;

        let text = list
            .data
            .into_iter()
            .find(|m| m.role == "assistant")
            .map(|m| {
                m.content
                    .into_iter()
                    .filter_map(|c| match c {
                        ThreadContent::Text { text } => Some(text.value),
                        ThreadContent::Other => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok(text)
    }
}

fn convert_content(message: &Message) -> Vec<Value> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
            ContentBlock::Image {
                source: ImageSource::Url { url },
            } => Some(json!({"type": "image_url", "image_url": {"url": url}})),
            ContentBlock::Image {
                source: ImageSource::Base64 { .. },
            } => {
                warn!("Skipping inline image: threads only accept image URLs");
                None
            }
            _ => None,
        })
        .collect()
}

fn convert_tools(tools: &[ToolDefinition]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters
                    }
                })
            })
            .collect(),
    )
}

#[async_trait]
impl ProviderAdapter for AssistantsAdapter {
    async fn submit_turn(
        &self,
        session: &mut ProviderSession,
        turn: TurnRequest<'_>,
    ) -> Result<TurnOutcome> {
        let last = turn
            .history
            .last()
            .filter(|m| m.role == Role::User)
            .ok_or_else(|| Error::Provider("Turn must end with a user message".to_string()))?;

        let thread_id = self.ensure_thread(session).await?;

        let run_id = match session.pending_run.clone() {
            Some(run_id) if last.is_tool_results() => {
                info!("Submitting tool outputs to run {}", run_id);
                self.submit_tool_outputs(&thread_id, &run_id, last).await?;
                run_id
            }
            _ => {
                // A thread rejects new messages while a run is still active.
                if let Some(stale) = session.pending_run.take() {
                    warn!("Cancelling run {} before appending a new message", stale);
                    self.cancel_run(&thread_id, &stale).await?;
                }
                self.append_user_message(&thread_id, last).await?;
                self.start_run(&thread_id, &turn).await?
            }
        };

        self.poll(session, &thread_id, &run_id).await
    }

    async fn abandon(&self, session: &mut ProviderSession) -> Result<()> {
        let (Some(thread_id), Some(run_id)) = (session.id.as_deref(), session.pending_run.take())
        else {
            return Ok(());
        };
        self.cancel_run(thread_id, &run_id).await
    }

    fn name(&self) -> &str {
        "assistants"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::ToolResult;

    fn adapter(base: &str) -> AssistantsAdapter {
        AssistantsAdapter::new(Client::new(), "sk-test", "asst_1", base)
            .with_polling(Duration::from_millis(1), 5)
    }

    fn turn<'a>(history: &'a [Message], tools: &'a [ToolDefinition]) -> TurnRequest<'a> {
        TurnRequest {
            history,
            tools,
            system_prompt: "be helpful",
        }
    }

    #[tokio::test]
    async fn test_new_thread_run_completes() {
        let mut server = mockito::Server::new_async().await;
        let create_thread = server
            .mock("POST", "/threads")
            .match_header("authorization", "Bearer sk-test")
            .match_header("openai-beta", "assistants=v2")
            .with_status(200)
            .with_body(r#"{"id": "thread_1"}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/threads/thread_1/messages")
            .match_body(mockito::Matcher::PartialJson(json!({
                "role": "user",
                "content": [{"type": "text", "text": "hello"}]
            })))
            .with_status(200)
            .with_body(r#"{"id": "msg_1"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/threads/thread_1/runs")
            .match_body(mockito::Matcher::PartialJson(json!({
                "assistant_id": "asst_1",
                "instructions": "be helpful"
            })))
            .with_status(200)
            .with_body(r#"{"id": "run_1"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/threads/thread_1/runs/run_1")
            .with_status(200)
            .with_body(r#"{"id": "run_1", "status": "completed"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/threads/thread_1/messages")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data": [{"role": "assistant", "content": [{"type": "text", "text": {"value": "hi there", "annotations": []}}]}]}"#)
            .create_async()
            .await;

        let mut session = ProviderSession::default();
        let history = vec![Message::user("hello")];
        let outcome = adapter(&server.url())
            .submit_turn(&mut session, turn(&history, &[]))
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Completed("hi there".to_string()));
        assert_eq!(session.id.as_deref(), Some("thread_1"));
        assert_eq!(session.pending_run, None);
        create_thread.assert_async().await;
    }

    #[tokio::test]
    async fn test_requires_action_then_submit_outputs() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/threads/thread_9/messages")
            .with_status(200)
            .with_body(r#"{"id": "msg_1"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/threads/thread_9/runs")
            .with_status(200)
            .with_body(r#"{"id": "run_7"}"#)
            .create_async()
            .await;
        let poll = server
            .mock("GET", "/threads/thread_9/runs/run_7")
            .with_status(200)
            .with_body(
                r#"{"id": "run_7", "status": "requires_action", "required_action": {"type": "submit_tool_outputs",
                    "submit_tool_outputs": {"tool_calls": [
                        {"id": "call_a", "type": "function", "function": {"name": "fn_lookup", "arguments": "{\"id\": 5}"}}
                    ]}}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let adapter = adapter(&server.url());
        let mut session = ProviderSession::resume(Some("thread_9".to_string()));
        let mut history = vec![Message::user("look up 5")];
        let outcome = adapter.submit_turn(&mut session, turn(&history, &[])).await.unwrap();

        let requests = match outcome {
            TurnOutcome::ToolRequests { requests, .. } => requests,
            other => panic!("expected tool requests, got {other:?}"),
        };
        assert_eq!(requests[0].id, "call_a");
        assert_eq!(requests[0].input, json!({"id": 5}));
        assert_eq!(session.pending_run.as_deref(), Some("run_7"));
        poll.assert_async().await;
        poll.remove_async().await;

        let submit = server
            .mock("POST", "/threads/thread_9/runs/run_7/submit_tool_outputs")
            .match_body(mockito::Matcher::Json(json!({
                "tool_outputs": [{"tool_call_id": "call_a", "output": "{\"name\":\"Ada\"}"}]
            })))
            .with_status(200)
            .with_body(r#"{"id": "run_7", "status": "queued"}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/threads/thread_9/runs/run_7")
            .with_status(200)
            .with_body(
                r#"{"id": "run_7", "status": "failed",
                    "last_error": {"code": "server_error", "message": "boom"}}"#,
            )
            .create_async()
            .await;

        history.push(Message::assistant_with_tools(None, &requests));
        history.push(Message::tool_results(vec![ToolResult::success(
            "call_a",
            &json!({"name": "Ada"}),
        )]));
        let err = adapter.submit_turn(&mut session, turn(&history, &[])).await.unwrap_err();

        match err {
            Error::RunFailed(msg) => assert!(msg.contains("boom")),
            other => panic!("expected RunFailed, got {other:?}"),
        }
        assert_eq!(session.pending_run, None);
        submit.assert_async().await;
    }

    #[tokio::test]
    async fn test_poll_limit_is_run_failed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/threads/t/messages")
            .with_status(200)
            .with_body(r#"{"id": "m"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/threads/t/runs")
            .with_status(200)
            .with_body(r#"{"id": "r"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/threads/t/runs/r")
            .with_status(200)
            .with_body(r#"{"id": "r", "status": "in_progress"}"#)
            .expect(5)
            .create_async()
            .await;

        let mut session = ProviderSession::resume(Some("t".to_string()));
        let history = vec![Message::user("slow")];
        let err = adapter(&server.url())
            .submit_turn(&mut session, turn(&history, &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RunFailed(_)));
    }

    #[tokio::test]
    async fn test_abandon_cancels_pending_run() {
        let mut server = mockito::Server::new_async().await;
        let cancel = server
            .mock("POST", "/threads/thread_3/runs/run_3/cancel")
            .with_status(200)
            .with_body(r#"{"id": "run_3", "status": "cancelling"}"#)
            .expect(1)
            .create_async()
            .await;

        let adapter = adapter(&server.url());
        let mut session = ProviderSession {
            id: Some("thread_3".to_string()),
            pending_run: Some("run_3".to_string()),
        };
        adapter.abandon(&mut session).await.unwrap();

        cancel.assert_async().await;
        assert_eq!(session.pending_run, None);
        assert_eq!(session.id.as_deref(), Some("thread_3"));

        // Nothing left to release.
        adapter.abandon(&mut session).await.unwrap();
        cancel.assert_async().await;
    }

    #[tokio::test]
    async fn test_new_message_cancels_stale_run_first() {
        let mut server = mockito::Server::new_async().await;
        let cancel = server
            .mock("POST", "/threads/t/runs/old/cancel")
            .with_status(200)
            .with_body(r#"{"id": "old", "status": "cancelling"}"#)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/threads/t/messages")
            .with_status(200)
            .with_body(r#"{"id": "m"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/threads/t/runs")
            .with_status(200)
            .with_body(r#"{"id": "r"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/threads/t/runs/r")
            .with_status(200)
            .with_body(r#"{"id": "r", "status": "completed"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/threads/t/messages")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"data": [{"role": "assistant", "content": [{"type": "text", "text": {"value": "ok", "annotations": []}}]}]}"#)
            .create_async()
            .await;

        let mut session = ProviderSession {
            id: Some("t".to_string()),
            pending_run: Some("old".to_string()),
        };
        let history = vec![Message::user("new question")];
        let outcome = adapter(&server.url())
            .submit_turn(&mut session, turn(&history, &[]))
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Completed("ok".to_string()));
        cancel.assert_async().await;
    }

    #[test]
    fn test_convert_content_skips_inline_images() {
        let msg = Message::user_blocks(vec![
            ContentBlock::Text { text: "see".to_string() },
            ContentBlock::Image {
                source: ImageSource::Url {
                    url: "https://img.test/a.png".to_string(),
                },
            },
            ContentBlock::Image {
                source: ImageSource::Base64 {
                    media_type: "image/png".to_string(),
                    data: "AAAA".to_string(),
                },
            },
        ]);
        let content = convert_content(&msg);
        assert_eq!(content.len(), 2);
        assert_eq!(content[1]["image_url"]["url"], "https://img.test/a.png");
    }
}
