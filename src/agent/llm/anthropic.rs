//! Stateless messages API adapter.
//!
//! Sends the full role-tagged history on every turn. Text, image,
//! tool_use and tool_result blocks go on the wire exactly as
//! [`Message`](crate::agent::Message) serializes them.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::ToolUseRequest;
use super::types::{ApiErrorEnvelope, MessagesResponse, ResponseBlock};
use super::{ProviderAdapter, ProviderSession, TurnOutcome, TurnRequest};

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API client.
#[derive(Clone)]
pub struct AnthropicAdapter {
    http: Client,
    api_key: String,
    model: String,
    api_base: String,
    max_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(http: Client, api_key: &str, model: &str, api_base: &str, max_tokens: u32) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            max_tokens,
        }
    }

    fn build_request(&self, turn: &TurnRequest<'_>) -> Value {
        let mut request = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": turn.history,
        });

        if !turn.system_prompt.is_empty() {
            request["system"] = json!(turn.system_prompt);
        }

        if let Some(tools) = convert_tools(turn.tools) {
            request["tools"] = tools;
        }

        request
    }

    fn parse_response(&self, response: MessagesResponse) -> Result<TurnOutcome> {
        let mut text = Vec::new();
        let mut requests = Vec::new();

        for block in response.content {
            match block {
                ResponseBlock::Text { text: t } => text.push(t),
                ResponseBlock::ToolUse { id, name, input } => {
                    requests.push(ToolUseRequest { id, name, input });
                }
                ResponseBlock::Other => {}
            }
        }

        if let Some(usage) = &response.usage {
            debug!(
                "Turn used {} input / {} output tokens (stop: {})",
                usage.input_tokens,
                usage.output_tokens,
                response.stop_reason.as_deref().unwrap_or("none")
            );
        }

        let text = text.join("\n");
        if requests.is_empty() {
            return Ok(TurnOutcome::Completed(text));
        }
        Ok(TurnOutcome::ToolRequests {
            text: if text.is_empty() { None } else { Some(text) },
            requests,
        })
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Option<Value> {
    if tools.is_empty() {
        return None;
    }
    Some(Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters
                })
            })
            .collect(),
    ))
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn submit_turn(
        &self,
        _session: &mut ProviderSession,
        turn: TurnRequest<'_>,
    ) -> Result<TurnOutcome> {
        let request = self.build_request(&turn);
        info!("Submitting {} messages to {}", turn.history.len(), self.model);

        let response = self
            .http
            .post(format!("{}/v1/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorEnvelope>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            return Err(Error::Provider(format!("Messages API error ({status}): {message}")));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Failed to parse response: {e}")))?;
        self.parse_response(parsed)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
