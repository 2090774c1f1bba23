//! Wire types for provider responses.

use serde::Deserialize;
use serde_json::Value;

/// Messages API response.
#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub content: Vec<ResponseBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<MessagesUsage>,
}

/// A content block in a messages response.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct MessagesUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Messages API error envelope.
#[derive(Debug, Deserialize)]
pub struct ApiErrorEnvelope {
    pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub message: String,
}

/// Object with only an id (threads, messages, runs on create).
#[derive(Debug, Deserialize)]
pub struct Created {
    pub id: String,
}

/// Hosted assistant run.
#[derive(Debug, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: String,
    pub required_action: Option<RequiredAction>,
    pub last_error: Option<RunError>,
}

#[derive(Debug, Deserialize)]
pub struct RequiredAction {
    pub submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Debug, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<RunToolCall>,
}

#[derive(Debug, Deserialize)]
pub struct RunToolCall {
    pub id: String,
    pub function: RunFunction,
}

#[derive(Debug, Deserialize)]
pub struct RunFunction {
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
pub struct RunError {
    pub code: Option<String>,
    pub message: String,
}

/// Page of thread messages.
#[derive(Debug, Deserialize)]
pub struct MessageList {
    pub data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ThreadMessage {
    pub role: String,
    pub content: Vec<ThreadContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadContent {
    Text { text: ThreadText },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct ThreadText {
    pub value: String,
}
