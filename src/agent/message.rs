//! Message types for agent turns
//!
//! History is an ordered list of role-tagged messages whose content is a
//! list of blocks (`text`, `image`, `tool_use`, `tool_result`). The serde
//! shape is the one the stateless provider puts on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Image payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// One content block of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a user text message
    pub fn user(text: impl Into<String>) -> Self {
        Self::user_blocks(vec![ContentBlock::Text { text: text.into() }])
    }

    pub fn user_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    /// Create an assistant text message
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Assistant turn carrying tool requests (and any text that came with them)
    pub fn assistant_with_tools(text: Option<String>, requests: &[ToolUseRequest]) -> Self {
        let mut content = Vec::with_capacity(requests.len() + 1);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            content.push(ContentBlock::Text { text });
        }
        content.extend(requests.iter().map(|r| ContentBlock::ToolUse {
            id: r.id.clone(),
            name: r.name.clone(),
            input: r.input.clone(),
        }));
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// User turn carrying tool results, in the order given
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::user_blocks(
            results
                .into_iter()
                .map(|r| ContentBlock::ToolResult {
                    tool_use_id: r.tool_use_id,
                    content: r.content,
                    is_error: r.is_error,
                })
                .collect(),
        )
    }

    /// Concatenated text blocks
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }

    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
    }

    pub fn is_tool_results(&self) -> bool {
        !self.content.is_empty()
            && self
                .content
                .iter()
                .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// The outcome of one tool call, correlated by `tool_use_id`
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_use_id: &str, payload: &Value) -> Self {
        Self {
            tool_use_id: tool_use_id.to_string(),
            content: render(payload),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: &str, payload: &Value) -> Self {
        Self {
            tool_use_id: tool_use_id.to_string(),
            content: render(payload),
            is_error: true,
        }
    }
}

fn render(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Inbound message from a channel collaborator
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    /// Conversation (or channel session) this message belongs to.
    pub conversation_id: String,
    pub text: String,
    pub images: Vec<ImageSource>,
    /// Set when an operator is testing the agent; history then lives in
    /// the engine's session buffer instead of the conversation store.
    pub test_mode_identity: Option<String>,
}

impl InboundMessage {
    pub fn new(conversation_id: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn with_image(mut self, image: ImageSource) -> Self {
        self.images.push(image);
        self
    }

    pub fn test_mode(mut self, identity: &str) -> Self {
        self.test_mode_identity = Some(identity.to_string());
        self
    }

    /// Key used for stale-turn stamps and session buffers.
    pub fn session_key(&self) -> String {
        match &self.test_mode_identity {
            Some(identity) => format!("test:{identity}"),
            None => format!("conversation:{}", self.conversation_id),
        }
    }

    /// Content blocks of the new user turn.
    pub fn to_message(&self) -> Message {
        let mut content = Vec::with_capacity(self.images.len() + 1);
        if !self.text.is_empty() {
            content.push(ContentBlock::Text {
                text: self.text.clone(),
            });
        }
        content.extend(self.images.iter().cloned().map(|source| ContentBlock::Image { source }));
        Message::user_blocks(content)
    }
}

/// Reply produced for an inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub reply_text: String,
    pub provider_session_id: Option<String>,
}

/// Checks that every tool_use in the history has exactly one matching
/// tool_result in the following message, in the same order.
pub fn tool_results_paired(history: &[Message]) -> bool {
    history.windows(2).all(|pair| {
        let uses: Vec<&str> = pair[0].tool_uses().map(|(id, _, _)| id).collect();
        if uses.is_empty() {
            return true;
        }
        let results: Vec<&str> = pair[1].tool_result_ids().collect();
        uses == results
    }) && history.last().map_or(true, |m| m.tool_uses().next().is_none())
}
