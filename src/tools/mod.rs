//! Tools module - what the model may call
//!
//! Stored HTTP functions are exposed under a disambiguation prefix; two
//! reserved tools (escalation and saving user info) are handled in-process
//! and never reach the HTTP invoker.

mod escalation;
mod runner;
mod user_info;

pub use escalation::EscalateTool;
pub use runner::{ToolDispatcher, ToolOutcome};
pub use user_info::SaveUserInfoTool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Reserved tool name: hand the conversation to a human.
pub const ESCALATE_TOOL: &str = "escalate_to_human";

/// Reserved tool name: store contact details for the conversation.
pub const SAVE_USER_INFO_TOOL: &str = "save_user_info";

/// Tool definition for the provider's tool catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Who a tool call is made for
#[derive(Debug, Clone, PartialEq)]
pub struct ToolContext {
    pub agent_id: String,
    pub organization_id: String,
    pub conversation_id: String,
}

/// Tool trait - interface for in-process tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given parameters
    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<Value>;

    /// Convert to tool definition for the catalog
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Test tool that sleeps before answering and records completion order
#[cfg(test)]
pub struct DelayTool {
    pub name: String,
    pub finished: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

#[cfg(test)]
#[async_trait]
impl Tool for DelayTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Sleeps for delay_ms and echoes the label"
    }
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    async fn execute(&self, _ctx: &ToolContext, params: Value) -> Result<Value> {
        let delay = params["delay_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        let label = params["label"].as_str().unwrap_or_default().to_string();
        self.finished.lock().unwrap().push(label.clone());
        if params["fail"].as_bool().unwrap_or(false) {
            return Err(crate::error::Error::Validation(format!("{label} failed")));
        }
        Ok(serde_json::json!({ "label": label }))
    }
}
