//! Escalate-to-human tool

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::collab::{NeedsHumanEvent, Notifier};
use crate::store::ConversationStore;
use crate::Result;

use super::{Tool, ToolContext, ESCALATE_TOOL};

/// Flags the conversation as needing a human and notifies the organization.
///
/// Idempotent: on a conversation that is already flagged and still open the
/// flag is left alone, the organization is notified again and the call
/// reports the existing state.
pub struct EscalateTool {
    conversations: Arc<dyn ConversationStore>,
    notifier: Arc<dyn Notifier>,
}

impl EscalateTool {
    pub fn new(conversations: Arc<dyn ConversationStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            conversations,
            notifier,
        }
    }
}

#[async_trait]
impl Tool for EscalateTool {
    fn name(&self) -> &str {
        ESCALATE_TOOL
    }

    fn description(&self) -> &str {
        "Hand this conversation to a human agent. Use when the user asks for a person \
         or when you cannot help further."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why a human is needed"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<Value> {
        let reason = params.get("reason").and_then(Value::as_str).map(str::to_string);
        let newly_escalated = self.conversations.mark_needs_human(&ctx.conversation_id).await?;

        if newly_escalated {
            info!("Escalated conversation {} to a human", ctx.conversation_id);
        } else {
            info!("Conversation {} was already waiting for a human", ctx.conversation_id);
        }

        let event = NeedsHumanEvent {
            organization_id: ctx.organization_id.clone(),
            conversation_id: ctx.conversation_id.clone(),
            newly_escalated,
            reason,
        };
        if let Err(e) = self.notifier.needs_human(event).await {
            warn!("Failed to notify organization {}: {}", ctx.organization_id, e);
        }

        Ok(json!({
            "escalated": true,
            "alreadyEscalated": !newly_escalated,
        }))
    }
}
