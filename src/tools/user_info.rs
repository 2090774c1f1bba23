//! Save-user-info tool

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::Error;
use crate::store::ConversationStore;
use crate::Result;

use super::{Tool, ToolContext, SAVE_USER_INFO_TOOL};

const FIELDS: [&str; 4] = ["name", "email", "phone", "notes"];

/// Stores contact details the user shared on the conversation record.
pub struct SaveUserInfoTool {
    conversations: Arc<dyn ConversationStore>,
}

impl SaveUserInfoTool {
    pub fn new(conversations: Arc<dyn ConversationStore>) -> Self {
        Self { conversations }
    }
}

#[async_trait]
impl Tool for SaveUserInfoTool {
    fn name(&self) -> &str {
        SAVE_USER_INFO_TOOL
    }

    fn description(&self) -> &str {
        "Save contact details the user has shared (name, email, phone, notes)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Full name" },
                "email": { "type": "string", "description": "Email address" },
                "phone": { "type": "string", "description": "Phone number" },
                "notes": { "type": "string", "description": "Anything else worth keeping" }
            },
            "required": []
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<Value> {
        let mut fields = Map::new();
        for key in FIELDS {
            if let Some(value) = params.get(key).and_then(Value::as_str).map(str::trim) {
                if !value.is_empty() {
                    fields.insert(key.to_string(), Value::from(value));
                }
            }
        }

        if fields.is_empty() {
            return Err(Error::Validation(format!(
                "save_user_info needs at least one of: {}",
                FIELDS.join(", ")
            )));
        }

        let saved: Vec<String> = fields.keys().cloned().collect();
        self.conversations.save_contact(&ctx.conversation_id, fields).await?;
        Ok(json!({ "saved": saved }))
    }
}
