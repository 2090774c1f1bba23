//! Function registry - callable HTTP function definitions.
//!
//! Definitions are owned by an external management store and consumed
//! read-only here. The registry resolves the names the model uses back to
//! stored definitions.

mod definition;

pub use definition::{normalize_name, FunctionDefinition, HttpMethod, ParamType, ParameterSpec};

use std::sync::Arc;

use tracing::debug;

use crate::error::Error;
use crate::store::FunctionStore;
use crate::Result;

/// Prefix added to user-authored function names in the tool catalog so
/// they can never collide with the reserved tools.
pub const FUNCTION_PREFIX: &str = "fn_";

/// Catalog name for a stored function.
pub fn catalog_name(def: &FunctionDefinition) -> String {
    format!("{}{}", FUNCTION_PREFIX, def.normalized_name)
}

/// Strip the disambiguation prefix from a tool name, if present.
pub fn strip_prefix(name: &str) -> &str {
    name.strip_prefix(FUNCTION_PREFIX).unwrap_or(name)
}

/// Resolves tool names to function definitions for an agent.
#[derive(Clone)]
pub struct FunctionRegistry {
    store: Arc<dyn FunctionStore>,
}

impl FunctionRegistry {
    pub fn new(store: Arc<dyn FunctionStore>) -> Self {
        Self { store }
    }

    /// All definitions visible to an agent.
    pub async fn list(&self, agent_id: &str) -> Result<Vec<FunctionDefinition>> {
        self.store.functions_for_agent(agent_id).await
    }

    /// Resolve a tool name (prefixed or not) to its definition.
    pub async fn resolve(&self, name: &str, agent_id: &str) -> Result<FunctionDefinition> {
        let wanted = normalize_name(strip_prefix(name));
        debug!("Resolving function {} (normalized {}) for agent {}", name, wanted, agent_id);

        self.store
            .functions_for_agent(agent_id)
            .await?
            .into_iter()
            .find(|def| def.normalized_name == wanted)
            .ok_or_else(|| Error::NotFound(format!("Unknown function: {name}")))
    }
}
