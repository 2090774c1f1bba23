//! Tool dispatcher - routes model tool calls to reserved tools or stored functions

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::agent::message::{ToolResult, ToolUseRequest};
use crate::collab::{AuditOutcome, AuditRecord, AuditSink};
use crate::error::Error;
use crate::invoker::HttpInvoker;
use crate::registry::{catalog_name, strip_prefix, FunctionRegistry};
use crate::Result;

use super::{Tool, ToolContext, ToolDefinition, ESCALATE_TOOL};

/// Result of dispatching one tool request
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub result: ToolResult,
    /// The escalation tool ran successfully.
    pub escalated: bool,
}

/// Dispatches tool requests for one agent.
///
/// Reserved tools are matched by exact name first; everything else is
/// resolved through the function registry and invoked over HTTP.
pub struct ToolDispatcher {
    reserved: HashMap<String, Box<dyn Tool>>,
    registry: FunctionRegistry,
    invoker: Arc<HttpInvoker>,
    audit: Arc<dyn AuditSink>,
}

impl ToolDispatcher {
    pub fn new(
        registry: FunctionRegistry,
        invoker: Arc<HttpInvoker>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            reserved: HashMap::new(),
            registry,
            invoker,
            audit,
        }
    }

    /// Register a reserved tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.reserved.insert(tool.name().to_string(), Box::new(tool));
    }

    /// Tool catalog for an agent: stored functions under their prefixed
    /// names, followed by the reserved tools in name order.
    pub async fn catalog(&self, agent_id: &str) -> Result<Vec<ToolDefinition>> {
        let mut tools: Vec<ToolDefinition> = self
            .registry
            .list(agent_id)
            .await?
            .iter()
            .map(|def| ToolDefinition {
                name: catalog_name(def),
                description: if def.description.is_empty() {
                    def.name.clone()
                } else {
                    def.description.clone()
                },
                parameters: def.json_schema(),
            })
            .collect();

        let mut reserved: Vec<ToolDefinition> =
            self.reserved.values().map(|t| t.to_definition()).collect();
        reserved.sort_by(|a, b| a.name.cmp(&b.name));
        tools.extend(reserved);
        Ok(tools)
    }

    /// Dispatch one request. Never fails: every error becomes an error
    /// result for the model.
    pub async fn dispatch(&self, ctx: &ToolContext, request: &ToolUseRequest) -> ToolOutcome {
        debug!("Dispatching tool {} ({})", request.name, request.id);

        if let Some(tool) = self.reserved.get(&request.name) {
            return match tool.execute(ctx, request.input.clone()).await {
                Ok(value) => ToolOutcome {
                    result: ToolResult::success(&request.id, &value),
                    escalated: request.name == ESCALATE_TOOL,
                },
                Err(e) => {
                    warn!("Tool {} failed: {}", request.name, e);
                    ToolOutcome {
                        result: ToolResult::error(&request.id, &e.to_tool_payload()),
                        escalated: false,
                    }
                }
            };
        }

        let result = match self.call_function(ctx, request).await {
            Ok(value) => ToolResult::success(&request.id, &value),
            Err(e) => {
                if !e.is_tool_level() {
                    warn!("Unexpected failure in tool {}: {}", request.name, e);
                }
                ToolResult::error(&request.id, &e.to_tool_payload())
            }
        };
        ToolOutcome {
            result,
            escalated: false,
        }
    }

    /// Dispatch every request concurrently. Results come back in request
    /// order regardless of completion order.
    pub async fn dispatch_all(
        &self,
        ctx: &ToolContext,
        requests: &[ToolUseRequest],
    ) -> Vec<ToolOutcome> {
        join_all(requests.iter().map(|request| self.dispatch(ctx, request))).await
    }

    async fn call_function(&self, ctx: &ToolContext, request: &ToolUseRequest) -> Result<Value> {
        let outcome = match self.registry.resolve(&request.name, &ctx.agent_id).await {
            Ok(def) => self.invoker.invoke(&def, &request.input).await,
            Err(e) => Err(e),
        };

        let (audit_outcome, status) = match &outcome {
            Ok(_) => (AuditOutcome::Success, None),
            Err(e) => {
                let status = match e {
                    Error::Invocation { status, .. } => Some(*status),
                    _ => None,
                };
                (AuditOutcome::Failure { error: e.to_string() }, status)
            }
        };

        self.audit
            .record(AuditRecord {
                conversation_id: ctx.conversation_id.clone(),
                function: strip_prefix(&request.name).to_string(),
                arguments: request.input.clone(),
                outcome: audit_outcome,
                status,
                at: Utc::now(),
            })
            .await;

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthenticatorManager;
    use crate::collab::{MemoryAuditSink, RecordingNotifier};
    use crate::registry::{FunctionDefinition, HttpMethod, ParamType, ParameterSpec};
    use crate::store::InMemoryStore;
    use crate::tools::{DelayTool, EscalateTool, SaveUserInfoTool};
    use reqwest::Client;
    use serde_json::json;
    use std::sync::Mutex;

    fn ctx() -> ToolContext {
        ToolContext {
            agent_id: "agent-1".to_string(),
            organization_id: "org".to_string(),
            conversation_id: "c1".to_string(),
        }
    }

    fn dispatcher(store: Arc<InMemoryStore>, audit: Arc<MemoryAuditSink>) -> ToolDispatcher {
        let http = Client::new();
        let auth = Arc::new(AuthenticatorManager::new(store.clone(), http.clone()));
        let invoker = Arc::new(HttpInvoker::new(http, auth));
        ToolDispatcher::new(FunctionRegistry::new(store), invoker, audit)
    }

    fn request(id: &str, name: &str, input: Value) -> ToolUseRequest {
        ToolUseRequest {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }
    }

    #[tokio::test]
    async fn test_catalog_lists_prefixed_functions_then_reserved() {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_function(
                "agent-1",
                FunctionDefinition::new("Get Order", HttpMethod::Get, "https://api.test/orders/:id")
                    .with_param(ParameterSpec::required("id", ParamType::String)),
            )
            .unwrap();

        let mut dispatcher = dispatcher(store.clone(), Arc::new(MemoryAuditSink::default()));
        dispatcher.register(EscalateTool::new(
            store.clone(),
            Arc::new(RecordingNotifier::default()),
        ));
        dispatcher.register(SaveUserInfoTool::new(store));

        let names: Vec<String> = dispatcher
            .catalog("agent-1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["fn_get_order", "escalate_to_human", "save_user_info"]);
    }

    #[tokio::test]
    async fn test_unknown_function_is_error_result_and_audited() {
        let audit = Arc::new(MemoryAuditSink::default());
        let dispatcher = dispatcher(Arc::new(InMemoryStore::new()), audit.clone());

        let outcome = dispatcher
            .dispatch(&ctx(), &request("t1", "fn_missing", json!({"a": 1})))
            .await;

        assert!(outcome.result.is_error);
        assert!(!outcome.escalated);
        assert_eq!(outcome.result.tool_use_id, "t1");
        let payload: Value = serde_json::from_str(&outcome.result.content).unwrap();
        assert_eq!(payload["error"], "not_found");

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].function, "missing");
        assert!(matches!(records[0].outcome, AuditOutcome::Failure { .. }));
    }

    #[tokio::test]
    async fn test_function_call_is_audited_with_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/orders/42")
            .with_status(404)
            .with_body(r#"{"detail":"no such order"}"#)
            .create_async()
            .await;

        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_function(
                "agent-1",
                FunctionDefinition::new(
                    "Get Order",
                    HttpMethod::Get,
                    &format!("{}/orders/:id", server.url()),
                )
                .with_param(ParameterSpec::required("id", ParamType::String)),
            )
            .unwrap();
        let audit = Arc::new(MemoryAuditSink::default());
        let dispatcher = dispatcher(store, audit.clone());

        let outcome = dispatcher
            .dispatch(&ctx(), &request("t1", "fn_get_order", json!({"id": "42"})))
            .await;

        mock.assert_async().await;
        assert!(outcome.result.is_error);
        let payload: Value = serde_json::from_str(&outcome.result.content).unwrap();
        assert_eq!(payload["status"], 404);
        assert_eq!(payload["body"]["detail"], "no such order");
        assert_eq!(audit.records()[0].status, Some(404));
    }

    #[tokio::test]
    async fn test_successful_call_is_audited() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tickets")
            .match_body(mockito::Matcher::Json(json!({"subject": "late delivery"})))
            .with_status(201)
            .with_body(r#"{"ticket":"T-9"}"#)
            .create_async()
            .await;

        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_function(
                "agent-1",
                FunctionDefinition::new(
                    "Open Ticket",
                    HttpMethod::Post,
                    &format!("{}/tickets", server.url()),
                )
                .with_param(ParameterSpec::required("subject", ParamType::String)),
            )
            .unwrap();
        let audit = Arc::new(MemoryAuditSink::default());
        let dispatcher = dispatcher(store, audit.clone());

        let outcome = dispatcher
            .dispatch(
                &ctx(),
                &request("t1", "fn_open_ticket", json!({"subject": "late delivery"})),
            )
            .await;

        mock.assert_async().await;
        assert!(!outcome.result.is_error);
        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].function, "open_ticket");
        assert_eq!(records[0].outcome, AuditOutcome::Success);
        assert_eq!(records[0].status, None);
        assert_eq!(records[0].arguments, json!({"subject": "late delivery"}));
    }

    #[tokio::test]
    async fn test_escalation_sets_flag() {
        let store = Arc::new(InMemoryStore::new());
        let mut dispatcher = dispatcher(store.clone(), Arc::new(MemoryAuditSink::default()));
        dispatcher.register(EscalateTool::new(store, Arc::new(RecordingNotifier::default())));

        let outcome = dispatcher
            .dispatch(&ctx(), &request("t1", ESCALATE_TOOL, json!({})))
            .await;
        assert!(outcome.escalated);
        assert!(!outcome.result.is_error);
    }

    #[tokio::test]
    async fn test_dispatch_all_preserves_request_order() {
        let finished = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = dispatcher(
            Arc::new(InMemoryStore::new()),
            Arc::new(MemoryAuditSink::default()),
        );
        dispatcher.register(DelayTool {
            name: "delay".to_string(),
            finished: finished.clone(),
        });

        let requests = vec![
            request("a", "delay", json!({"label": "0", "delay_ms": 60})),
            request("b", "delay", json!({"label": "1", "delay_ms": 120, "fail": true})),
            request("c", "delay", json!({"label": "2", "delay_ms": 0})),
        ];
        let outcomes = dispatcher.dispatch_all(&ctx(), &requests).await;

        let ids: Vec<&str> = outcomes.iter().map(|o| o.result.tool_use_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!outcomes[0].result.is_error);
        assert!(outcomes[1].result.is_error);
        assert_eq!(*finished.lock().unwrap(), vec!["2", "0", "1"]);
    }
}
