//! Outbound collaborators: notifications, audit trail and knowledge.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::Result;

/// Event delivered to an organization's real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedsHumanEvent {
    pub organization_id: String,
    pub conversation_id: String,
    /// Whether this call flipped the conversation to needs-human.
    pub newly_escalated: bool,
    pub reason: Option<String>,
}

/// Real-time notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn needs_human(&self, event: NeedsHumanEvent) -> Result<()>;
}

/// Notifier that only logs.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn needs_human(&self, event: NeedsHumanEvent) -> Result<()> {
        info!(
            "Conversation {} in organization {} needs a human (new: {})",
            event.conversation_id, event.organization_id, event.newly_escalated
        );
        Ok(())
    }
}

/// Notifier that keeps every event, for tests and the CLI.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NeedsHumanEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NeedsHumanEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn needs_human(&self, event: NeedsHumanEvent) -> Result<()> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
        Ok(())
    }
}

/// Result of one function invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure { error: String },
}

/// One invocation attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub conversation_id: String,
    pub function: String,
    pub arguments: Value,
    #[serde(flatten)]
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub at: DateTime<Utc>,
}

/// Receives every invocation attempt.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Audit sink that writes to the log.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        match &record.outcome {
            AuditOutcome::Success => info!(
                "Function {} succeeded for conversation {}",
                record.function, record.conversation_id
            ),
            AuditOutcome::Failure { error } => warn!(
                "Function {} failed for conversation {}: {}",
                record.function, record.conversation_id, error
            ),
        }
    }
}

/// Audit sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, record: AuditRecord) {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record);
    }
}

/// Supplies extracted knowledge-base text for an agent.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn knowledge_for(&self, agent_id: &str) -> Result<String>;
}

/// Knowledge source returning fixed text.
#[derive(Debug, Default, Clone)]
pub struct StaticKnowledge(pub String);

#[async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn knowledge_for(&self, _agent_id: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}
