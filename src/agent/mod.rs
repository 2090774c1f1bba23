//! Agent module - core agent logic.
//!
//! This module contains:
//! - Message types (InboundMessage, Message, Reply)
//! - Provider adapters and their registry
//! - The bounded agent loop and the stale-turn guard
//! - The engine channels hand inbound messages to
//!
//! # Adding a New Provider
//!
//! See [`llm::ProviderRegistry`] for instructions.

mod context;
mod engine;
mod loop_impl;
pub mod message;
mod stamps;

// Provider adapters in submodule
pub mod llm;

// Re-exports for convenience
pub use context::{
    build_system_prompt, window_history, SessionBuffer, DEFAULT_SESSION_TTL_SECS,
    MAX_HISTORY_MESSAGES,
};
pub use engine::{build_dispatcher, Engine};
pub use llm::{ProviderAdapter, ProviderRegistry, ProviderSession, TurnOutcome, TurnRequest};
pub use loop_impl::{AgentLoop, LoopInput, LoopOutcome, DEFAULT_MAX_ITERATIONS};
pub use message::{
    ContentBlock, ImageSource, InboundMessage, Message, Reply, Role, ToolResult, ToolUseRequest,
};
pub use stamps::{TurnStamps, TurnTicket};
