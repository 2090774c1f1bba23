//! Agent loop - drives model turns and tool round trips for one inbound message

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Error;
use crate::tools::{ToolContext, ToolDefinition, ToolDispatcher};
use crate::Result;

use super::llm::{ProviderAdapter, ProviderSession, TurnOutcome, TurnRequest};
use super::message::{tool_results_paired, Message, ToolUseRequest};
use super::stamps::{TurnStamps, TurnTicket};

/// Default bound on model submissions per inbound message.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// How a loop run ended. Failures are returned as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// The model answered without requesting tools.
    Done(String),
    /// The escalation tool ran; no reply is sent.
    Escalated,
    /// A newer inbound message took over this session.
    Superseded,
}

enum TurnState {
    AwaitingModel,
    ExecutingTools {
        text: Option<String>,
        requests: Vec<ToolUseRequest>,
    },
    Finished(LoopOutcome),
}

/// Everything one run needs besides the history it mutates.
pub struct LoopInput<'a> {
    pub ticket: &'a TurnTicket,
    pub ctx: &'a ToolContext,
    pub tools: &'a [ToolDefinition],
    pub system_prompt: &'a str,
}

/// The agent loop submits turns to a provider and dispatches the tools it asks for
pub struct AgentLoop {
    provider: Arc<dyn ProviderAdapter>,
    dispatcher: Arc<ToolDispatcher>,
    stamps: Arc<TurnStamps>,
    max_iterations: usize,
}

impl AgentLoop {
    /// Create a new agent loop
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        dispatcher: Arc<ToolDispatcher>,
        stamps: Arc<TurnStamps>,
        max_iterations: usize,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            stamps,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run until the model answers, a tool escalates, the turn is superseded
    /// or the iteration cap is hit. New messages are appended to `history`.
    ///
    /// Any exit other than a final answer releases the provider session so
    /// the next inbound message starts clean.
    pub async fn run(
        &self,
        input: LoopInput<'_>,
        session: &mut ProviderSession,
        history: &mut Vec<Message>,
    ) -> Result<LoopOutcome> {
        let result = self.drive(&input, session, history).await;
        if !matches!(result, Ok(LoopOutcome::Done(_))) {
            if let Err(e) = self.provider.abandon(session).await {
                warn!("Failed to release {} session: {}", self.provider.name(), e);
            }
        }
        result
    }

    async fn drive(
        &self,
        input: &LoopInput<'_>,
        session: &mut ProviderSession,
        history: &mut Vec<Message>,
    ) -> Result<LoopOutcome> {
        info!(
            "Starting agent loop for {} with {} tools via {}",
            input.ticket.key(),
            input.tools.len(),
            self.provider.name()
        );

        let mut iterations = 0;
        let mut state = TurnState::AwaitingModel;

        loop {
            state = match state {
                TurnState::AwaitingModel => {
                    if iterations >= self.max_iterations {
                        return Err(Error::MaxIterations);
                    }
                    iterations += 1;
                    debug!("Iteration {}/{}", iterations, self.max_iterations);
                    self.submit(input, session, history).await?
                }
                TurnState::ExecutingTools { text, requests } => {
                    self.execute_tools(input, history, text, requests).await
                }
                TurnState::Finished(outcome) => return Ok(outcome),
            };
        }
    }

    async fn submit(
        &self,
        input: &LoopInput<'_>,
        session: &mut ProviderSession,
        history: &mut Vec<Message>,
    ) -> Result<TurnState> {
        if !self.stamps.is_current(input.ticket) {
            return Ok(self.superseded(input));
        }
        debug_assert!(tool_results_paired(history));

        let turn = TurnRequest {
            history: history.as_slice(),
            tools: input.tools,
            system_prompt: input.system_prompt,
        };
        let outcome = self.provider.submit_turn(session, turn).await?;

        if !self.stamps.is_current(input.ticket) {
            return Ok(self.superseded(input));
        }

        Ok(match outcome {
            TurnOutcome::ToolRequests { text, requests } if !requests.is_empty() => {
                TurnState::ExecutingTools { text, requests }
            }
            TurnOutcome::ToolRequests { text, .. } => {
                self.complete(history, text.unwrap_or_default())
            }
            TurnOutcome::Completed(text) => self.complete(history, text),
        })
    }

    async fn execute_tools(
        &self,
        input: &LoopInput<'_>,
        history: &mut Vec<Message>,
        text: Option<String>,
        requests: Vec<ToolUseRequest>,
    ) -> TurnState {
        info!("Model requested {} tool(s)", requests.len());
        history.push(Message::assistant_with_tools(text, &requests));

        let outcomes = self.dispatcher.dispatch_all(input.ctx, &requests).await;
        let escalated = outcomes.iter().any(|o| o.escalated);
        history.push(Message::tool_results(outcomes.into_iter().map(|o| o.result).collect()));

        if escalated {
            info!("Conversation {} escalated to a human", input.ctx.conversation_id);
            TurnState::Finished(LoopOutcome::Escalated)
        } else if !self.stamps.is_current(input.ticket) {
            self.superseded(input)
        } else {
            TurnState::AwaitingModel
        }
    }

    fn complete(&self, history: &mut Vec<Message>, text: String) -> TurnState {
        info!("Agent completed with response: {} chars", text.len());
        history.push(Message::assistant(text.clone()));
        TurnState::Finished(LoopOutcome::Done(text))
    }

    fn superseded(&self, input: &LoopInput<'_>) -> TurnState {
        info!("Dropping superseded turn for {}", input.ticket.key());
        TurnState::Finished(LoopOutcome::Superseded)
    }
}
