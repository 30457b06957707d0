use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use remit_core::flows::Delta;
use serde_json::Value;
use tracing::debug;

use crate::agents::prompts::SLOT_SYSTEM_PROMPT;
use crate::agents::state_context;
use crate::context::ExecutionContext;
use crate::llm::{strip_code_fence, LlmClient};
use crate::runner::{Agent, AgentError};

/// Turns the conversation into a slot delta.
pub struct SlotFillerAgent {
    llm: Arc<dyn LlmClient>,
    context_turns: usize,
    today: Option<NaiveDate>,
}

impl SlotFillerAgent {
    pub fn new(llm: Arc<dyn LlmClient>, context_turns: usize) -> Self {
        Self { llm, context_turns, today: None }
    }

    /// Pins the date used to resolve relative dates.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn context_block(&self, ctx: &ExecutionContext) -> String {
        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        format!("## Today\n{}\n\n{}", today.format("%Y-%m-%d"), state_context(&ctx.state))
    }
}

#[async_trait]
impl Agent for SlotFillerAgent {
    async fn invoke(&self, ctx: &ExecutionContext) -> Result<Value, AgentError> {
        let messages = ctx.build_messages(&self.context_block(ctx), self.context_turns);
        let text = self
            .llm
            .complete(SLOT_SYSTEM_PROMPT, &messages)
            .await
            .map_err(|error| AgentError::retryable(format!("slot llm call failed: {error}")))?;

        let delta = parse_delta(&text);
        serde_json::to_value(delta).map_err(|error| AgentError::fatal("slot", error.to_string()))
    }
}

/// Parses extraction output. Anything that is not a delta becomes an empty delta flagged
/// with `parse_error`.
pub fn parse_delta(text: &str) -> Delta {
    match serde_json::from_str::<Delta>(strip_code_fence(text)) {
        Ok(delta) => delta,
        Err(error) => {
            debug!(event_name = "slot.parse_failed", error = %error, "extraction output unparsed");
            Delta::unparsed()
        }
    }
}
