use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::prompts::{GENERAL_SYSTEM_PROMPT, INTERACTION_SYSTEM_PROMPT};
use crate::agents::schemas::InteractionResult;
use crate::agents::state_context;
use crate::context::ExecutionContext;
use crate::events::NextAction;
use crate::llm::{strip_code_fence, ChunkSink, LlmClient};
use crate::runner::{Agent, AgentError};

/// Conversational reply generator. Streams tokens when the client supports it.
pub struct InteractionAgent {
    llm: Arc<dyn LlmClient>,
    system_prompt: &'static str,
    context_turns: usize,
    include_state: bool,
}

impl InteractionAgent {
    /// Reply generator for an in-progress transfer.
    pub fn new(llm: Arc<dyn LlmClient>, context_turns: usize) -> Self {
        Self { llm, system_prompt: INTERACTION_SYSTEM_PROMPT, context_turns, include_state: true }
    }

    /// Reply generator for small talk outside any task.
    pub fn general(llm: Arc<dyn LlmClient>, context_turns: usize) -> Self {
        Self { llm, system_prompt: GENERAL_SYSTEM_PROMPT, context_turns, include_state: false }
    }

    fn context_block(&self, ctx: &ExecutionContext) -> String {
        let mut sections = Vec::new();
        if self.include_state {
            sections.push(state_context(&ctx.state));
        }
        if let Some(prior) = &ctx.metadata.prior_scenario {
            sections.push(format!(
                "## Note\nThe user was in the middle of a {prior} task and changed topic. \
                 Offer to continue it."
            ));
        }
        sections.join("\n\n")
    }

    fn finish(text: &str) -> Result<Value, AgentError> {
        serde_json::to_value(parse_interaction(text))
            .map_err(|error| AgentError::fatal("interaction", error.to_string()))
    }
}

#[async_trait]
impl Agent for InteractionAgent {
    fn supports_stream(&self) -> bool {
        true
    }

    async fn invoke(&self, ctx: &ExecutionContext) -> Result<Value, AgentError> {
        let messages = ctx.build_messages(&self.context_block(ctx), self.context_turns);
        let text = self.llm.complete(self.system_prompt, &messages).await.map_err(|error| {
            AgentError::retryable(format!("interaction llm call failed: {error}"))
        })?;
        Self::finish(&text)
    }

    async fn invoke_stream(
        &self,
        ctx: &ExecutionContext,
        sink: &mut dyn ChunkSink,
    ) -> Result<Value, AgentError> {
        let messages = ctx.build_messages(&self.context_block(ctx), self.context_turns);
        let text =
            self.llm.complete_stream(self.system_prompt, &messages, sink).await.map_err(
                |error| AgentError::retryable(format!("interaction stream failed: {error}")),
            )?;
        Self::finish(&text)
    }
}

/// Reads `{action|next_action, message}`. Plain prose is taken as a question to the user;
/// anything else falls back to a canned apology.
pub fn parse_interaction(text: &str) -> InteractionResult {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return InteractionResult::fallback();
    }
    if !body.starts_with('{') {
        return InteractionResult { action: NextAction::Ask, message: body.to_owned() };
    }
    match serde_json::from_str::<InteractionResult>(body) {
        Ok(parsed) if !parsed.message.trim().is_empty() => parsed,
        _ => InteractionResult::fallback(),
    }
}
