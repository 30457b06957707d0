use remit_core::flows::{ExecutionRecord, SessionState};
use remit_core::memory::{ChatMessage, Memory};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Scratch data for the current turn. Discarded once the turn ends.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnMetadata {
    /// Last agent failure recorded by the runner.
    pub execution: Option<ExecutionRecord>,
    /// Scenario the session was in when a mid-flow turn classified as something else.
    pub prior_scenario: Option<String>,
    pub extra: Map<String, Value>,
}

/// Per-turn value bag handed to every agent and flow handler.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub session_id: String,
    pub correlation_id: String,
    pub user_message: String,
    pub state: SessionState,
    pub memory: Memory,
    pub metadata: TurnMetadata,
}

impl ExecutionContext {
    pub fn new(
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        state: SessionState,
        memory: Memory,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            correlation_id: Uuid::new_v4().to_string(),
            user_message: user_message.into(),
            state,
            memory,
            metadata: TurnMetadata::default(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Assembles `[system(context + summary)] + last turns + current user message`.
    ///
    /// The system message is omitted when both the context block and the summary are empty.
    pub fn build_messages(&self, context_block: &str, last_n_turns: usize) -> Vec<ChatMessage> {
        let mut sections = Vec::new();
        if !context_block.trim().is_empty() {
            sections.push(context_block.trim().to_owned());
        }
        if let Some(summary) =
            self.memory.summary_text.as_deref().filter(|summary| !summary.trim().is_empty())
        {
            sections.push(format!("## Previous summary\n{}", summary.trim()));
        }

        let mut messages = Vec::new();
        if !sections.is_empty() {
            messages.push(ChatMessage::system(sections.join("\n\n")));
        }
        messages.extend_from_slice(self.memory.recent(last_n_turns));
        messages.push(ChatMessage::user(self.user_message.clone()));
        messages
    }
}
