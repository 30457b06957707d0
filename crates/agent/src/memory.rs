//! Rolling conversation memory with LLM summarization.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use remit_core::config::MemoryConfig;
use remit_core::memory::{ChatMessage, Memory, Role};
use tracing::{info, warn};

use crate::agents::prompts::SUMMARY_SYSTEM_PROMPT;
use crate::llm::LlmClient;

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, previous: Option<&str>, dialog: &[ChatMessage]) -> Result<String>;
}

pub struct LlmSummarizer {
    llm: Arc<dyn LlmClient>,
}

impl LlmSummarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

/// Prompt body for a summarization call.
pub fn summary_prompt(previous: Option<&str>, dialog: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    if let Some(previous) = previous.filter(|text| !text.trim().is_empty()) {
        let _ = write!(prompt, "Previous summary:\n{}\n\n", previous.trim());
    }
    prompt.push_str("Conversation:\n");
    for message in dialog {
        let speaker = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => continue,
        };
        let _ = writeln!(prompt, "{speaker}: {}", message.content);
    }
    prompt.push_str("\nSummary:");
    prompt
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, previous: Option<&str>, dialog: &[ChatMessage]) -> Result<String> {
        let prompt = summary_prompt(previous, dialog);
        let text = self.llm.complete(SUMMARY_SYSTEM_PROMPT, &[ChatMessage::user(prompt)]).await?;
        let text = text.trim();
        anyhow::ensure!(!text.is_empty(), "summarizer returned an empty summary");
        Ok(text.to_owned())
    }
}

/// Appends exchanges to memory and keeps it bounded.
pub struct MemoryCompactor {
    config: MemoryConfig,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl MemoryCompactor {
    pub fn new(config: MemoryConfig, summarizer: Option<Arc<dyn Summarizer>>) -> Self {
        Self { config, summarizer }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub async fn update(&self, memory: &mut Memory, user: &str, assistant: &str) {
        if !self.config.enabled {
            return;
        }
        memory.raw_history.push(ChatMessage::user(user));
        memory.raw_history.push(ChatMessage::assistant(assistant));

        let summarizer = self.summarizer.as_ref().filter(|_| self.config.enable_summary);
        match summarizer {
            Some(summarizer) if memory.turn_count() >= self.config.summarize_threshold => {
                self.summarize(summarizer.as_ref(), memory).await;
            }
            // History must be able to grow to the threshold or summaries never start.
            Some(_) => {
                let turns = self.config.max_raw_turns.max(self.config.summarize_threshold);
                self.truncate_to(memory, turns);
            }
            None => self.truncate(memory),
        }
    }

    async fn summarize(&self, summarizer: &dyn Summarizer, memory: &mut Memory) {
        let keep = self.config.keep_recent_turns * 2;
        let split = memory.raw_history.len().saturating_sub(keep);
        if split == 0 {
            return;
        }

        let to_compress = &memory.raw_history[..split];
        match summarizer.summarize(memory.summary_text.as_deref(), to_compress).await {
            Ok(summary) => {
                info!(
                    event_name = "memory.summarized",
                    compressed_messages = split,
                    kept_messages = memory.raw_history.len() - split,
                    "conversation summarized"
                );
                memory.summary_text = Some(summary);
                memory.raw_history.drain(..split);
            }
            Err(error) => {
                warn!(
                    event_name = "memory.summary_failed",
                    error = %error,
                    "summarization failed, truncating history"
                );
                self.truncate(memory);
            }
        }
    }

    fn truncate(&self, memory: &mut Memory) {
        self.truncate_to(memory, self.config.max_raw_turns);
    }

    fn truncate_to(&self, memory: &mut Memory, turns: usize) {
        let limit = turns * 2;
        let excess = memory.raw_history.len().saturating_sub(limit);
        if excess > 0 {
            memory.raw_history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remit_core::config::MemoryConfig;
    use remit_core::memory::{ChatMessage, Memory};

    use crate::llm::ScriptedLlm;
    use crate::memory::{summary_prompt, LlmSummarizer, MemoryCompactor};

    fn config() -> MemoryConfig {
        MemoryConfig {
            enabled: true,
            enable_summary: true,
            summarize_threshold: 3,
            keep_recent_turns: 1,
            max_raw_turns: 2,
            summary_model: None,
        }
    }

    fn compactor(llm: Arc<ScriptedLlm>, config: MemoryConfig) -> MemoryCompactor {
        MemoryCompactor::new(config, Some(Arc::new(LlmSummarizer::new(llm))))
    }

    #[tokio::test]
    async fn summarizes_once_threshold_is_reached() {
        let llm = Arc::new(ScriptedLlm::new(["User is sending money to Alice."]));
        let compactor = compactor(llm.clone(), config());
        let mut memory = Memory::default();

        compactor.update(&mut memory, "hi", "hello").await;
        compactor.update(&mut memory, "send to Alice", "how much?").await;
        assert_eq!(llm.call_count(), 0);
        compactor.update(&mut memory, "50000", "Send 50,000 to Alice?").await;

        assert_eq!(llm.call_count(), 1);
        assert_eq!(memory.summary_text.as_deref(), Some("User is sending money to Alice."));
        assert_eq!(
            memory.raw_history,
            vec![ChatMessage::user("50000"), ChatMessage::assistant("Send 50,000 to Alice?")]
        );
        let prompt = &llm.calls()[0].messages[0].content;
        assert!(prompt.contains("User: send to Alice"));
        assert!(!prompt.contains("50000"));
    }

    #[tokio::test]
    async fn failed_summary_keeps_old_summary_and_truncates() {
        let llm = Arc::new(ScriptedLlm::default());
        llm.push_err("provider down");
        let compactor = compactor(llm, config());
        let mut memory = Memory { raw_history: Vec::new(), summary_text: Some("old".into()) };

        for turn in 0..3 {
            compactor.update(&mut memory, &format!("u{turn}"), &format!("a{turn}")).await;
        }

        assert_eq!(memory.summary_text.as_deref(), Some("old"));
        assert_eq!(memory.raw_history.len(), 4);
        assert_eq!(memory.raw_history[0], ChatMessage::user("u1"));
    }

    #[tokio::test]
    async fn threshold_above_raw_limit_still_summarizes() {
        let llm = Arc::new(ScriptedLlm::default());
        for round in 0..10 {
            llm.push_ok(format!("summary {round}"));
        }
        let wide = MemoryConfig {
            summarize_threshold: 5,
            keep_recent_turns: 1,
            max_raw_turns: 3,
            ..config()
        };
        let compactor = compactor(llm.clone(), wide);
        let mut memory = Memory::default();

        for turn in 0..20 {
            compactor.update(&mut memory, &format!("u{turn}"), &format!("a{turn}")).await;
            assert!(memory.turn_count() <= 5);
        }

        assert!(llm.call_count() > 0);
        assert!(memory.summary_text.is_some());
    }

    #[tokio::test]
    async fn history_stays_bounded_without_summaries() {
        let mut disabled = config();
        disabled.enable_summary = false;
        let compactor = MemoryCompactor::new(disabled, None);
        let mut memory = Memory::default();

        for turn in 0..10 {
            compactor.update(&mut memory, &format!("u{turn}"), &format!("a{turn}")).await;
            assert!(memory.raw_history.len() <= 4);
        }
        assert_eq!(memory.raw_history[0], ChatMessage::user("u8"));
        assert!(memory.summary_text.is_none());
    }

    #[tokio::test]
    async fn disabled_memory_is_left_alone() {
        let mut off = config();
        off.enabled = false;
        let compactor = MemoryCompactor::new(off, None);
        let mut memory = Memory::default();

        compactor.update(&mut memory, "hi", "hello").await;

        assert!(memory.raw_history.is_empty());
    }

    #[test]
    fn summary_prompt_includes_previous_summary() {
        let prompt = summary_prompt(
            Some("Earlier: greeted."),
            &[ChatMessage::user("send 10"), ChatMessage::assistant("to whom?")],
        );
        assert_eq!(
            prompt,
            "Previous summary:\nEarlier: greeted.\n\nConversation:\nUser: send 10\nAssistant: to whom?\n\nSummary:"
        );
    }
}
