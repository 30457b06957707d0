use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Rolling conversation history for one session. Survives state resets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Memory {
    pub raw_history: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_text: Option<String>,
}

impl Memory {
    /// Completed user/assistant exchanges currently held in raw history.
    pub fn turn_count(&self) -> usize {
        self.raw_history.len() / 2
    }

    /// The last `turns` exchanges, oldest first.
    pub fn recent(&self, turns: usize) -> &[ChatMessage] {
        let keep = turns.saturating_mul(2).min(self.raw_history.len());
        &self.raw_history[self.raw_history.len() - keep..]
    }
}
