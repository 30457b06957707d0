use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use remit_core::memory::ChatMessage;

/// Receives streamed completion chunks. Returning an error aborts the stream.
#[async_trait]
pub trait ChunkSink: Send {
    async fn push(&mut self, chunk: &str) -> Result<()>;
}

/// Collects chunks into a single string.
#[derive(Debug, Default)]
pub struct BufferSink {
    pub text: String,
}

#[async_trait]
impl ChunkSink for BufferSink {
    async fn push(&mut self, chunk: &str) -> Result<()> {
        self.text.push_str(chunk);
        Ok(())
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<String>;

    /// Streams the completion into `sink` and returns the full text. Clients without native
    /// streaming deliver the whole completion as one chunk.
    async fn complete_stream(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        sink: &mut dyn ChunkSink,
    ) -> Result<String> {
        let text = self.complete(system_prompt, messages).await?;
        sink.push(&text).await?;
        Ok(text)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
}

/// Replays queued responses in order, recording every call. Used by tests and smoke runs.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
    chunk_size: Option<usize>,
}

impl ScriptedLlm {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scripted = Self::default();
        for response in responses {
            scripted.push_ok(response);
        }
        scripted
    }

    /// Streams replies in chunks of `size` characters instead of one piece.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn push_ok(&self, response: impl Into<String>) {
        lock(&self.responses).push_back(Ok(response.into()));
    }

    pub fn push_err(&self, message: impl Into<String>) {
        lock(&self.responses).push_back(Err(message.into()));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }

    fn next(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<String> {
        lock(&self.calls).push(RecordedCall {
            system_prompt: system_prompt.to_owned(),
            messages: messages.to_vec(),
        });
        match lock(&self.responses).pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted llm has no response left")),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<String> {
        self.next(system_prompt, messages)
    }

    async fn complete_stream(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        sink: &mut dyn ChunkSink,
    ) -> Result<String> {
        let text = self.next(system_prompt, messages)?;
        match self.chunk_size {
            Some(size) => {
                let chars: Vec<char> = text.chars().collect();
                for piece in chars.chunks(size) {
                    sink.push(&piece.iter().collect::<String>()).await?;
                }
            }
            None => sink.push(&text).await?,
        }
        Ok(text)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Strips a surrounding markdown code fence from a completion, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
