//! Named agent registry with per-agent retry, timeout and output validation policy.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remit_core::config::AgentsConfig;
use remit_core::errors::ApplicationError;
use remit_core::flows::ExecutionRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::context::ExecutionContext;
use crate::events::{EventSink, TurnEvent};
use crate::llm::ChunkSink;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    /// Transient failure; the runner may try again.
    #[error("{0}")]
    Retryable(String),
    #[error("agent `{agent}` failed after {attempts} attempt(s): {last_error}")]
    RetryableExhausted { agent: String, attempts: u32, last_error: String },
    #[error("agent `{agent}` failed: {message}")]
    Fatal { agent: String, message: String },
    #[error("no agent registered as `{0}`")]
    UnknownAgent(String),
}

impl AgentError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn fatal(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal { agent: agent.into(), message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl From<AgentError> for ApplicationError {
    fn from(value: AgentError) -> Self {
        match value {
            AgentError::Retryable(message) => {
                ApplicationError::AgentExhausted { agent: "unknown".to_owned(), message }
            }
            AgentError::RetryableExhausted { agent, last_error, .. } => {
                ApplicationError::AgentExhausted { agent, message: last_error }
            }
            AgentError::Fatal { agent, message } => ApplicationError::AgentFatal { agent, message },
            AgentError::UnknownAgent(agent) => ApplicationError::AgentFatal {
                agent,
                message: "agent is not registered".to_owned(),
            },
        }
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Whether `invoke_stream` produces incremental output.
    fn supports_stream(&self) -> bool {
        false
    }

    async fn invoke(&self, ctx: &ExecutionContext) -> Result<Value, AgentError>;

    async fn invoke_stream(
        &self,
        ctx: &ExecutionContext,
        sink: &mut dyn ChunkSink,
    ) -> Result<Value, AgentError> {
        let _ = sink;
        self.invoke(ctx).await
    }
}

/// Parses an agent result into a typed model and back, normalizing it.
#[derive(Clone, Copy)]
pub struct OutputSchema {
    name: &'static str,
    check: fn(&Value) -> Result<Value, String>,
}

impl OutputSchema {
    pub fn of<T>(name: &'static str) -> Self
    where
        T: DeserializeOwned + Serialize,
    {
        Self { name, check: conform::<T> }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn conform(&self, value: &Value) -> Result<Value, String> {
        (self.check)(value)
    }
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OutputSchema").field(&self.name).finish()
    }
}

fn conform<T>(value: &Value) -> Result<Value, String>
where
    T: DeserializeOwned + Serialize,
{
    let parsed: T = serde_json::from_value(value.clone()).map_err(|error| error.to_string())?;
    serde_json::to_value(parsed).map_err(|error| error.to_string())
}

pub type Validator = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct AgentPolicy {
    pub max_retry: u32,
    pub backoff: Duration,
    pub timeout: Option<Duration>,
    pub schema: Option<OutputSchema>,
    pub validator: Option<Validator>,
}

impl AgentPolicy {
    pub fn from_config(config: &AgentsConfig) -> Self {
        Self {
            max_retry: config.max_retry.max(1),
            backoff: config.backoff(),
            timeout: config.timeout(),
            schema: None,
            validator: None,
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_schema(mut self, schema: OutputSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    fn check(&self, started: Instant, output: Value) -> Result<Value, AgentError> {
        if let Some(timeout) = self.timeout {
            if started.elapsed() > timeout {
                return Err(AgentError::retryable("timeout_exceeded"));
            }
        }
        if let Some(validator) = &self.validator {
            if !validator(&output) {
                return Err(AgentError::retryable("validation_failed"));
            }
        }
        match &self.schema {
            Some(schema) => schema.conform(&output).map_err(|error| {
                AgentError::retryable(format!("schema `{}` rejected output: {error}", schema.name))
            }),
            None => Ok(output),
        }
    }
}

impl Default for AgentPolicy {
    fn default() -> Self {
        Self::from_config(&AgentsConfig {
            max_retry: 1,
            backoff_seconds: 1.0,
            timeout_seconds: None,
        })
    }
}

impl fmt::Debug for AgentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentPolicy")
            .field("max_retry", &self.max_retry)
            .field("backoff", &self.backoff)
            .field("timeout", &self.timeout)
            .field("schema", &self.schema)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Passed to the retry callback before each backoff sleep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryNotice {
    pub agent: String,
    pub attempt: u32,
    pub max_retry: u32,
    pub error: String,
}

struct Registration {
    agent: Arc<dyn Agent>,
    policy: AgentPolicy,
}

#[derive(Default)]
pub struct Runner {
    agents: HashMap<String, Registration>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<A>(&mut self, name: impl Into<String>, agent: A, policy: AgentPolicy)
    where
        A: Agent + 'static,
    {
        self.register_shared(name, Arc::new(agent), policy);
    }

    pub fn register_shared(
        &mut self,
        name: impl Into<String>,
        agent: Arc<dyn Agent>,
        policy: AgentPolicy,
    ) {
        self.agents.insert(name.into(), Registration { agent, policy });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn policy(&self, name: &str) -> Option<&AgentPolicy> {
        self.agents.get(name).map(|registration| &registration.policy)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub async fn run(&self, name: &str, ctx: &mut ExecutionContext) -> Result<Value, AgentError> {
        self.run_with_retry_hook(name, ctx, None).await
    }

    pub async fn run_with_retry_hook(
        &self,
        name: &str,
        ctx: &mut ExecutionContext,
        mut on_retry: Option<&mut (dyn FnMut(&RetryNotice) + Send)>,
    ) -> Result<Value, AgentError> {
        let registration = self.lookup(name)?;
        let policy = &registration.policy;
        let max_retry = policy.max_retry.max(1);

        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let outcome = match registration.agent.invoke(ctx).await {
                Ok(output) => policy.check(started, output),
                Err(error) => Err(error),
            };

            let error = match outcome {
                Ok(output) => return Ok(output),
                Err(AgentError::Retryable(message)) => message,
                Err(other) => return Err(record_fatal(ctx, name, attempt, other)),
            };

            if attempt >= max_retry {
                ctx.metadata.execution = Some(ExecutionRecord {
                    agent: name.to_owned(),
                    error: error.clone(),
                    attempt,
                    trace: None,
                });
                warn!(
                    event_name = "agent.exhausted",
                    correlation_id = %ctx.session_id,
                    agent = name,
                    attempts = attempt,
                    error = %error,
                    "agent retries exhausted"
                );
                return Err(AgentError::RetryableExhausted {
                    agent: name.to_owned(),
                    attempts: attempt,
                    last_error: error,
                });
            }

            warn!(
                event_name = "agent.retry",
                correlation_id = %ctx.session_id,
                agent = name,
                attempt,
                max_retry,
                error = %error,
                "retrying agent"
            );
            if let Some(callback) = on_retry.as_deref_mut() {
                callback(&RetryNotice {
                    agent: name.to_owned(),
                    attempt,
                    max_retry,
                    error: error.clone(),
                });
            }
            tokio::time::sleep(policy.backoff * attempt).await;
            attempt += 1;
        }
    }

    /// Runs `name`, forwarding streamed chunks as `LlmToken` events and the final result as
    /// `LlmDone`. Streaming agents get a single attempt.
    pub async fn run_stream(
        &self,
        name: &str,
        ctx: &mut ExecutionContext,
        events: &EventSink,
    ) -> Result<Value, AgentError> {
        let registration = self.lookup(name)?;
        if !registration.agent.supports_stream() {
            let result = self.run(name, ctx).await?;
            events.emit(TurnEvent::LlmDone { result: result.clone() }).await;
            return Ok(result);
        }

        let mut sink = TimedTokenSink::new(events, registration.policy.timeout);
        let outcome = registration.agent.invoke_stream(ctx, &mut sink).await;
        let outcome = match outcome {
            _ if sink.timed_out => Err(AgentError::retryable("stream_timeout_exceeded")),
            Ok(output) => match &registration.policy.schema {
                Some(schema) => schema.conform(&output).map_err(AgentError::Retryable),
                None => Ok(output),
            },
            Err(error) => Err(error),
        };

        match outcome {
            Ok(result) => {
                events.emit(TurnEvent::LlmDone { result: result.clone() }).await;
                Ok(result)
            }
            Err(AgentError::Retryable(message)) => {
                ctx.metadata.execution = Some(ExecutionRecord {
                    agent: name.to_owned(),
                    error: message.clone(),
                    attempt: 1,
                    trace: None,
                });
                warn!(
                    event_name = "agent.stream_failed",
                    correlation_id = %ctx.session_id,
                    agent = name,
                    error = %message,
                    "streaming agent failed"
                );
                Err(AgentError::RetryableExhausted {
                    agent: name.to_owned(),
                    attempts: 1,
                    last_error: message,
                })
            }
            Err(other) => Err(record_fatal(ctx, name, 1, other)),
        }
    }

    fn lookup(&self, name: &str) -> Result<&Registration, AgentError> {
        self.agents.get(name).ok_or_else(|| {
            error!(event_name = "agent.unknown", agent = name, "agent is not registered");
            AgentError::UnknownAgent(name.to_owned())
        })
    }
}

fn record_fatal(
    ctx: &mut ExecutionContext,
    name: &str,
    attempt: u32,
    error: AgentError,
) -> AgentError {
    let message = match &error {
        AgentError::Fatal { message, .. } => message.clone(),
        other => other.to_string(),
    };
    ctx.metadata.execution = Some(ExecutionRecord {
        agent: name.to_owned(),
        error: message.clone(),
        attempt,
        trace: Some(format!("{error:?}")),
    });
    error!(
        event_name = "agent.fatal",
        correlation_id = %ctx.session_id,
        agent = name,
        attempt,
        error = %message,
        "agent failed"
    );
    AgentError::Fatal { agent: name.to_owned(), message }
}

/// Forwards chunks as token events, aborting once the stream outlives its timeout.
struct TimedTokenSink<'a> {
    events: &'a EventSink,
    timeout: Option<Duration>,
    first_chunk: Option<Instant>,
    timed_out: bool,
}

impl<'a> TimedTokenSink<'a> {
    fn new(events: &'a EventSink, timeout: Option<Duration>) -> Self {
        Self { events, timeout, first_chunk: None, timed_out: false }
    }
}

#[async_trait]
impl ChunkSink for TimedTokenSink<'_> {
    async fn push(&mut self, chunk: &str) -> anyhow::Result<()> {
        let first = *self.first_chunk.get_or_insert_with(Instant::now);
        if let Some(timeout) = self.timeout {
            if first.elapsed() > timeout {
                self.timed_out = true;
                anyhow::bail!("stream_timeout_exceeded");
            }
        }
        self.events.emit(TurnEvent::LlmToken { text: chunk.to_owned() }).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use remit_core::flows::SessionState;
    use remit_core::memory::Memory;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    use crate::context::ExecutionContext;
    use crate::events::{EventSink, TurnEvent};
    use crate::llm::ChunkSink;
    use crate::runner::{Agent, AgentError, AgentPolicy, OutputSchema, RetryNotice, Runner};

    struct CountingAgent {
        calls: Arc<AtomicU32>,
        output: Result<Value, AgentError>,
        delay: Option<Duration>,
    }

    impl CountingAgent {
        fn new(output: Result<Value, AgentError>) -> (Self, Arc<AtomicU32>) {
            let calls = Arc::new(AtomicU32::new(0));
            (Self { calls: calls.clone(), output, delay: None }, calls)
        }
    }

    #[async_trait]
    impl Agent for CountingAgent {
        async fn invoke(&self, _ctx: &ExecutionContext) -> Result<Value, AgentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.output.clone()
        }
    }

    struct StreamingAgent {
        chunks: Vec<&'static str>,
        gap: Duration,
    }

    #[async_trait]
    impl Agent for StreamingAgent {
        fn supports_stream(&self) -> bool {
            true
        }

        async fn invoke(&self, _ctx: &ExecutionContext) -> Result<Value, AgentError> {
            Ok(json!({"message": self.chunks.concat()}))
        }

        async fn invoke_stream(
            &self,
            _ctx: &ExecutionContext,
            sink: &mut dyn ChunkSink,
        ) -> Result<Value, AgentError> {
            for chunk in &self.chunks {
                sink.push(chunk)
                    .await
                    .map_err(|error| AgentError::retryable(error.to_string()))?;
                tokio::time::sleep(self.gap).await;
            }
            Ok(json!({"message": self.chunks.concat()}))
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Scenario {
        scenario: String,
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("s1", "hello", SessionState::default(), Memory::default())
    }

    fn fast_policy(max_retry: u32) -> AgentPolicy {
        AgentPolicy::default().with_max_retry(max_retry).with_backoff(Duration::ZERO)
    }

    #[tokio::test]
    async fn unknown_agent_is_not_retried() {
        let runner = Runner::new();
        let error = runner.run("missing", &mut ctx()).await.expect_err("unknown agent");
        assert_eq!(error, AgentError::UnknownAgent("missing".to_owned()));
    }

    #[tokio::test]
    async fn rejecting_validator_exhausts_exactly_max_retry_attempts() {
        let (agent, calls) = CountingAgent::new(Ok(json!({"scenario": "TRANSFER"})));
        let mut runner = Runner::new();
        runner.register("intent", agent, fast_policy(3).with_validator(|_| false));
        let mut ctx = ctx();
        let mut notices = Vec::new();
        let mut on_retry = |notice: &RetryNotice| notices.push(notice.attempt);

        let error = runner
            .run_with_retry_hook("intent", &mut ctx, Some(&mut on_retry))
            .await
            .expect_err("validator always rejects");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            error,
            AgentError::RetryableExhausted {
                agent: "intent".to_owned(),
                attempts: 3,
                last_error: "validation_failed".to_owned(),
            }
        );
        assert_eq!(notices, vec![1, 2]);
        let record = ctx.metadata.execution.expect("exhaustion is recorded");
        assert_eq!(record.agent, "intent");
        assert_eq!(record.attempt, 3);
        assert_eq!(record.error, "validation_failed");
    }

    #[tokio::test]
    async fn schema_mismatch_is_retryable_and_valid_output_passes() {
        let (bad, bad_calls) = CountingAgent::new(Ok(json!({"label": "x"})));
        let (good, _) = CountingAgent::new(Ok(json!({"scenario": "GENERAL", "extra": 1})));
        let mut runner = Runner::new();
        let schema = OutputSchema::of::<Scenario>("intent_result");
        runner.register("bad", bad, fast_policy(2).with_schema(schema));
        runner.register("good", good, fast_policy(2).with_schema(schema));

        let error = runner.run("bad", &mut ctx()).await.expect_err("schema rejects");
        assert!(matches!(error, AgentError::RetryableExhausted { attempts: 2, .. }));
        assert_eq!(bad_calls.load(Ordering::SeqCst), 2);

        let output = runner.run("good", &mut ctx()).await.expect("schema accepts");
        assert_eq!(output, json!({"scenario": "GENERAL"}));
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried_and_records_trace() {
        let (agent, calls) = CountingAgent::new(Err(AgentError::fatal("x", "backend exploded")));
        let mut runner = Runner::new();
        runner.register("execute", agent, fast_policy(3));
        let mut ctx = ctx();

        let error = runner.run("execute", &mut ctx).await.expect_err("fatal");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(error, AgentError::fatal("execute", "backend exploded"));
        let record = ctx.metadata.execution.expect("fatal is recorded");
        assert_eq!(record.attempt, 1);
        assert!(record.trace.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_counts_as_timeout() {
        let (mut agent, calls) = CountingAgent::new(Ok(json!({})));
        agent.delay = Some(Duration::from_millis(50));
        let mut runner = Runner::new();
        runner.register(
            "slot",
            agent,
            fast_policy(2).with_timeout(Duration::from_millis(10)),
        );

        let error = runner.run("slot", &mut ctx()).await.expect_err("too slow");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            error,
            AgentError::RetryableExhausted { ref last_error, .. } if last_error == "timeout_exceeded"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_with_attempt_number() {
        let (agent, _) = CountingAgent::new(Err(AgentError::retryable("flaky")));
        let mut runner = Runner::new();
        runner.register(
            "slot",
            agent,
            AgentPolicy::default().with_max_retry(3).with_backoff(Duration::from_secs(1)),
        );
        let started = tokio::time::Instant::now();

        let _ = runner.run("slot", &mut ctx()).await;

        // 1s after the first attempt, 2s after the second.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "slept {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "slept {elapsed:?}");
    }

    #[tokio::test]
    async fn non_streaming_agent_emits_single_llm_done() {
        let (agent, _) = CountingAgent::new(Ok(json!({"message": "hi"})));
        let mut runner = Runner::new();
        runner.register("interaction", agent, fast_policy(1));
        let (events, mut rx) = EventSink::channel(8);

        let result = runner.run_stream("interaction", &mut ctx(), &events).await.expect("ok");
        drop(events);

        assert_eq!(result, json!({"message": "hi"}));
        assert_eq!(rx.recv().await, Some(TurnEvent::LlmDone { result: json!({"message": "hi"}) }));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn streaming_agent_forwards_tokens_then_result() {
        let mut runner = Runner::new();
        runner.register(
            "interaction",
            StreamingAgent { chunks: vec!["Hel", "lo"], gap: Duration::ZERO },
            fast_policy(3),
        );
        let (events, mut rx) = EventSink::channel(8);

        runner.run_stream("interaction", &mut ctx(), &events).await.expect("stream");
        drop(events);

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }
        assert_eq!(
            received,
            vec![
                TurnEvent::LlmToken { text: "Hel".to_owned() },
                TurnEvent::LlmToken { text: "lo".to_owned() },
                TurnEvent::LlmDone { result: json!({"message": "Hello"}) },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stream_aborts_with_timeout() {
        let mut runner = Runner::new();
        runner.register(
            "interaction",
            StreamingAgent { chunks: vec!["a", "b", "c"], gap: Duration::from_millis(30) },
            fast_policy(3).with_timeout(Duration::from_millis(40)),
        );
        let (events, _rx) = EventSink::channel(8);
        let mut ctx = ctx();

        let error =
            runner.run_stream("interaction", &mut ctx, &events).await.expect_err("timeout");

        assert!(matches!(
            error,
            AgentError::RetryableExhausted { attempts: 1, ref last_error, .. }
                if last_error == "stream_timeout_exceeded"
        ));
        assert!(ctx.metadata.execution.is_some());
    }
}
