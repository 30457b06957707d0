//! Single-turn pipeline: load the session, classify, route, run the flow, persist.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use remit_core::flows::DEFAULT_SCENARIO;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agents::schemas::IntentResult;
use crate::agents::INTENT_AGENT;
use crate::context::ExecutionContext;
use crate::error::TurnError;
use crate::events::{DonePayload, EventSink, HookCall, NextAction, TurnEvent, DEFAULT_EVENT_BUFFER};
use crate::flows::{
    DefaultFlowHandler, FlowHandler, FlowRouter, FlowServices, ScenarioRouter,
    TransferFlowHandler, DEFAULT_FLOW, TRANSFER_FLOW,
};
use crate::runner::RetryNotice;

pub type ErrorHook = Arc<dyn Fn(&TurnError) -> DonePayload + Send + Sync>;
pub type AfterTurnHook =
    Arc<dyn Fn(&ExecutionContext, Option<&DonePayload>) -> anyhow::Result<()> + Send + Sync>;
pub type HookHandler = Arc<dyn Fn(&ExecutionContext, &Value) -> anyhow::Result<()> + Send + Sync>;

const INTENT_LABEL: &str = "Understanding your request";

/// Result of the non-streaming entry point.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReply {
    pub payload: DonePayload,
    pub hooks: Vec<HookCall>,
}

pub struct TurnOrchestrator {
    services: Arc<FlowServices>,
    router: Box<dyn FlowRouter>,
    handlers: HashMap<String, Arc<dyn FlowHandler>>,
    default_flow: String,
    on_error: Option<ErrorHook>,
    after_turn: Option<AfterTurnHook>,
    hook_handlers: HashMap<String, HookHandler>,
    event_buffer: usize,
}

impl TurnOrchestrator {
    /// Orchestrator with the scenario router and the default and transfer flows.
    pub fn new(services: Arc<FlowServices>) -> Self {
        let mut handlers: HashMap<String, Arc<dyn FlowHandler>> = HashMap::new();
        handlers.insert(DEFAULT_FLOW.to_owned(), Arc::new(DefaultFlowHandler::new(services.clone())));
        handlers
            .insert(TRANSFER_FLOW.to_owned(), Arc::new(TransferFlowHandler::new(services.clone())));
        Self {
            services,
            router: Box::new(ScenarioRouter::default()),
            handlers,
            default_flow: DEFAULT_FLOW.to_owned(),
            on_error: None,
            after_turn: None,
            hook_handlers: HashMap::new(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_router<R>(mut self, router: R) -> Self
    where
        R: FlowRouter + 'static,
    {
        self.router = Box::new(router);
        self
    }

    pub fn with_handler<H>(mut self, flow: impl Into<String>, handler: H) -> Self
    where
        H: FlowHandler + 'static,
    {
        self.handlers.insert(flow.into(), Arc::new(handler));
        self
    }

    /// Flow used when the router names a flow without a handler.
    pub fn with_default_flow(mut self, flow: impl Into<String>) -> Self {
        self.default_flow = flow.into();
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&TurnError) -> DonePayload + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Runs after every turn, once state is saved. Errors and panics are logged only.
    pub fn after_turn<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ExecutionContext, Option<&DonePayload>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_turn = Some(Arc::new(hook));
        self
    }

    /// Registers a handler for hooks of type `kind` declared in terminal payloads.
    pub fn with_hook_handler<F>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&ExecutionContext, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hook_handlers.insert(kind.into(), Arc::new(handler));
        self
    }

    pub fn services(&self) -> &Arc<FlowServices> {
        &self.services
    }

    /// Runs one turn without streaming. Failures are turned into a user-facing payload.
    pub async fn handle(&self, session_id: &str, message: &str) -> TurnReply {
        let events = EventSink::disabled();
        let (result, snapshot) = self.execute_turn(session_id, message, &events).await;
        let payload = match result {
            Ok(payload) => payload,
            Err(error) => {
                error!(
                    event_name = "turn.failed",
                    correlation_id = session_id,
                    error = %error,
                    "turn failed"
                );
                self.error_payload(&error, session_id, snapshot)
            }
        };
        TurnReply { hooks: payload.hooks.clone(), payload }
    }

    /// Runs one turn in the background and streams its events. The stream always ends with
    /// exactly one `Done` event; the join handle yields the error behind a failed turn.
    pub fn handle_stream(
        self: &Arc<Self>,
        session_id: impl Into<String>,
        message: impl Into<String>,
    ) -> (mpsc::Receiver<TurnEvent>, JoinHandle<Result<(), TurnError>>) {
        let (events, rx) = EventSink::channel(self.event_buffer);
        let session_id = session_id.into();
        let message = message.into();
        let this = Arc::clone(self);

        let task = tokio::spawn(async move {
            let turn = {
                let this = Arc::clone(&this);
                let events = events.clone();
                let session_id = session_id.clone();
                tokio::spawn(async move { this.execute_turn(&session_id, &message, &events).await })
            };
            let (outcome, snapshot) = match turn.await {
                Ok(turn) => turn,
                Err(join_error) => {
                    let snapshot = this.stored_snapshot(&session_id).await;
                    (Err(TurnError::Aborted(join_error.to_string())), snapshot)
                }
            };
            match outcome {
                Ok(payload) => {
                    events.done(payload).await;
                    Ok(())
                }
                Err(error) => {
                    warn!(
                        event_name = "turn.failed",
                        correlation_id = %session_id,
                        error = %error,
                        "turn failed, sending error reply"
                    );
                    events.done(this.error_payload(&error, &session_id, snapshot)).await;
                    Err(error)
                }
            }
        });
        (rx, task)
    }

    /// Runs the turn and its cleanup, returning the terminal payload. Emits progress events
    /// but not the terminal event itself.
    pub async fn run_turn(
        &self,
        session_id: &str,
        message: &str,
        events: &EventSink,
    ) -> Result<DonePayload, TurnError> {
        self.execute_turn(session_id, message, events).await.0
    }

    /// Like `run_turn`, also returning the snapshot of the state as it was saved.
    async fn execute_turn(
        &self,
        session_id: &str,
        message: &str,
        events: &EventSink,
    ) -> (Result<DonePayload, TurnError>, Value) {
        let (state, memory) = match self.services.sessions.get_or_create(session_id).await {
            Ok(loaded) => loaded,
            Err(error) => return (Err(error.into()), Value::Null),
        };
        let mut ctx = ExecutionContext::new(session_id, message, state, memory);
        debug!(
            event_name = "turn.started",
            correlation_id = session_id,
            stage = ctx.state.stage.as_str(),
            scenario = %ctx.state.scenario,
            "turn started"
        );

        let result = self.dispatch(&mut ctx, events).await;
        if result.is_err() {
            if let Some(record) = &ctx.metadata.execution {
                ctx.state.meta.last_error = Some(record.clone());
            }
        }

        if let Err(error) =
            self.services.sessions.save(&ctx.session_id, &ctx.state, &ctx.memory).await
        {
            error!(
                event_name = "turn.save_failed",
                correlation_id = session_id,
                error = %error,
                "could not persist session"
            );
        }
        if let Ok(payload) = &result {
            self.fire_hooks(&ctx, &payload.hooks);
        }
        if let Some(after_turn) = &self.after_turn {
            guarded(&ctx, "after_turn", || after_turn(&ctx, result.as_ref().ok()));
        }

        if let Ok(payload) = &result {
            info!(
                event_name = "turn.completed",
                correlation_id = session_id,
                next_action = payload.next_action.as_str(),
                stage = ctx.state.stage.as_str(),
                "turn completed"
            );
        }
        (result, ctx.state.snapshot())
    }

    async fn dispatch(
        &self,
        ctx: &mut ExecutionContext,
        events: &EventSink,
    ) -> Result<DonePayload, TurnError> {
        let current = ctx.state.scenario.clone();
        let mid_flow = ctx.state.is_mid_flow();
        let scenario = if mid_flow {
            debug!(
                event_name = "turn.intent_skipped",
                correlation_id = %ctx.session_id,
                scenario = %current,
                stage = ctx.state.stage.as_str(),
                "session is mid-flow, keeping scenario"
            );
            current.clone()
        } else {
            self.classify(ctx, events, &current).await
        };

        if mid_flow && scenario != current {
            ctx.metadata.prior_scenario = Some(current);
        }

        let flow = self.router.route(&scenario, &ctx.state);
        let handler = self
            .handlers
            .get(&flow)
            .or_else(|| self.handlers.get(&self.default_flow))
            .cloned()
            .ok_or_else(|| TurnError::UnknownFlow(flow.clone()))?;
        debug!(
            event_name = "turn.routed",
            correlation_id = %ctx.session_id,
            scenario = %scenario,
            flow = %flow,
            "flow selected"
        );
        handler.run(ctx, events).await
    }

    /// Runs the intent agent. On failure the session keeps its current scenario.
    async fn classify(&self, ctx: &mut ExecutionContext, events: &EventSink, current: &str) -> String {
        let fallback = if current.is_empty() { DEFAULT_SCENARIO } else { current }.to_owned();
        let runner = &self.services.runner;
        if !runner.contains(INTENT_AGENT) {
            return fallback;
        }

        events.emit(TurnEvent::agent_start(INTENT_AGENT, INTENT_LABEL)).await;
        let mut retry_events = Vec::new();
        let mut on_retry = |notice: &RetryNotice| {
            retry_events.push(TurnEvent::agent_start(
                notice.agent.clone(),
                format!("Re-checking your request ({}/{})", notice.attempt + 1, notice.max_retry),
            ));
        };
        let outcome = runner.run_with_retry_hook(INTENT_AGENT, ctx, Some(&mut on_retry)).await;

        let retry_count = retry_events.len() as u32;
        for event in retry_events {
            events.emit(event).await;
        }

        let classified = outcome
            .map_err(|error| error.to_string())
            .and_then(|output| {
                serde_json::from_value::<IntentResult>(output).map_err(|error| error.to_string())
            });
        let (scenario, success) = match classified {
            Ok(result) => (result.scenario, true),
            Err(error) => {
                warn!(
                    event_name = "turn.intent_failed",
                    correlation_id = %ctx.session_id,
                    error = %error,
                    fallback = %fallback,
                    "intent classification failed"
                );
                (fallback, false)
            }
        };
        events
            .emit(TurnEvent::AgentDone {
                agent: INTENT_AGENT.to_owned(),
                label: INTENT_LABEL.to_owned(),
                success,
                stage: None,
                retry_count: Some(retry_count),
            })
            .await;
        scenario
    }

    fn fire_hooks(&self, ctx: &ExecutionContext, hooks: &[HookCall]) {
        for hook in hooks {
            let Some(handler) = self.hook_handlers.get(&hook.kind) else {
                debug!(event_name = "turn.hook_unhandled", hook = %hook.kind, "no hook handler");
                continue;
            };
            guarded(ctx, &hook.kind, || handler(ctx, &hook.data));
        }
    }

    fn error_payload(&self, error: &TurnError, session_id: &str, snapshot: Value) -> DonePayload {
        let mut payload = match &self.on_error {
            Some(on_error) => on_error(error),
            None => {
                let interface = error.clone().into_interface(session_id);
                DonePayload::new(interface.user_message(), NextAction::Done)
            }
        };
        if payload.state_snapshot.is_null() {
            payload.state_snapshot = snapshot;
        }
        payload
    }

    /// Best-effort snapshot of the persisted state after the turn task died.
    async fn stored_snapshot(&self, session_id: &str) -> Value {
        match self.services.sessions.get_or_create(session_id).await {
            Ok((state, _)) => state.snapshot(),
            Err(_) => Value::Null,
        }
    }
}

/// Runs a post-save hook. Neither an error nor a panic may change the turn's outcome.
fn guarded<F>(ctx: &ExecutionContext, hook: &str, run: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    let error = match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error.to_string(),
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|message| (*message).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "hook panicked".to_owned()),
    };
    warn!(
        event_name = "turn.hook_failed",
        correlation_id = %ctx.session_id,
        hook,
        error = %error,
        "hook failed"
    );
}
