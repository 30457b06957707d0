use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use remit_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use remit_core::flows::{Delta, Operation, SessionState, Stage, StateManager, TRANSFER_SCENARIO};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::agents::schemas::InteractionResult;
use crate::agents::{EXECUTE_AGENT, GENERAL_AGENT, INTERACTION_AGENT, SLOT_AGENT};
use crate::context::ExecutionContext;
use crate::conversation::{is_cancel, is_confirm, parse_slot_edit_confirm};
use crate::error::TurnError;
use crate::events::{DonePayload, EventSink, HookCall, NextAction, TurnEvent};
use crate::flows::messages::{ready_message, terminal_message, UNSUPPORTED_MESSAGE};
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::memory::MemoryCompactor;
use crate::runner::Runner;
use crate::session::{CompletedStore, CompletedTask, SessionStore};

pub const TRANSFER_COMPLETED_HOOK: &str = "transfer_completed";

#[async_trait]
pub trait FlowHandler: Send + Sync {
    /// Runs one turn of the flow. The returned payload becomes the turn's terminal event.
    async fn run(
        &self,
        ctx: &mut ExecutionContext,
        events: &EventSink,
    ) -> Result<DonePayload, TurnError>;
}

/// Collaborators shared by every flow handler.
pub struct FlowServices {
    pub runner: Runner,
    pub state_manager: StateManager,
    pub memory: MemoryCompactor,
    pub sessions: Arc<dyn SessionStore>,
    pub completed: Arc<CompletedStore>,
    pub guardrails: GuardrailPolicy,
    pub audit: Arc<dyn AuditSink>,
}

impl FlowServices {
    /// Records the exchange in memory.
    pub async fn remember(&self, ctx: &mut ExecutionContext, assistant: &str) {
        self.memory.update(&mut ctx.memory, &ctx.user_message, assistant).await;
    }

    pub fn payload(
        &self,
        ctx: &ExecutionContext,
        message: impl Into<String>,
        next_action: NextAction,
    ) -> DonePayload {
        let mut payload = DonePayload::new(message, next_action);
        payload.state_snapshot = ctx.state.snapshot();
        payload
    }

    /// Replaces the task state with a fresh one. Memory is untouched.
    pub async fn reset_state(&self, ctx: &mut ExecutionContext) -> Result<(), TurnError> {
        ctx.state = SessionState::default();
        self.sessions.reset(&ctx.session_id).await?;
        Ok(())
    }

    /// Streams a conversational reply from `agent` and turns it into the turn's payload.
    pub async fn agent_reply(
        &self,
        ctx: &mut ExecutionContext,
        events: &EventSink,
        agent: &str,
        label: &str,
    ) -> Result<DonePayload, TurnError> {
        events.emit(TurnEvent::agent_start(agent, label)).await;
        let output = match self.runner.run_stream(agent, ctx, events).await {
            Ok(output) => output,
            Err(error) => {
                events.emit(TurnEvent::agent_done(agent, label, false)).await;
                return Err(error.into());
            }
        };
        events.emit(TurnEvent::agent_done(agent, label, true)).await;

        let reply = serde_json::from_value::<InteractionResult>(output)
            .unwrap_or_else(|_| InteractionResult::fallback());
        self.remember(ctx, &reply.message).await;
        Ok(self.payload(ctx, reply.message, reply.action))
    }
}

/// Small talk and anything without a dedicated flow.
pub struct DefaultFlowHandler {
    services: Arc<FlowServices>,
}

impl DefaultFlowHandler {
    pub fn new(services: Arc<FlowServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl FlowHandler for DefaultFlowHandler {
    async fn run(
        &self,
        ctx: &mut ExecutionContext,
        events: &EventSink,
    ) -> Result<DonePayload, TurnError> {
        self.services.agent_reply(ctx, events, GENERAL_AGENT, "Thinking").await
    }
}

/// Multi-step transfer: extract slots, confirm, execute, and walk through batches.
pub struct TransferFlowHandler {
    services: Arc<FlowServices>,
}

impl TransferFlowHandler {
    pub fn new(services: Arc<FlowServices>) -> Self {
        Self { services }
    }

    /// Confirm and cancel in READY (and cancel in FILLING) never go through the LLM.
    async fn extract(
        &self,
        ctx: &mut ExecutionContext,
        events: &EventSink,
    ) -> Result<Delta, TurnError> {
        let stage = ctx.state.stage;
        let message = ctx.user_message.as_str();
        match stage {
            Stage::Ready if is_confirm(message) => return Ok(Delta::single(Operation::confirm())),
            Stage::Ready | Stage::Filling if is_cancel(message) => {
                return Ok(Delta::single(Operation::cancel_flow()));
            }
            Stage::Ready => {
                if let Some(delta) = parse_slot_edit_confirm(message) {
                    return Ok(delta);
                }
            }
            _ => {}
        }

        let output = match self.services.runner.run(SLOT_AGENT, ctx).await {
            Ok(output) => output,
            Err(error) => {
                events.emit(TurnEvent::agent_done(SLOT_AGENT, SLOT_LABEL, false)).await;
                return Err(error.into());
            }
        };
        let delta = serde_json::from_value::<Delta>(output).map_err(|error| {
            TurnError::MalformedOutput { agent: SLOT_AGENT.to_owned(), message: error.to_string() }
        })?;

        let (delta, decision) = self.services.guardrails.filter_extraction(stage, delta);
        if let GuardrailDecision::Strip { reason_code, removed } = decision {
            debug!(
                event_name = "guardrail.stripped",
                correlation_id = %ctx.session_id,
                reason_code,
                removed = ?removed,
                "dropped stage-control operations from extraction"
            );
        }
        Ok(delta)
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        events: &EventSink,
        hooks: &mut Vec<HookCall>,
    ) {
        let batch = &ctx.state.meta.batch;
        events
            .emit(TurnEvent::TaskProgress {
                index: batch.current_index(),
                total: batch.effective_total(),
                slots: ctx.state.slots.clone(),
            })
            .await;
        events.emit(TurnEvent::agent_start(EXECUTE_AGENT, EXECUTE_LABEL)).await;

        let services = &self.services;
        match services.runner.run(EXECUTE_AGENT, ctx).await {
            Ok(output) => {
                let transaction_id =
                    output.get("transaction_id").and_then(Value::as_str).map(str::to_owned);
                ctx.state.stage = Stage::Executed;
                ctx.state.meta.batch.executed += 1;
                ctx.state.meta.batch.receipts.push(ctx.state.slots.clone());
                let record = CompletedTask::from_state(&ctx.state, transaction_id.clone());
                services.completed.add(&ctx.session_id, record);
                hooks.push(HookCall::new(
                    TRANSFER_COMPLETED_HOOK,
                    json!({
                        "slots": ctx.state.slots,
                        "transaction_id": transaction_id,
                    }),
                ));
                services.audit.emit(
                    audit_context(ctx)
                        .event("transfer.executed", AuditCategory::Execution, AuditOutcome::Success)
                        .with_metadata("transaction_id", transaction_id.unwrap_or_default()),
                );
                events.emit(stage_done(EXECUTE_AGENT, EXECUTE_LABEL, true, Stage::Executed)).await;

                if let Err(error) =
                    services.sessions.save(&ctx.session_id, &ctx.state, &ctx.memory).await
                {
                    warn!(
                        event_name = "transfer.progress_save_failed",
                        correlation_id = %ctx.session_id,
                        error = %error,
                        "could not persist batch progress"
                    );
                }
            }
            Err(error) => {
                ctx.state.stage = Stage::Failed;
                ctx.state.meta.last_error = ctx.metadata.execution.clone();
                warn!(
                    event_name = "transfer.failed",
                    correlation_id = %ctx.session_id,
                    error = %error,
                    "transfer execution failed"
                );
                services.audit.emit(
                    audit_context(ctx)
                        .event("transfer.failed", AuditCategory::Execution, AuditOutcome::Failed)
                        .with_metadata("error", error.to_string()),
                );
                events.emit(stage_done(EXECUTE_AGENT, EXECUTE_LABEL, false, Stage::Failed)).await;
            }
        }
    }

    async fn finish_terminal(
        &self,
        ctx: &mut ExecutionContext,
        hooks: Vec<HookCall>,
    ) -> Result<DonePayload, TurnError> {
        let services = &self.services;
        let stage = ctx.state.stage;
        let message = terminal_message(&ctx.state);
        let mut payload = services.payload(ctx, message.clone(), NextAction::Done);
        payload.hooks = hooks;

        let receipts = &ctx.state.meta.batch.receipts;
        let show_receipts =
            matches!(stage, Stage::Executed | Stage::Failed) || !receipts.is_empty();
        if show_receipts {
            if receipts.len() > 1 {
                payload.receipts = Some(receipts.clone());
            } else {
                payload.receipt =
                    Some(receipts.first().cloned().unwrap_or_else(|| ctx.state.slots.clone()));
            }
        }

        if matches!(stage, Stage::Failed | Stage::Cancelled) {
            services.completed.add(&ctx.session_id, CompletedTask::from_state(&ctx.state, None));
        }
        services.remember(ctx, &message).await;
        info!(
            event_name = "transfer.finished",
            correlation_id = %ctx.session_id,
            stage = stage.as_str(),
            executed = ctx.state.meta.batch.executed,
            "transfer flow reached a terminal stage"
        );
        services.reset_state(ctx).await?;
        Ok(payload)
    }
}

const SLOT_LABEL: &str = "Reading transfer details";
const EXECUTE_LABEL: &str = "Sending transfer";
const REPLY_LABEL: &str = "Writing a reply";

fn stage_done(agent: &str, label: &str, success: bool, stage: Stage) -> TurnEvent {
    TurnEvent::AgentDone {
        agent: agent.to_owned(),
        label: label.to_owned(),
        success,
        stage: Some(stage.as_str().to_owned()),
        retry_count: None,
    }
}

fn audit_context(ctx: &ExecutionContext) -> AuditContext {
    AuditContext::new(ctx.session_id.clone(), ctx.correlation_id.clone(), "transfer-flow")
}

#[async_trait]
impl FlowHandler for TransferFlowHandler {
    async fn run(
        &self,
        ctx: &mut ExecutionContext,
        events: &EventSink,
    ) -> Result<DonePayload, TurnError> {
        let services = &self.services;
        ctx.state.scenario = TRANSFER_SCENARIO.to_owned();
        events.emit(TurnEvent::agent_start(SLOT_AGENT, SLOT_LABEL)).await;

        let mut delta = self.extract(ctx, events).await?;
        if matches!(ctx.state.stage, Stage::Init | Stage::Filling) {
            if let Some(tasks) = delta.batch_tasks().map(<[_]>::to_vec) {
                let seeded = services.state_manager.seed_batch(&mut ctx.state, &tasks);
                debug!(
                    event_name = "transfer.batch_seeded",
                    correlation_id = %ctx.session_id,
                    total = tasks.len(),
                    "multi-item request detected"
                );
                delta = seeded;
            }
        }

        let ready_without_operations = ctx.state.stage == Stage::Ready && delta.is_empty();
        let state = mem::take(&mut ctx.state);
        ctx.state = services.state_manager.apply_with_audit(
            state,
            &delta,
            services.audit.as_ref(),
            &audit_context(ctx),
        );
        events.emit(stage_done(SLOT_AGENT, SLOT_LABEL, true, ctx.state.stage)).await;

        if ctx.state.stage == Stage::Unsupported {
            let payload = services.payload(ctx, UNSUPPORTED_MESSAGE, NextAction::Done);
            services.remember(ctx, UNSUPPORTED_MESSAGE).await;
            services.completed.add(&ctx.session_id, CompletedTask::from_state(&ctx.state, None));
            services.reset_state(ctx).await?;
            return Ok(payload);
        }

        if ctx.state.stage == Stage::Cancelled && !ctx.state.task_queue.is_empty() {
            services.completed.add(&ctx.session_id, CompletedTask::from_state(&ctx.state, None));
            if services.state_manager.load_next_task(&mut ctx.state).is_some() {
                ctx.state.meta.batch.progress += 1;
                ctx.state.meta.last_cancelled = true;
            }
        }

        let mut hooks = Vec::new();
        if ctx.state.stage == Stage::Confirmed {
            self.execute(ctx, events, &mut hooks).await;
            if ctx.state.stage == Stage::Executed
                && services.state_manager.load_next_task(&mut ctx.state).is_some()
            {
                ctx.state.meta.batch.progress += 1;
            }
        }

        if ctx.state.stage.is_terminal() {
            return self.finish_terminal(ctx, hooks).await;
        }

        let mut payload = if ctx.state.stage == Stage::Ready && !ready_without_operations {
            let message = ready_message(&ctx.state);
            ctx.state.meta.last_cancelled = false;
            services.remember(ctx, &message).await;
            let mut payload = services.payload(ctx, message, NextAction::Confirm);
            payload.slots_card = Some(ctx.state.slots.clone());
            payload
        } else {
            services.agent_reply(ctx, events, INTERACTION_AGENT, REPLY_LABEL).await?
        };
        payload.hooks.extend(hooks);
        Ok(payload)
    }
}
