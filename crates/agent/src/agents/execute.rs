use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use remit_core::flows::Slots;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::agents::schemas::ExecutionResult;
use crate::context::ExecutionContext;
use crate::runner::{Agent, AgentError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransferGatewayError {
    #[error("transfer backend unavailable: {0}")]
    Unavailable(String),
    #[error("transfer rejected: {0}")]
    Rejected(String),
}

/// Side-effecting transfer backend.
#[async_trait]
pub trait TransferGateway: Send + Sync {
    async fn transfer(&self, slots: &Slots) -> Result<String, TransferGatewayError>;
}

/// Accepts every transfer and hands out sequential transaction ids.
#[derive(Debug, Default)]
pub struct MockTransferGateway {
    sequence: AtomicU64,
}

impl MockTransferGateway {
    pub fn executed(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferGateway for MockTransferGateway {
    async fn transfer(&self, slots: &Slots) -> Result<String, TransferGatewayError> {
        if slots.target.is_none() || slots.amount.is_none() {
            return Err(TransferGatewayError::Rejected("recipient and amount are required".into()));
        }
        let next = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("mock-tx-{next:06}"))
    }
}

/// Executes the confirmed transfer held in the session slots.
pub struct ExecuteAgent {
    gateway: Arc<dyn TransferGateway>,
}

impl ExecuteAgent {
    pub fn new(gateway: Arc<dyn TransferGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Agent for ExecuteAgent {
    async fn invoke(&self, ctx: &ExecutionContext) -> Result<Value, AgentError> {
        let transaction_id =
            self.gateway.transfer(&ctx.state.slots).await.map_err(|error| match error {
                TransferGatewayError::Unavailable(message) => AgentError::retryable(message),
                TransferGatewayError::Rejected(message) => AgentError::fatal("execute", message),
            })?;
        info!(
            event_name = "transfer.executed",
            correlation_id = %ctx.session_id,
            transaction_id = %transaction_id,
            "transfer executed"
        );
        serde_json::to_value(ExecutionResult { success: true, transaction_id })
            .map_err(|error| AgentError::fatal("execute", error.to_string()))
    }
}
