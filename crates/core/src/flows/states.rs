use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::flows::slots::{SlotName, Slots};

pub const DEFAULT_SCENARIO: &str = "GENERAL";
pub const TRANSFER_SCENARIO: &str = "TRANSFER";

/// Slot error key used when the extraction step produced output that could not be parsed.
pub const UNCLEAR_INPUT_KEY: &str = "_unclear";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    #[default]
    Init,
    Filling,
    Ready,
    Confirmed,
    Executed,
    Failed,
    Cancelled,
    Unsupported,
}

impl Stage {
    pub const TERMINAL: [Stage; 4] =
        [Stage::Executed, Stage::Failed, Stage::Cancelled, Stage::Unsupported];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Filling => "FILLING",
            Self::Ready => "READY",
            Self::Confirmed => "CONFIRMED",
            Self::Executed => "EXECUTED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Unsupported => "UNSUPPORTED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Set,
    Clear,
    Confirm,
    ContinueFlow,
    CancelFlow,
}

impl OpKind {
    pub fn is_stage_control(self) -> bool {
        matches!(self, Self::Confirm | Self::CancelFlow)
    }
}

/// A single declarative instruction emitted by the slot-extraction step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub op: OpKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Operation {
    pub fn set(slot: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { op: OpKind::Set, slot: Some(slot.into()), value: Some(value.into()) }
    }

    pub fn clear(slot: impl Into<String>) -> Self {
        Self { op: OpKind::Clear, slot: Some(slot.into()), value: None }
    }

    pub fn confirm() -> Self {
        Self { op: OpKind::Confirm, slot: None, value: None }
    }

    pub fn continue_flow() -> Self {
        Self { op: OpKind::ContinueFlow, slot: None, value: None }
    }

    pub fn cancel_flow() -> Self {
        Self { op: OpKind::CancelFlow, slot: None, value: None }
    }
}

/// Partial slot set for one item of a multi-item request, keyed by slot name.
pub type TaskItem = BTreeMap<String, Value>;

/// A batch of operations, applied in order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskItem>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_error: bool,
}

impl Delta {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations, tasks: None, parse_error: false }
    }

    pub fn single(operation: Operation) -> Self {
        Self::new(vec![operation])
    }

    pub fn unparsed() -> Self {
        Self { operations: Vec::new(), tasks: None, parse_error: true }
    }

    pub fn with_tasks(mut self, tasks: Vec<TaskItem>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Items of a multi-item request, when the extractor reported any.
    pub fn batch_tasks(&self) -> Option<&[TaskItem]> {
        self.tasks.as_deref().filter(|tasks| !tasks.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedOperation {
    pub operation: Operation,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: usize,
    pub progress: usize,
    pub executed: usize,
    pub receipts: Vec<Slots>,
}

impl BatchProgress {
    pub fn is_batch(&self) -> bool {
        self.total > 1
    }

    /// 1-based position of the item currently being handled.
    pub fn current_index(&self) -> usize {
        self.progress + 1
    }

    pub fn effective_total(&self) -> usize {
        self.total.max(1)
    }
}

/// Structured record of the last agent failure seen for this session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub agent: String,
    pub error: String,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMeta {
    pub slot_errors: BTreeMap<String, String>,
    pub dropped_ops: Vec<DroppedOperation>,
    pub batch: BatchProgress,
    pub last_cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ExecutionRecord>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Per-session task state. Only the state manager mutates slots and stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub scenario: String,
    pub stage: Stage,
    pub slots: Slots,
    pub missing_required: Vec<SlotName>,
    pub task_queue: VecDeque<TaskItem>,
    pub meta: StateMeta,
    pub filling_turns: u32,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            scenario: DEFAULT_SCENARIO.to_string(),
            stage: Stage::Init,
            slots: Slots::default(),
            missing_required: Vec::new(),
            task_queue: VecDeque::new(),
            meta: StateMeta::default(),
            filling_turns: 0,
        }
    }
}

impl SessionState {
    pub fn is_mid_flow(&self) -> bool {
        self.scenario != DEFAULT_SCENARIO
            && self.stage != Stage::Init
            && !self.stage.is_terminal()
    }

    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
