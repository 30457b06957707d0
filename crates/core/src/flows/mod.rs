pub mod engine;
pub mod slots;
pub mod states;

pub use engine::{StateManager, DEFAULT_MAX_FILL_TURNS};
pub use slots::{SlotFormat, SlotKind, SlotName, SlotSchema, SlotSpec, SlotValue, Slots};
pub use states::{
    BatchProgress, Delta, DroppedOperation, ExecutionRecord, OpKind, Operation, SessionState,
    Stage, StateMeta, TaskItem, DEFAULT_SCENARIO, TRANSFER_SCENARIO, UNCLEAR_INPUT_KEY,
};
