use serde_json::Value;
use tracing::debug;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::errors::SlotError;
use crate::flows::slots::{SlotName, SlotSchema, Slots};
use crate::flows::states::{
    Delta, DroppedOperation, OpKind, Operation, SessionState, Stage, TaskItem, UNCLEAR_INPUT_KEY,
};

pub const DEFAULT_MAX_FILL_TURNS: u32 = 10;

const UNCLEAR_INPUT_MESSAGE: &str =
    "I couldn't quite follow that. Could you say it again in another way?";

/// Applies slot deltas and stage transitions to a session state.
#[derive(Clone, Debug)]
pub struct StateManager {
    schema: SlotSchema,
    max_fill_turns: u32,
}

impl StateManager {
    pub fn new(schema: SlotSchema, max_fill_turns: u32) -> Self {
        Self { schema, max_fill_turns }
    }

    pub fn transfer(max_fill_turns: u32) -> Self {
        Self::new(SlotSchema::transfer(), max_fill_turns)
    }

    pub fn schema(&self) -> &SlotSchema {
        &self.schema
    }

    pub fn max_fill_turns(&self) -> u32 {
        self.max_fill_turns
    }

    /// Applies `delta` and returns the updated state. The returned value is authoritative.
    pub fn apply(&self, mut state: SessionState, delta: &Delta) -> SessionState {
        if delta.parse_error {
            if matches!(state.stage, Stage::Init | Stage::Filling) {
                state
                    .meta
                    .slot_errors
                    .insert(UNCLEAR_INPUT_KEY.to_owned(), UNCLEAR_INPUT_MESSAGE.to_owned());
            }
        } else {
            state.meta.slot_errors.remove(UNCLEAR_INPUT_KEY);
        }

        if state.stage == Stage::Filling {
            state.filling_turns += 1;
        }

        for operation in &delta.operations {
            self.apply_operation(&mut state, operation);
        }

        state.missing_required = self.schema.missing_required(&state.slots);
        self.transition(&mut state);
        state
    }

    pub fn apply_with_audit<S>(
        &self,
        state: SessionState,
        delta: &Delta,
        sink: &S,
        audit: &AuditContext,
    ) -> SessionState
    where
        S: AuditSink + ?Sized,
    {
        let from = state.stage;
        let dropped_before = state.meta.dropped_ops.len();
        let next = self.apply(state, delta);
        sink.emit(
            audit
                .event("state.delta_applied", AuditCategory::Transition, AuditOutcome::Success)
                .with_metadata("from", from.as_str())
                .with_metadata("to", next.stage.as_str())
                .with_metadata("operations", delta.operations.len().to_string())
                .with_metadata(
                    "dropped",
                    next.meta.dropped_ops.len().saturating_sub(dropped_before).to_string(),
                )
                .with_metadata(
                    "missing_required",
                    next.missing_required
                        .iter()
                        .map(|slot| slot.as_str())
                        .collect::<Vec<_>>()
                        .join(","),
                ),
        );
        next
    }

    /// Starts a multi-item request: records batch progress, queues every item after the
    /// first and returns the first item as a set of operations.
    pub fn seed_batch(&self, state: &mut SessionState, tasks: &[TaskItem]) -> Delta {
        state.meta.batch.total = tasks.len();
        state.meta.batch.progress = 0;
        state.task_queue = tasks.iter().skip(1).cloned().collect();
        Delta::new(tasks.first().map(task_operations).unwrap_or_default())
    }

    /// Pops the next queued item into fresh slots, validating each value the same way a
    /// `set` operation would. Returns the stage the item landed in.
    pub fn load_next_task(&self, state: &mut SessionState) -> Option<Stage> {
        let task = state.task_queue.pop_front()?;
        state.slots = Slots::default();
        state.meta.slot_errors.clear();
        state.filling_turns = 0;
        for operation in task_operations(&task) {
            self.apply_operation(state, &operation);
        }
        state.missing_required = self.schema.missing_required(&state.slots);
        state.stage =
            if state.missing_required.is_empty() { Stage::Ready } else { Stage::Filling };
        Some(state.stage)
    }

    fn apply_operation(&self, state: &mut SessionState, operation: &Operation) {
        match operation.op {
            OpKind::Set => {
                if let Err(error) = self.set_slot(state, operation) {
                    drop_operation(state, operation, &error);
                }
            }
            OpKind::Clear => match slot_name(operation) {
                Ok(slot) => {
                    state.slots.clear(slot);
                    state.meta.slot_errors.remove(slot.as_str());
                }
                Err(error) => drop_operation(state, operation, &error),
            },
            OpKind::Confirm => {
                if state.stage == Stage::Ready {
                    state.stage = Stage::Confirmed;
                }
            }
            OpKind::ContinueFlow => {
                state.stage = if state.slots.has_any() { Stage::Filling } else { Stage::Init };
            }
            OpKind::CancelFlow => {
                state.stage = Stage::Cancelled;
            }
        }
    }

    fn set_slot(&self, state: &mut SessionState, operation: &Operation) -> Result<(), SlotError> {
        let slot = slot_name(operation)?;
        let spec = self
            .schema
            .spec(slot)
            .ok_or_else(|| SlotError::UnknownSlot { slot: slot.as_str().to_owned() })?;
        let raw = operation.value.clone().unwrap_or(Value::Null);

        match spec.validate(&raw) {
            Ok(value) => {
                state.slots.write(slot, value);
                state.meta.slot_errors.remove(slot.as_str());
                Ok(())
            }
            Err(error) => {
                state.meta.slot_errors.insert(slot.as_str().to_owned(), spec.error_message.to_owned());
                Err(error)
            }
        }
    }

    fn transition(&self, state: &mut SessionState) {
        if state.stage.is_terminal() {
            return;
        }

        if state.stage == Stage::Filling && state.filling_turns > self.max_fill_turns {
            state.stage = Stage::Unsupported;
            return;
        }

        if state.stage == Stage::Init && state.slots.has_any() {
            state.stage = Stage::Filling;
        }

        if matches!(state.stage, Stage::Ready | Stage::Confirmed)
            && !state.missing_required.is_empty()
        {
            state.stage = Stage::Filling;
            return;
        }

        if state.stage == Stage::Filling && state.missing_required.is_empty() {
            state.stage = Stage::Ready;
        }
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::transfer(DEFAULT_MAX_FILL_TURNS)
    }
}

fn slot_name(operation: &Operation) -> Result<SlotName, SlotError> {
    operation.slot.as_deref().ok_or(SlotError::MissingSlot)?.parse()
}

fn drop_operation(state: &mut SessionState, operation: &Operation, error: &SlotError) {
    debug!(
        event_name = "state.operation_dropped",
        reason = error.reason_code(),
        error = %error,
        "slot operation dropped"
    );
    state
        .meta
        .dropped_ops
        .push(DroppedOperation { operation: operation.clone(), reason: error.reason_code().to_owned() });
}

fn task_operations(task: &TaskItem) -> Vec<Operation> {
    task.iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(slot, value)| Operation::set(slot.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::flows::engine::{StateManager, DEFAULT_MAX_FILL_TURNS};
    use crate::flows::slots::SlotName;
    use crate::flows::states::{
        Delta, Operation, SessionState, Stage, TaskItem, UNCLEAR_INPUT_KEY,
    };

    fn filling_state(manager: &StateManager) -> SessionState {
        manager.apply(SessionState::default(), &Delta::single(Operation::set("target", "Alice")))
    }

    #[test]
    fn target_and_amount_from_init_reach_ready() {
        let manager = StateManager::default();
        let state = manager.apply(
            SessionState::default(),
            &Delta::new(vec![Operation::set("target", "Alice"), Operation::set("amount", 50_000)]),
        );

        assert_eq!(state.stage, Stage::Ready);
        assert!(state.missing_required.is_empty());
        assert_eq!(state.slots.target.as_deref(), Some("Alice"));
        assert_eq!(state.slots.amount, Some(50_000));
    }

    #[test]
    fn negative_amount_is_rejected_and_recorded() {
        let manager = StateManager::default();
        let state = filling_state(&manager);
        let state = manager.apply(state, &Delta::single(Operation::set("amount", -5)));

        assert_eq!(state.stage, Stage::Filling);
        assert_eq!(state.slots.amount, None);
        assert!(state.meta.slot_errors.contains_key("amount"));
        assert_eq!(state.missing_required, vec![SlotName::Amount]);
        assert_eq!(state.meta.dropped_ops.last().map(|d| d.reason.as_str()), Some("validation_failed"));
    }

    #[test]
    fn a_later_valid_set_clears_the_slot_error() {
        let manager = StateManager::default();
        let state = filling_state(&manager);
        let state = manager.apply(state, &Delta::single(Operation::set("amount", "oops")));
        assert!(state.meta.slot_errors.contains_key("amount"));

        let state = manager.apply(state, &Delta::single(Operation::set("amount", 1_000)));
        assert!(!state.meta.slot_errors.contains_key("amount"));
        assert_eq!(state.stage, Stage::Ready);
    }

    #[test]
    fn confirm_outside_ready_is_a_no_op() {
        let manager = StateManager::default();
        let state = filling_state(&manager);
        let state = manager.apply(state, &Delta::single(Operation::confirm()));
        assert_eq!(state.stage, Stage::Filling);
    }

    #[test]
    fn confirm_in_ready_moves_to_confirmed() {
        let manager = StateManager::default();
        let state = manager.apply(
            SessionState::default(),
            &Delta::new(vec![Operation::set("target", "Bob"), Operation::set("amount", 20_000)]),
        );
        let state = manager.apply(state, &Delta::single(Operation::confirm()));
        assert_eq!(state.stage, Stage::Confirmed);
    }

    #[test]
    fn clearing_a_required_slot_in_ready_returns_to_filling() {
        let manager = StateManager::default();
        let state = manager.apply(
            SessionState::default(),
            &Delta::new(vec![Operation::set("target", "Bob"), Operation::set("amount", 20_000)]),
        );
        let state = manager.apply(state, &Delta::single(Operation::clear("amount")));
        assert_eq!(state.stage, Stage::Filling);
        assert_eq!(state.missing_required, vec![SlotName::Amount]);
    }

    #[test]
    fn cancel_from_any_stage_cancels() {
        let manager = StateManager::default();
        let state = filling_state(&manager);
        let state = manager.apply(state, &Delta::single(Operation::cancel_flow()));
        assert_eq!(state.stage, Stage::Cancelled);
    }

    #[test]
    fn applying_the_same_delta_twice_is_stable() {
        let manager = StateManager::default();
        let delta = Delta::new(vec![Operation::set("target", "Alice"), Operation::set("amount", 7)]);
        let once = manager.apply(SessionState::default(), &delta);
        let twice = manager.apply(once.clone(), &delta);

        assert_eq!(once.stage, twice.stage);
        assert_eq!(once.slots, twice.slots);
        assert_eq!(once.missing_required, twice.missing_required);
    }

    #[test]
    fn unknown_slots_are_dropped_without_touching_state() {
        let manager = StateManager::default();
        let state = manager.apply(
            SessionState::default(),
            &Delta::single(Operation::set("account_number", "123-456")),
        );

        assert_eq!(state.stage, Stage::Init);
        assert_eq!(state.meta.dropped_ops.len(), 1);
        assert_eq!(state.meta.dropped_ops[0].reason, "unknown_slot");
    }

    #[test]
    fn filling_turn_cap_marks_the_flow_unsupported() {
        let manager = StateManager::transfer(2);
        let mut state = filling_state(&manager);
        for _ in 0..2 {
            state = manager.apply(state, &Delta::default());
            assert_eq!(state.stage, Stage::Filling);
        }
        let state = manager.apply(state, &Delta::default());
        assert_eq!(state.stage, Stage::Unsupported);
        assert_eq!(state.filling_turns, 3);
    }

    #[test]
    fn parse_error_sets_unclear_marker_only_while_collecting() {
        let manager = StateManager::default();
        let state = manager.apply(SessionState::default(), &Delta::unparsed());
        assert!(state.meta.slot_errors.contains_key(UNCLEAR_INPUT_KEY));

        let state = manager.apply(state, &Delta::single(Operation::set("target", "Alice")));
        assert!(!state.meta.slot_errors.contains_key(UNCLEAR_INPUT_KEY));
    }

    #[test]
    fn continue_flow_reopens_a_terminal_state() {
        let manager = StateManager::default();
        let mut state = filling_state(&manager);
        state.stage = Stage::Cancelled;
        let state = manager.apply(state, &Delta::single(Operation::continue_flow()));
        assert_eq!(state.stage, Stage::Filling);
    }

    #[test]
    fn batch_seeding_queues_the_rest_and_continues_in_order() {
        let manager = StateManager::default();
        let tasks: Vec<TaskItem> = vec![
            serde_json::from_value(json!({"target": "Alice", "amount": 10_000})).expect("task"),
            serde_json::from_value(json!({"target": "Bob", "amount": null})).expect("task"),
        ];
        let mut state = SessionState::default();
        let first = manager.seed_batch(&mut state, &tasks);
        assert_eq!(state.meta.batch.total, 2);
        assert_eq!(state.task_queue.len(), 1);

        let mut state = manager.apply(state, &first);
        assert_eq!(state.stage, Stage::Ready);
        assert_eq!(state.slots.target.as_deref(), Some("Alice"));

        let next = manager.load_next_task(&mut state);
        assert_eq!(next, Some(Stage::Filling));
        assert_eq!(state.slots.target.as_deref(), Some("Bob"));
        assert_eq!(state.slots.amount, None);
        assert!(state.task_queue.is_empty());
        assert_eq!(manager.load_next_task(&mut state), None);
    }

    #[test]
    fn audited_apply_records_transition() {
        let manager = StateManager::transfer(DEFAULT_MAX_FILL_TURNS);
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new("session-1", "req-1", "state-manager");
        let state = manager.apply_with_audit(
            SessionState::default(),
            &Delta::new(vec![Operation::set("target", "Alice"), Operation::set("amount", 5)]),
            &sink,
            &audit,
        );

        assert_eq!(state.stage, Stage::Ready);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "state.delta_applied");
        assert_eq!(events[0].metadata.get("from").map(String::as_str), Some("INIT"));
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("READY"));
    }
}
