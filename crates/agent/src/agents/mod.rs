//! LLM-backed agents registered with the [`Runner`](crate::runner::Runner).

pub mod execute;
pub mod intent;
pub mod interaction;
pub mod prompts;
pub mod schemas;
pub mod slot_filler;

use std::fmt::Write as _;

use remit_core::flows::{SessionState, SlotName, SlotValue};

pub use execute::{ExecuteAgent, MockTransferGateway, TransferGateway, TransferGatewayError};
pub use intent::IntentAgent;
pub use interaction::InteractionAgent;
pub use slot_filler::SlotFillerAgent;

pub const INTENT_AGENT: &str = "intent";
pub const SLOT_AGENT: &str = "slot";
pub const INTERACTION_AGENT: &str = "interaction";
pub const GENERAL_AGENT: &str = "general";
pub const EXECUTE_AGENT: &str = "execute";

pub(crate) fn display_value(value: &SlotValue) -> String {
    match value {
        SlotValue::Text(text) => text.clone(),
        SlotValue::Integer(number) => number.to_string(),
        SlotValue::Date(date) => date.format("%Y-%m-%d").to_string(),
    }
}

/// Renders the session state as a prompt section.
pub fn state_context(state: &SessionState) -> String {
    let mut block = String::from("## Current state\n");
    let _ = writeln!(block, "scenario: {}", state.scenario);
    let _ = writeln!(block, "stage: {}", state.stage.as_str());
    for slot in SlotName::ALL {
        match state.slots.get(slot) {
            Some(value) => {
                let _ = writeln!(block, "{slot}: {}", display_value(&value));
            }
            None => {
                let _ = writeln!(block, "{slot}: (not set)");
            }
        }
    }
    if !state.missing_required.is_empty() {
        let missing: Vec<&str> =
            state.missing_required.iter().map(|slot| slot.label()).collect();
        let _ = writeln!(block, "missing: {}", missing.join(", "));
    }
    let batch = &state.meta.batch;
    if batch.is_batch() {
        let _ = writeln!(block, "batch: item {} of {}", batch.current_index(), batch.total);
    }
    if !state.meta.slot_errors.is_empty() {
        block.push_str("\n## Slot errors\n");
        for (slot, message) in &state.meta.slot_errors {
            let _ = writeln!(block, "- {slot}: {message}");
        }
    }
    block.trim_end().to_owned()
}

#[cfg(test)]
mod tests {
    use remit_core::flows::{SessionState, SlotName, Stage};

    use crate::agents::state_context;

    #[test]
    fn state_context_lists_slots_errors_and_missing() {
        let mut state = SessionState::default();
        state.stage = Stage::Filling;
        state.slots.target = Some("Alice".to_owned());
        state.missing_required = vec![SlotName::Amount];
        state.meta.slot_errors.insert("amount".to_owned(), "Amount must be at least 1.".to_owned());

        let block = state_context(&state);

        assert!(block.contains("stage: FILLING"));
        assert!(block.contains("target: Alice"));
        assert!(block.contains("amount: (not set)"));
        assert!(block.contains("missing: amount"));
        assert!(block.contains("- amount: Amount must be at least 1."));
        assert!(!block.contains("batch:"));
    }
}
