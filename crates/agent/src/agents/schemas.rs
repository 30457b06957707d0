use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::NextAction;

pub const INTERACTION_FALLBACK_MESSAGE: &str = "Sorry, I couldn't put a reply together.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentResult {
    pub scenario: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionResult {
    #[serde(alias = "next_action")]
    pub action: NextAction,
    pub message: String,
}

impl InteractionResult {
    pub fn fallback() -> Self {
        Self { action: NextAction::Done, message: INTERACTION_FALLBACK_MESSAGE.to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub transaction_id: String,
}

/// Validator for slot-extraction output: every `set`/`clear` must name a slot.
pub fn slot_operations_well_formed(value: &Value) -> bool {
    let Some(operations) = value.get("operations").and_then(Value::as_array) else {
        return false;
    };
    operations.iter().all(|operation| match operation.get("op").and_then(Value::as_str) {
        Some("set" | "clear") => operation.get("slot").and_then(Value::as_str).is_some(),
        Some(_) => true,
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::agents::schemas::{slot_operations_well_formed, InteractionResult};
    use crate::events::NextAction;

    #[test]
    fn interaction_result_accepts_next_action_alias() {
        let parsed: InteractionResult =
            serde_json::from_value(json!({"next_action": "CONFIRM", "message": "Send it?"}))
                .expect("alias parses");
        assert_eq!(parsed.action, NextAction::Confirm);
    }

    #[test]
    fn slot_validator_rejects_set_without_slot() {
        assert!(slot_operations_well_formed(&json!({"operations": []})));
        assert!(slot_operations_well_formed(
            &json!({"operations": [{"op": "set", "slot": "amount", "value": 1}, {"op": "confirm"}]})
        ));
        assert!(!slot_operations_well_formed(&json!({"operations": [{"op": "set", "value": 1}]})));
        assert!(!slot_operations_well_formed(&json!({"ops": []})));
    }
}
