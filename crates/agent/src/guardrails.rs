use remit_core::flows::{Delta, OpKind, Stage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    /// Operations were removed from the extracted delta before it reached the state manager.
    Strip { reason_code: &'static str, removed: Vec<OpKind> },
}

/// Limits which stage-control operations the slot-extraction LLM may emit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub llm_can_confirm_in_ready: bool,
    pub llm_can_cancel_in_ready: bool,
}

impl GuardrailPolicy {
    /// In READY, `confirm` and `cancel_flow` must come from the deterministic utterance
    /// classifier; the extractor's versions are dropped.
    pub fn filter_extraction(&self, stage: Stage, delta: Delta) -> (Delta, GuardrailDecision) {
        if stage != Stage::Ready {
            return (delta, GuardrailDecision::Allow);
        }

        let mut removed = Vec::new();
        let Delta { operations, tasks, parse_error } = delta;
        let operations = operations
            .into_iter()
            .filter(|operation| {
                let allowed = match operation.op {
                    OpKind::Confirm => self.llm_can_confirm_in_ready,
                    OpKind::CancelFlow => self.llm_can_cancel_in_ready,
                    _ => true,
                };
                if !allowed {
                    removed.push(operation.op);
                }
                allowed
            })
            .collect();
        let filtered = Delta { operations, tasks, parse_error };

        if removed.is_empty() {
            (filtered, GuardrailDecision::Allow)
        } else {
            (filtered, GuardrailDecision::Strip { reason_code: "llm_stage_control_in_ready", removed })
        }
    }
}

#[cfg(test)]
mod tests {
    use remit_core::flows::{Delta, OpKind, Operation, Stage};

    use super::{GuardrailDecision, GuardrailPolicy};

    #[test]
    fn ready_stage_strips_llm_confirm_and_cancel() {
        let delta = Delta::new(vec![
            Operation::set("memo", "rent"),
            Operation::confirm(),
            Operation::cancel_flow(),
        ]);

        let (filtered, decision) = GuardrailPolicy::default().filter_extraction(Stage::Ready, delta);

        assert_eq!(filtered.operations, vec![Operation::set("memo", "rent")]);
        assert_eq!(
            decision,
            GuardrailDecision::Strip {
                reason_code: "llm_stage_control_in_ready",
                removed: vec![OpKind::Confirm, OpKind::CancelFlow],
            }
        );
    }

    #[test]
    fn other_stages_pass_through() {
        let delta = Delta::new(vec![Operation::cancel_flow()]);

        let (filtered, decision) =
            GuardrailPolicy::default().filter_extraction(Stage::Filling, delta.clone());

        assert_eq!(filtered, delta);
        assert_eq!(decision, GuardrailDecision::Allow);
    }

    #[test]
    fn policy_can_allow_llm_confirm() {
        let policy = GuardrailPolicy { llm_can_confirm_in_ready: true, ..GuardrailPolicy::default() };
        let delta = Delta::single(Operation::confirm());

        let (filtered, decision) = policy.filter_extraction(Stage::Ready, delta.clone());

        assert_eq!(filtered, delta);
        assert_eq!(decision, GuardrailDecision::Allow);
    }
}
