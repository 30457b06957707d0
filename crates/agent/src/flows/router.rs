use std::collections::BTreeMap;

use remit_core::flows::{SessionState, TRANSFER_SCENARIO};

pub const DEFAULT_FLOW: &str = "default_flow";
pub const TRANSFER_FLOW: &str = "transfer_flow";

pub trait FlowRouter: Send + Sync {
    fn route(&self, scenario: &str, state: &SessionState) -> String;
}

/// Table lookup from scenario to flow id with an explicit fallback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioRouter {
    routes: BTreeMap<String, String>,
    default_flow: String,
}

impl ScenarioRouter {
    pub fn new(default_flow: impl Into<String>) -> Self {
        Self { routes: BTreeMap::new(), default_flow: default_flow.into() }
    }

    pub fn with_route(mut self, scenario: impl Into<String>, flow: impl Into<String>) -> Self {
        self.routes.insert(scenario.into(), flow.into());
        self
    }

    pub fn default_flow(&self) -> &str {
        &self.default_flow
    }
}

impl Default for ScenarioRouter {
    fn default() -> Self {
        Self::new(DEFAULT_FLOW).with_route(TRANSFER_SCENARIO, TRANSFER_FLOW)
    }
}

impl FlowRouter for ScenarioRouter {
    fn route(&self, scenario: &str, _state: &SessionState) -> String {
        self.routes.get(scenario).cloned().unwrap_or_else(|| self.default_flow.clone())
    }
}

#[cfg(test)]
mod tests {
    use remit_core::flows::SessionState;

    use super::{FlowRouter, ScenarioRouter, DEFAULT_FLOW, TRANSFER_FLOW};

    #[test]
    fn routes_known_scenarios_and_falls_back() {
        let router = ScenarioRouter::default();
        let state = SessionState::default();

        assert_eq!(router.route("TRANSFER", &state), TRANSFER_FLOW);
        assert_eq!(router.route("GENERAL", &state), DEFAULT_FLOW);
        assert_eq!(router.route("SOMETHING_NEW", &state), DEFAULT_FLOW);
    }
}
