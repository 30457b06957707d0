use std::sync::Arc;

use chrono::NaiveDate;
use remit_core::audit::{AuditSink, NoopAuditSink};
use remit_core::config::AppConfig;
use remit_core::flows::{Delta, StateManager};
use tracing::warn;

use crate::agents::schemas::{slot_operations_well_formed, IntentResult, InteractionResult};
use crate::agents::{
    ExecuteAgent, IntentAgent, InteractionAgent, MockTransferGateway, SlotFillerAgent,
    TransferGateway, EXECUTE_AGENT, GENERAL_AGENT, INTENT_AGENT, INTERACTION_AGENT, SLOT_AGENT,
};
use crate::flows::FlowServices;
use crate::guardrails::GuardrailPolicy;
use crate::llm::LlmClient;
use crate::memory::{LlmSummarizer, MemoryCompactor, Summarizer};
use crate::orchestrator::TurnOrchestrator;
use crate::runner::{AgentPolicy, OutputSchema, Runner};
use crate::session::{CompletedStore, InMemorySessionStore, SessionStore};

/// Returns a client bound to the named model, if the host can provide one.
pub type ModelResolver = Arc<dyn Fn(&str) -> Option<Arc<dyn LlmClient>> + Send + Sync>;

/// Wires agents, policies and stores from configuration.
pub struct EngineBuilder {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    summary_llm: Option<Arc<dyn LlmClient>>,
    model_resolver: Option<ModelResolver>,
    gateway: Arc<dyn TransferGateway>,
    sessions: Arc<dyn SessionStore>,
    audit: Arc<dyn AuditSink>,
    today: Option<NaiveDate>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config,
            llm,
            summary_llm: None,
            model_resolver: None,
            gateway: Arc::new(MockTransferGateway::default()),
            sessions: Arc::new(InMemorySessionStore::new()),
            audit: Arc::new(NoopAuditSink),
            today: None,
        }
    }

    /// Separate client for summaries. Takes precedence over `memory.summary_model`.
    pub fn with_summary_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.summary_llm = Some(llm);
        self
    }

    /// Resolves `memory.summary_model` to a client.
    pub fn with_model_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> Option<Arc<dyn LlmClient>> + Send + Sync + 'static,
    {
        self.model_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn TransferGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn build_runner(&self) -> Runner {
        let base = AgentPolicy::from_config(&self.config.agents);
        let context_turns = self.config.flow.context_turns;
        let llm = &self.llm;

        let mut slot_filler = SlotFillerAgent::new(llm.clone(), context_turns);
        if let Some(today) = self.today {
            slot_filler = slot_filler.with_today(today);
        }

        let mut runner = Runner::new();
        runner.register(
            INTENT_AGENT,
            IntentAgent::new(llm.clone()),
            base.clone().with_schema(OutputSchema::of::<IntentResult>("intent_result")),
        );
        runner.register(
            SLOT_AGENT,
            slot_filler,
            base.clone()
                .with_schema(OutputSchema::of::<Delta>("slot_result"))
                .with_validator(slot_operations_well_formed),
        );
        let reply_schema = OutputSchema::of::<InteractionResult>("interaction_result");
        runner.register(
            INTERACTION_AGENT,
            InteractionAgent::new(llm.clone(), context_turns),
            base.clone().with_schema(reply_schema),
        );
        runner.register(
            GENERAL_AGENT,
            InteractionAgent::general(llm.clone(), context_turns),
            base.clone().with_schema(reply_schema),
        );
        // A transfer is never resent automatically.
        runner.register(
            EXECUTE_AGENT,
            ExecuteAgent::new(self.gateway.clone()),
            base.with_max_retry(1),
        );
        runner
    }

    pub fn build_services(&self) -> FlowServices {
        let summarizer: Option<Arc<dyn Summarizer>> = if self.config.memory.enable_summary {
            Some(Arc::new(LlmSummarizer::new(self.summary_client())))
        } else {
            None
        };

        FlowServices {
            runner: self.build_runner(),
            state_manager: StateManager::transfer(self.config.flow.max_fill_turns),
            memory: MemoryCompactor::new(self.config.memory.clone(), summarizer),
            sessions: self.sessions.clone(),
            completed: Arc::new(CompletedStore::new(self.config.flow.completed_history)),
            guardrails: GuardrailPolicy::default(),
            audit: self.audit.clone(),
        }
    }

    /// Explicit summary client, then the client resolved for `memory.summary_model`, then
    /// the main client.
    fn summary_client(&self) -> Arc<dyn LlmClient> {
        if let Some(llm) = &self.summary_llm {
            return llm.clone();
        }
        let Some(model) = self.config.memory.summary_model.as_deref() else {
            return self.llm.clone();
        };
        match self.model_resolver.as_ref().and_then(|resolve| resolve(model)) {
            Some(llm) => llm,
            None => {
                warn!(
                    event_name = "memory.summary_model_unresolved",
                    model,
                    "no client for the summary model, using the main client"
                );
                self.llm.clone()
            }
        }
    }

    pub fn build(self) -> TurnOrchestrator {
        TurnOrchestrator::new(Arc::new(self.build_services()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remit_core::config::AppConfig;
    use remit_core::memory::Memory;

    use crate::agents::{EXECUTE_AGENT, GENERAL_AGENT, INTENT_AGENT, INTERACTION_AGENT, SLOT_AGENT};
    use crate::builder::EngineBuilder;
    use crate::llm::{LlmClient, ScriptedLlm};

    #[test]
    fn runner_registers_every_agent_with_config_policy() {
        let mut config = AppConfig::default();
        config.agents.max_retry = 3;
        let builder = EngineBuilder::new(config, Arc::new(ScriptedLlm::default()));

        let runner = builder.build_runner();

        assert_eq!(runner.len(), 5);
        for agent in [INTENT_AGENT, SLOT_AGENT, INTERACTION_AGENT, GENERAL_AGENT] {
            assert_eq!(runner.policy(agent).map(|policy| policy.max_retry), Some(3), "{agent}");
        }
        assert_eq!(runner.policy(EXECUTE_AGENT).map(|policy| policy.max_retry), Some(1));
        assert!(runner.policy(SLOT_AGENT).and_then(|policy| policy.validator.as_ref()).is_some());
    }

    fn summarize_every_turn() -> AppConfig {
        let mut config = AppConfig::default();
        config.memory.summarize_threshold = 1;
        config.memory.keep_recent_turns = 0;
        config.memory.summary_model = Some("small-summarizer".to_owned());
        config
    }

    #[tokio::test]
    async fn summary_model_selects_the_resolved_client() {
        let main = Arc::new(ScriptedLlm::default());
        let small = Arc::new(ScriptedLlm::new(["short summary"]));
        let resolved = small.clone();
        let services = EngineBuilder::new(summarize_every_turn(), main.clone())
            .with_model_resolver(move |model| {
                let llm: Arc<dyn LlmClient> = resolved.clone();
                (model == "small-summarizer").then_some(llm)
            })
            .build_services();
        let mut memory = Memory::default();

        services.memory.update(&mut memory, "hi", "hello").await;

        assert_eq!(small.call_count(), 1);
        assert_eq!(main.call_count(), 0);
        assert_eq!(memory.summary_text.as_deref(), Some("short summary"));
    }

    #[tokio::test]
    async fn unresolved_summary_model_falls_back_to_main_client() {
        let main = Arc::new(ScriptedLlm::new(["main summary"]));
        let services = EngineBuilder::new(summarize_every_turn(), main.clone()).build_services();
        let mut memory = Memory::default();

        services.memory.update(&mut memory, "hi", "hello").await;

        assert_eq!(main.call_count(), 1);
        assert_eq!(memory.summary_text.as_deref(), Some("main summary"));
    }
}
