use std::sync::Arc;

use async_trait::async_trait;
use remit_core::flows::{DEFAULT_SCENARIO, TRANSFER_SCENARIO};
use remit_core::memory::ChatMessage;
use serde_json::Value;

use crate::agents::prompts::INTENT_SYSTEM_PROMPT;
use crate::agents::schemas::IntentResult;
use crate::context::ExecutionContext;
use crate::llm::{strip_code_fence, LlmClient};
use crate::runner::{Agent, AgentError};

/// Classifies the user message into a scenario.
pub struct IntentAgent {
    llm: Arc<dyn LlmClient>,
}

impl IntentAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Agent for IntentAgent {
    async fn invoke(&self, ctx: &ExecutionContext) -> Result<Value, AgentError> {
        let messages = [ChatMessage::user(ctx.user_message.clone())];
        let text = self
            .llm
            .complete(INTENT_SYSTEM_PROMPT, &messages)
            .await
            .map_err(|error| AgentError::retryable(format!("intent llm call failed: {error}")))?;

        let result = parse_intent(&text)
            .ok_or_else(|| AgentError::retryable("intent output was not a known scenario"))?;
        serde_json::to_value(result).map_err(|error| AgentError::fatal("intent", error.to_string()))
    }
}

/// Accepts either a JSON object with a `scenario` field or a bare scenario label.
pub fn parse_intent(text: &str) -> Option<IntentResult> {
    let body = strip_code_fence(text);
    let (label, reason) = match serde_json::from_str::<IntentResult>(body) {
        Ok(parsed) => (parsed.scenario, parsed.reason),
        Err(_) if !body.starts_with('{') => (body.to_owned(), None),
        Err(_) => return None,
    };
    let scenario = normalize_scenario(&label)?;
    Some(IntentResult { scenario: scenario.to_owned(), reason })
}

fn normalize_scenario(label: &str) -> Option<&'static str> {
    let label = label.trim().trim_matches(|ch: char| ch == '"' || ch == '.').to_ascii_uppercase();
    match label.as_str() {
        "TRANSFER" => Some(TRANSFER_SCENARIO),
        "GENERAL" | "OTHER" | "DEFAULT" | "CHAT" => Some(DEFAULT_SCENARIO),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use remit_core::flows::SessionState;
    use remit_core::memory::Memory;
    use serde_json::json;

    use crate::agents::intent::{parse_intent, IntentAgent};
    use crate::context::ExecutionContext;
    use crate::llm::ScriptedLlm;
    use crate::runner::{Agent, AgentError};

    #[test]
    fn parses_json_and_bare_labels() {
        let parsed = parse_intent("{\"scenario\": \"transfer\", \"reason\": \"send money\"}")
            .expect("json intent");
        assert_eq!(parsed.scenario, "TRANSFER");
        assert_eq!(parsed.reason.as_deref(), Some("send money"));

        assert_eq!(parse_intent("GENERAL.").expect("bare label").scenario, "GENERAL");
        assert_eq!(parse_intent("other").expect("alias").scenario, "GENERAL");
        assert!(parse_intent("{\"scenario\": \"LOAN\"}").is_none());
        assert!(parse_intent("{not json").is_none());
    }

    #[tokio::test]
    async fn unparseable_output_is_retryable() {
        let llm = Arc::new(ScriptedLlm::new(["I think they want a loan"]));
        let agent = IntentAgent::new(llm.clone());
        let ctx = ExecutionContext::new("s1", "hi", SessionState::default(), Memory::default());

        let error = agent.invoke(&ctx).await.expect_err("unknown label");
        assert!(error.is_retryable());

        llm.push_ok("```json\n{\"scenario\": \"TRANSFER\"}\n```");
        assert_eq!(agent.invoke(&ctx).await.expect("ok"), json!({"scenario": "TRANSFER"}));
        assert!(matches!(error, AgentError::Retryable(_)));
    }
}
