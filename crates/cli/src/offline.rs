//! Keyword-driven stand-in for a hosted model, used by `chat` and `doctor`.
//!
//! It answers each agent prompt with the JSON shape that agent expects, so the whole
//! turn pipeline can be exercised without network access.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use remit_agent::agents::prompts::{
    GENERAL_SYSTEM_PROMPT, INTENT_SYSTEM_PROMPT, INTERACTION_SYSTEM_PROMPT, SLOT_SYSTEM_PROMPT,
    SUMMARY_SYSTEM_PROMPT,
};
use remit_agent::conversation::parse_amount_text;
use remit_agent::llm::LlmClient;
use remit_core::memory::{ChatMessage, Role};
use serde_json::{json, Value};

const TRANSFER_KEYWORDS: [&str; 6] = ["send", "transfer", "wire", "pay", "remit", "money"];

#[derive(Debug, Default)]
pub struct OfflineLlm;

#[async_trait]
impl LlmClient for OfflineLlm {
    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<String> {
        let user = last_user_message(messages);
        let reply = match system_prompt {
            INTENT_SYSTEM_PROMPT => classify(user),
            SLOT_SYSTEM_PROMPT => extract(user),
            INTERACTION_SYSTEM_PROMPT => ask_for_missing(messages),
            GENERAL_SYSTEM_PROMPT => json!({
                "action": "DONE",
                "message": "I'm running offline. I can help you send money, \
                            for example: send 50000 to Alice.",
            }),
            SUMMARY_SYSTEM_PROMPT => {
                let lines = user.lines().filter(|line| line.contains(": ")).count();
                return Ok(format!("Earlier conversation of {lines} messages about transfers."));
            }
            _ => return Err(anyhow!("offline model has no reply for this prompt")),
        };
        Ok(reply.to_string())
    }
}

fn last_user_message(messages: &[ChatMessage]) -> &str {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map(|message| message.content.as_str())
        .unwrap_or_default()
}

fn classify(text: &str) -> Value {
    let lowered = text.to_ascii_lowercase();
    let transfer = words(&lowered).any(|word| TRANSFER_KEYWORDS.contains(&word));
    if transfer {
        json!({"scenario": "TRANSFER", "reason": "transfer keyword"})
    } else {
        json!({"scenario": "GENERAL", "reason": "no transfer keyword"})
    }
}

/// Picks up `to <Name>` and the first number in the message.
fn extract(text: &str) -> Value {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut operations = Vec::new();

    let target = tokens
        .windows(2)
        .find(|pair| pair[0].eq_ignore_ascii_case("to"))
        .map(|pair| trim_punctuation(pair[1]))
        .filter(|name| name.chars().next().is_some_and(char::is_alphabetic));
    if let Some(target) = target {
        operations.push(json!({"op": "set", "slot": "target", "value": target}));
    }

    let amount = tokens.iter().find_map(|token| parse_amount_text(trim_punctuation(token)));
    if let Some(amount) = amount {
        operations.push(json!({"op": "set", "slot": "amount", "value": amount}));
    }

    json!({ "operations": operations })
}

fn ask_for_missing(messages: &[ChatMessage]) -> Value {
    let missing = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .flat_map(|message| message.content.lines())
        .find_map(|line| line.strip_prefix("missing: "));

    match missing {
        Some(missing) => json!({"action": "ASK", "message": format!("Please tell me the {missing}.")}),
        None => json!({"action": "ASK", "message": "Is there anything you want to change?"}),
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|character: char| !character.is_alphanumeric()).filter(|word| !word.is_empty())
}

fn trim_punctuation(token: &str) -> &str {
    token.trim_matches(|character: char| matches!(character, '.' | ',' | '!' | '?' | ';' | ':'))
}

#[cfg(test)]
mod tests {
    use remit_agent::agents::prompts::{
        INTENT_SYSTEM_PROMPT, INTERACTION_SYSTEM_PROMPT, SLOT_SYSTEM_PROMPT,
    };
    use remit_agent::llm::LlmClient;
    use remit_core::memory::ChatMessage;
    use serde_json::Value;

    use super::OfflineLlm;

    async fn reply(system_prompt: &str, messages: &[ChatMessage]) -> Value {
        let text = OfflineLlm.complete(system_prompt, messages).await.expect("offline reply");
        serde_json::from_str(&text).expect("offline reply should be JSON")
    }

    #[tokio::test]
    async fn intent_follows_transfer_keywords() {
        let transfer = reply(INTENT_SYSTEM_PROMPT, &[ChatMessage::user("Send money to Bob")]).await;
        assert_eq!(transfer["scenario"], "TRANSFER");

        let general = reply(INTENT_SYSTEM_PROMPT, &[ChatMessage::user("what's up?")]).await;
        assert_eq!(general["scenario"], "GENERAL");
    }

    #[tokio::test]
    async fn extraction_reads_recipient_and_amount() {
        let delta =
            reply(SLOT_SYSTEM_PROMPT, &[ChatMessage::user("send 50,000 to Alice.")]).await;
        let operations = delta["operations"].as_array().expect("operations array");
        assert_eq!(operations.len(), 2);
        assert_eq!(operations[0]["slot"], "target");
        assert_eq!(operations[0]["value"], "Alice");
        assert_eq!(operations[1]["slot"], "amount");
        assert_eq!(operations[1]["value"], 50_000);
    }

    #[tokio::test]
    async fn interaction_asks_for_missing_slots_from_context() {
        let messages = [
            ChatMessage::system("## Current state\nstage: FILLING\nmissing: amount"),
            ChatMessage::user("to Alice"),
        ];
        let result = reply(INTERACTION_SYSTEM_PROMPT, &messages).await;
        assert_eq!(result["action"], "ASK");
        assert_eq!(result["message"], "Please tell me the amount.");
    }

    #[tokio::test]
    async fn unknown_prompt_is_an_error() {
        assert!(OfflineLlm.complete("something else", &[]).await.is_err());
    }
}
