use std::sync::Arc;

use remit_agent::{EngineBuilder, TurnReply};
use remit_core::config::{AppConfig, LoadOptions};
use serde_json::json;

use crate::commands::{escape_json, runtime, CommandResult, EXIT_CONFIG, EXIT_RUNTIME};
use crate::offline::OfflineLlm;

/// Runs `messages` as consecutive turns of one session and renders the transcript.
pub fn run(session_id: &str, messages: &[String], json_output: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("chat", "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };
    if messages.is_empty() {
        return CommandResult::failure("chat", "no_input", "no messages to send", EXIT_RUNTIME);
    }

    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            )
        }
    };

    let orchestrator = EngineBuilder::new(config, Arc::new(OfflineLlm)).build();
    let replies: Vec<TurnReply> = runtime.block_on(async {
        let mut replies = Vec::with_capacity(messages.len());
        for message in messages {
            replies.push(orchestrator.handle(session_id, message).await);
        }
        replies
    });

    let lines: Vec<String> = messages
        .iter()
        .zip(&replies)
        .enumerate()
        .flat_map(|(index, (message, reply))| {
            if json_output {
                vec![render_json(index + 1, message, reply)]
            } else {
                render_human(message, reply)
            }
        })
        .collect();

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn render_json(turn: usize, message: &str, reply: &TurnReply) -> String {
    let line = json!({ "turn": turn, "user": message, "payload": reply.payload });
    serde_json::to_string(&line).unwrap_or_else(|error| {
        format!("{{\"turn\":{turn},\"error\":\"{}\"}}", escape_json(&error.to_string()))
    })
}

fn render_human(message: &str, reply: &TurnReply) -> Vec<String> {
    let mut lines = vec![format!("you> {message}"), format!("remit> {}", reply.payload.message)];
    let buttons = &reply.payload.ui_hint.buttons;
    if !buttons.is_empty() {
        lines.push(format!("       [{}]", buttons.join("] [")));
    }
    for hook in &reply.hooks {
        lines.push(format!("       hook: {}", hook.kind));
    }
    lines
}
