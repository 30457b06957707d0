use std::sync::Arc;

use remit_agent::EngineBuilder;
use remit_core::config::{AppConfig, LlmProvider, LoadOptions};
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::commands::{escape_json, runtime, CommandResult, EXIT_CONFIG};
use crate::offline::OfflineLlm;

const CHECK_SESSION: &str = "doctor-check";
const CHECK_MESSAGE: &str = "hello";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_CONFIG };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_llm_provider(&config));
            checks.push(check_engine_wiring(config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["llm_provider_readiness", "engine_wiring"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_llm_provider(config: &AppConfig) -> DoctorCheck {
    let llm = &config.llm;
    let has_key =
        llm.api_key.as_ref().is_some_and(|key| !key.expose_secret().trim().is_empty());
    let details = match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic if has_key => {
            format!("{:?} model `{}` with api key present", llm.provider, llm.model)
        }
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            return DoctorCheck {
                name: "llm_provider_readiness",
                status: CheckStatus::Fail,
                details: format!("{:?} requires llm.api_key", llm.provider),
            };
        }
        LlmProvider::Ollama => format!(
            "ollama model `{}` at `{}`",
            llm.model,
            llm.base_url.as_deref().unwrap_or("<unset>")
        ),
        LlmProvider::Offline => "offline keyword model, no network access needed".to_string(),
    };

    DoctorCheck { name: "llm_provider_readiness", status: CheckStatus::Pass, details }
}

/// Drives one turn through the full engine against the offline model.
fn check_engine_wiring(config: AppConfig) -> DoctorCheck {
    let runtime = match runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "engine_wiring",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let orchestrator = EngineBuilder::new(config, Arc::new(OfflineLlm)).build();
    let reply = runtime.block_on(orchestrator.handle(CHECK_SESSION, CHECK_MESSAGE));

    if reply.payload.message.trim().is_empty() {
        return DoctorCheck {
            name: "engine_wiring",
            status: CheckStatus::Fail,
            details: "check turn produced an empty reply".to_string(),
        };
    }
    DoctorCheck {
        name: "engine_wiring",
        status: CheckStatus::Pass,
        details: format!(
            "check turn answered with next_action {}",
            reply.payload.next_action.as_str()
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
