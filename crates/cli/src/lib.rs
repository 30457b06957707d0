pub mod commands;
pub mod offline;

use std::io::{self, BufRead, IsTerminal};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use remit_core::config::{AppConfig, LoadOptions, LogFormat};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(
    name = "remit",
    about = "Remit transfer assistant operator CLI",
    long_about = "Inspect configuration, run readiness checks, and drive conversation turns \
                  against the offline model.",
    after_help = "Examples:\n  remit doctor --json\n  remit config\n  remit chat -m \"send 50000 to Alice\" -m yes"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, LLM provider readiness, and engine wiring")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Run conversation turns against the offline model (reads stdin without -m)")]
    Chat {
        #[arg(long, default_value = "cli", help = "Session id shared by every turn")]
        session: String,
        #[arg(short, long = "message", help = "User message, repeat for several turns")]
        messages: Vec<String>,
        #[arg(long, help = "Emit one JSON payload per turn")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Chat { session, mut messages, json } => {
            if messages.is_empty() {
                messages = read_stdin_messages();
            }
            commands::chat::run(&session, &messages, json)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_logging() {
    let Ok(config) = AppConfig::load(LoadOptions::default()) else {
        return;
    };
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn read_stdin_messages() -> Vec<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Vec::new();
    }
    stdin
        .lock()
        .lines()
        .map_while(Result::ok)
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
