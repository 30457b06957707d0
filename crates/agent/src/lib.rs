//! Turn execution engine for the transfer assistant.
//!
//! One user message in, one terminal reply out:
//! 1. **Orchestration** (`orchestrator`) - load the session, classify intent unless the
//!    session is mid-flow, route to a flow, persist and fire hooks
//! 2. **Flows** (`flows`) - the transfer state machine and small talk
//! 3. **Agents** (`agents`, `runner`) - LLM calls behind a retry/timeout/schema policy
//! 4. **Memory** (`memory`) - rolling history with summarization
//!
//! # Safety Principle
//!
//! The LLM only proposes slot operations. Validation, stage transitions, confirmation and
//! execution are decided by deterministic code in `remit-core` and the flow handlers.

pub mod agents;
pub mod builder;
pub mod context;
pub mod conversation;
pub mod error;
pub mod events;
pub mod flows;
pub mod guardrails;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod runner;
pub mod session;

pub use builder::EngineBuilder;
pub use context::ExecutionContext;
pub use error::TurnError;
pub use events::{DonePayload, EventSink, NextAction, TurnEvent};
pub use llm::{LlmClient, ScriptedLlm};
pub use orchestrator::{TurnOrchestrator, TurnReply};
pub use runner::{Agent, AgentError, AgentPolicy, Runner};
pub use session::{CompletedStore, InMemorySessionStore, SessionStore};
