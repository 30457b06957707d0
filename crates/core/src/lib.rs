pub mod audit;
pub mod config;
pub mod errors;
pub mod flows;
pub mod memory;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use errors::{ApplicationError, InterfaceError, SlotError};
pub use flows::{Delta, Operation, SessionState, SlotName, Slots, Stage, StateManager};
pub use memory::{ChatMessage, Memory, Role};
