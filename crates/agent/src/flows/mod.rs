pub mod handlers;
pub mod messages;
pub mod router;

pub use handlers::{
    DefaultFlowHandler, FlowHandler, FlowServices, TransferFlowHandler, TRANSFER_COMPLETED_HOOK,
};
pub use router::{FlowRouter, ScenarioRouter, DEFAULT_FLOW, TRANSFER_FLOW};
