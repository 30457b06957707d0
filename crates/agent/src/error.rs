use remit_core::errors::{ApplicationError, InterfaceError};
use thiserror::Error;

use crate::runner::AgentError;

/// Failure that escaped a flow handler.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Application(#[from] ApplicationError),
    #[error("agent `{agent}` returned malformed output: {message}")]
    MalformedOutput { agent: String, message: String },
    #[error("no handler registered for flow `{0}`")]
    UnknownFlow(String),
    #[error("turn task stopped unexpectedly: {0}")]
    Aborted(String),
}

impl TurnError {
    pub fn into_application(self) -> ApplicationError {
        match self {
            Self::Agent(error) => error.into(),
            Self::Application(error) => error,
            Self::MalformedOutput { agent, message } => {
                ApplicationError::AgentExhausted { agent, message }
            }
            Self::UnknownFlow(flow) => {
                ApplicationError::Configuration(format!("no handler for flow `{flow}`"))
            }
            Self::Aborted(message) => ApplicationError::Internal(message),
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        self.into_application().into_interface(correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use remit_core::errors::InterfaceError;

    use crate::error::TurnError;
    use crate::runner::AgentError;

    #[test]
    fn exhausted_agent_becomes_service_unavailable() {
        let error = TurnError::from(AgentError::RetryableExhausted {
            agent: "slot".to_owned(),
            attempts: 2,
            last_error: "timeout_exceeded".to_owned(),
        });

        let interface = error.into_interface("s1");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "s1");
    }

    #[test]
    fn unknown_flow_is_internal() {
        let interface = TurnError::UnknownFlow("x".to_owned()).into_interface("s2");
        assert_eq!(interface.user_message(), "Something went wrong, please try again.");
    }

    #[test]
    fn aborted_turn_is_internal_not_unavailable() {
        let interface = TurnError::Aborted("task panicked".to_owned()).into_interface("s3");
        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "Something went wrong, please try again.");
    }
}
