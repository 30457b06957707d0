use thiserror::Error;

/// Reasons a slot operation was rejected by the state manager.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("unknown slot `{slot}`")]
    UnknownSlot { slot: String },
    #[error("operation is missing a slot name")]
    MissingSlot,
    #[error("value {value} for `{slot}` could not be cast")]
    Cast { slot: String, value: String },
    #[error("value {value} for `{slot}` is not in the expected format")]
    Format { slot: String, value: String },
    #[error("value for `{slot}` failed validation")]
    Rule { slot: String },
}

impl SlotError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownSlot { .. } => "unknown_slot",
            Self::MissingSlot => "missing_slot",
            Self::Cast { .. } => "cast_failed",
            Self::Format { .. } => "format_failed",
            Self::Rule { .. } => "validation_failed",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("agent `{agent}` exhausted retries: {message}")]
    AgentExhausted { agent: String, message: String },
    #[error("agent `{agent}` failed: {message}")]
    AgentFatal { agent: String, message: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable { .. } => {
                "I couldn't reach the assistant just now. Please try again in a moment."
            }
            Self::Internal { .. } => "Something went wrong, please try again.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::AgentExhausted { agent, message } => Self::ServiceUnavailable {
                message: format!("{agent}: {message}"),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::AgentFatal { agent, message } => Self::Internal {
                message: format!("{agent}: {message}"),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Configuration(message) | ApplicationError::Internal(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, InterfaceError, SlotError};

    #[test]
    fn exhausted_agent_maps_to_service_unavailable() {
        let interface = ApplicationError::AgentExhausted {
            agent: "slot".to_owned(),
            message: "upstream timeout".to_owned(),
        }
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::ServiceUnavailable { ref correlation_id, ref message }
                if correlation_id == "req-1" && message == "slot: upstream timeout"
        ));
    }

    #[test]
    fn fatal_agent_error_has_generic_user_message() {
        let interface = ApplicationError::AgentFatal {
            agent: "execute".to_owned(),
            message: "panic in transfer backend".to_owned(),
        }
        .into_interface("req-2");

        assert_eq!(interface.user_message(), "Something went wrong, please try again.");
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn slot_errors_expose_stable_reason_codes() {
        assert_eq!(SlotError::MissingSlot.reason_code(), "missing_slot");
        assert_eq!(
            SlotError::Rule { slot: "amount".to_owned() }.reason_code(),
            "validation_failed"
        );
    }
}
