use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid value for parameter `{parameter}`: {message}")]
    SlotValidation { parameter: String, message: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// Session state could not be read or written; the turn fails whole,
    /// with no partial persistence.
    #[error("session storage unavailable: {0}")]
    Storage(String),
    #[error("collaborator failure: {0}")]
    Collaborator(String),
    /// Unknown action template or similar misconfiguration. Never
    /// user-caused.
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// The only wording that may reach a user from this layer. Internal
    /// codes and collaborator identities stay out of it.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "I couldn't make sense of that request. Could you rephrase it?"
            }
            Self::ServiceUnavailable { .. } => {
                "I'm temporarily unavailable. Please try again in a moment."
            }
            Self::Internal { .. } => "Something went wrong on my side. Please try again.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(_) => Self::BadRequest {
                message: "turn validation failed".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Storage(message) | ApplicationError::Collaborator(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn slot_validation_maps_to_bad_request() {
        let interface = ApplicationError::from(DomainError::SlotValidation {
            parameter: "size".to_owned(),
            message: "expected one of: s, m, l".to_owned(),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref correlation_id, .. } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn storage_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Storage("sqlite lock timeout".to_owned()).into_interface("req-2");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "I'm temporarily unavailable. Please try again in a moment."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal_with_generic_wording() {
        let interface =
            ApplicationError::Configuration("unknown action template `ship_pony`".to_owned())
                .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "Something went wrong on my side. Please try again.");
    }
}
