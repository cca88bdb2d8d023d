use std::fmt;

use thiserror::Error;

use crate::graph::GraphTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    GraphTransition(#[from] GraphTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no session checkpoint for thread `{0}`")]
    NoSession(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// What an operator-facing surface reports. Every [`ApplicationError`] falls in exactly one class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    BadRequest,
    NotFound,
    ServiceUnavailable,
    Internal,
}

impl ErrorClass {
    pub fn code(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::NotFound => "not_found",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Internal => "internal",
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::BadRequest => "The request could not be processed. Check inputs and try again.",
            Self::NotFound => {
                "No conversation exists for that user and session. Start a new session first."
            }
            Self::ServiceUnavailable => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal => "An unexpected internal error occurred.",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{class}: {message} [{correlation_id}]")]
pub struct InterfaceError {
    pub class: ErrorClass,
    pub message: String,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        self.class.user_message()
    }
}

impl ApplicationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Domain(_) => ErrorClass::BadRequest,
            Self::NoSession(_) => ErrorClass::NotFound,
            Self::Persistence(_) | Self::Integration(_) => ErrorClass::ServiceUnavailable,
            Self::Configuration(_) => ErrorClass::Internal,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        InterfaceError {
            class: self.class(),
            message: self.to_string(),
            correlation_id: correlation_id.into(),
        }
    }
}
