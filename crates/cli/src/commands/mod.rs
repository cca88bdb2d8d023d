pub mod chat;
pub mod config;
pub mod migrate;
pub mod prd;
pub mod research;

mod bootstrap;

use serde::Serialize;
use serde_json::Value;

use brainstorm_core::errors::{ApplicationError, ErrorClass};

pub use bootstrap::init_logging;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DB: u8 = 4;
pub const EXIT_MIGRATION: u8 = 5;
pub const EXIT_BAD_REQUEST: u8 = 6;
pub const EXIT_NOT_FOUND: u8 = 7;
pub const EXIT_UNAVAILABLE: u8 = 8;
pub const EXIT_INTERNAL: u8 = 9;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::emit(0, CommandOutcome::new(command, "ok", None, message.into()))
    }

    pub fn success_with(command: &str, message: impl Into<String>, details: Value) -> Self {
        let outcome = CommandOutcome::new(command, "ok", None, message.into());
        Self::emit(0, CommandOutcome { details: Some(details), ..outcome })
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let outcome = CommandOutcome::new(command, "error", Some(error_class), message.into());
        Self::emit(exit_code, outcome)
    }

    /// Maps an application failure onto its error class and exit code.
    pub fn from_application_error(
        command: &str,
        error: ApplicationError,
        correlation_id: &str,
    ) -> Self {
        let interface = error.into_interface(correlation_id);
        let exit_code = match interface.class {
            ErrorClass::BadRequest => EXIT_BAD_REQUEST,
            ErrorClass::NotFound => EXIT_NOT_FOUND,
            ErrorClass::ServiceUnavailable => EXIT_UNAVAILABLE,
            ErrorClass::Internal => EXIT_INTERNAL,
        };
        let message = format!("{} ({})", interface.user_message(), interface.message);
        let outcome = CommandOutcome {
            correlation_id: Some(interface.correlation_id),
            ..CommandOutcome::new(command, "error", Some(interface.class.code()), message)
        };
        Self::emit(exit_code, outcome)
    }

    fn emit(exit_code: u8, outcome: CommandOutcome) -> Self {
        let output = serde_json::to_string(&outcome).unwrap_or_else(|error| {
            serde_json::json!({
                "command": outcome.command,
                "status": "error",
                "error_class": "serialization",
                "message": error.to_string(),
            })
            .to_string()
        });
        Self { exit_code, output }
    }
}

impl CommandOutcome {
    fn new(command: &str, status: &str, error_class: Option<&str>, message: String) -> Self {
        Self {
            command: command.to_string(),
            status: status.to_string(),
            error_class: error_class.map(str::to_string),
            message,
            correlation_id: None,
            details: None,
        }
    }
}
