//! CLI error types.
//!
//! Configuration and usage errors exit with 64 (EX_USAGE); everything else
//! exits with 1. A completed backup run never produces a `CliError`: its
//! exit status is the failure count.

use std::fmt;

use crate::backup::errors::Severity;

/// Exit status for configuration and usage errors
pub const EXIT_USAGE: i32 = 64;

/// CLI error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration could not be loaded or is invalid
    ConfigError,
    /// Arguments are inconsistent
    UsageError,
    /// Summary or status records are unavailable
    StatusUnavailable,
    /// Operator declined the restore
    NotConfirmed,
    /// Restore failed
    RestoreFailed,
}

impl CliErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CliErrorCode::ConfigError => "STACKBACK_CLI_CONFIG_ERROR",
            CliErrorCode::UsageError => "STACKBACK_CLI_USAGE_ERROR",
            CliErrorCode::StatusUnavailable => "STACKBACK_CLI_STATUS_UNAVAILABLE",
            CliErrorCode::NotConfirmed => "STACKBACK_CLI_NOT_CONFIRMED",
            CliErrorCode::RestoreFailed => "STACKBACK_CLI_RESTORE_FAILED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            CliErrorCode::NotConfirmed => Severity::Warning,
            CliErrorCode::ConfigError => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliErrorCode::ConfigError | CliErrorCode::UsageError => EXIT_USAGE,
            _ => 1,
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, message)
    }

    pub fn usage_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::UsageError, message)
    }

    pub fn status_unavailable(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::StatusUnavailable, message)
    }

    pub fn not_confirmed(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::NotConfirmed, message)
    }

    pub fn restore_failed(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::RestoreFailed, message)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.as_str(), self.message)
    }
}

impl std::error::Error for CliError {}

/// Result type for CLI commands
pub type CliResult<T> = Result<T, CliError>;
