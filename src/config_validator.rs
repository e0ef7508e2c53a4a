//! Configuration Validation
//!
//! Validates the whole configuration at startup and collects every problem,
//! so an operator sees all of them at once. Invalid configuration aborts
//! before any backup work starts.

use std::path::Path;

use crate::backup::scheduler::BackupScheduler;

/// Configuration validation errors
#[derive(Debug)]
pub struct ConfigValidationError {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid configuration for '{}': {} (value: {})",
            self.field, self.message, self.value
        )
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of config validation
pub type ConfigResult<T> = Result<T, Vec<ConfigValidationError>>;

/// Configuration validator
pub struct ConfigValidator {
    errors: Vec<ConfigValidationError>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn error(&mut self, field: &str, value: impl std::fmt::Display, message: &str) {
        self.errors.push(ConfigValidationError {
            field: field.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        });
    }

    /// Validate port number (1-65535)
    pub fn validate_port(&mut self, field: &str, port: u16) -> &mut Self {
        if port == 0 {
            self.error(field, port, "Port must be between 1 and 65535");
        }
        self
    }

    /// Validate positive integer
    pub fn validate_positive(&mut self, field: &str, value: i64) -> &mut Self {
        if value <= 0 {
            self.error(field, value, "Value must be positive");
        }
        self
    }

    /// Validate non-negative integer
    pub fn validate_non_negative(&mut self, field: &str, value: i64) -> &mut Self {
        if value < 0 {
            self.error(field, value, "Value must be non-negative");
        }
        self
    }

    /// Validate non-empty string
    pub fn validate_non_empty(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.error(field, value, "Value cannot be empty");
        }
        self
    }

    /// Validate an absolute path
    pub fn validate_absolute(&mut self, field: &str, path: &Path) -> &mut Self {
        if !path.as_os_str().is_empty() && !path.is_absolute() {
            self.error(field, path.display(), "Path must be absolute");
        }
        self
    }

    /// Validate path is a directory when it exists
    pub fn validate_is_directory(&mut self, field: &str, path: &Path) -> &mut Self {
        if path.exists() && !path.is_dir() {
            self.error(field, path.display(), "Path is not a directory");
        }
        self
    }

    /// Validate URL format (empty means unset)
    pub fn validate_url(&mut self, field: &str, value: &str) -> &mut Self {
        if !value.is_empty() && !value.starts_with("http://") && !value.starts_with("https://") {
            self.error(field, value, "URL must start with http:// or https://");
        }
        self
    }

    /// Validate a five-field cron expression
    pub fn validate_schedule(&mut self, field: &str, expression: &str) -> &mut Self {
        if let Err(e) = BackupScheduler::new(expression) {
            self.error(field, expression, e.message());
        }
        self
    }

    /// Record a value that could not be parsed at all
    pub fn invalid(&mut self, field: &str, value: &str, message: &str) -> &mut Self {
        self.error(field, value, message);
        self
    }

    /// Finish validation and return result
    pub fn finish(self) -> ConfigResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    /// Check if any errors occurred
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Get current errors
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Format validation errors for display
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_validation() {
        let mut v = ConfigValidator::new();
        v.validate_port("postgres.port", 5432);
        assert!(v.finish().is_ok());

        let mut v = ConfigValidator::new();
        v.validate_port("postgres.port", 0);
        assert!(v.finish().is_err());
    }

    #[test]
    fn test_schedule_validation() {
        let mut v = ConfigValidator::new();
        v.validate_schedule("schedule", "0 3 * * *");
        assert!(!v.has_errors());

        v.validate_schedule("schedule", "0 3 * *");
        v.validate_schedule("schedule", "99 3 * * *");
        assert_eq!(v.errors().len(), 2);
        assert_eq!(v.errors()[0].field, "schedule");
    }

    #[test]
    fn test_multiple_errors() {
        let mut v = ConfigValidator::new();
        v.validate_port("rabbitmq.management_port", 0)
            .validate_positive("dump_timeout_secs", 0)
            .validate_non_negative("retention.daily", -1)
            .validate_non_empty("backup_root", " ")
            .validate_url("notify_target", "hooks.example.com");

        let errors = v.finish().unwrap_err();
        assert_eq!(errors.len(), 5);
        let shown = format_validation_errors(&errors);
        assert!(shown.contains("'notify_target'"));
        assert_eq!(shown.lines().count(), 5);
    }

    #[test]
    fn test_relative_path_rejected() {
        let mut v = ConfigValidator::new();
        v.validate_absolute("backup_root", Path::new("backups"))
            .validate_absolute("scratch_dir", Path::new("/tmp/stage"));
        assert_eq!(v.errors().len(), 1);
    }
}
