//! Failure classification.
//!
//! Priority, highest first:
//!
//! 1. `timeout`     - the wall-clock timeout fired
//! 2. `compression` - the compression step failed
//! 3. `disk_space`  - message mentions disk/space exhaustion
//! 4. `connection`  - message mentions connection/network trouble
//! 5. `other`
//!
//! Reordering these changes which category a record reports when several
//! signals are present at once.

use std::sync::OnceLock;

use regex::Regex;

use super::attempt::ErrorCategory;

/// Structured signals gathered while a unit was being backed up
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureSignals<'a> {
    /// The external timeout fired
    pub timed_out: bool,
    /// The compression step failed
    pub compression_failed: bool,
    /// Human-readable failure text (message plus diagnostics)
    pub message: &'a str,
}

impl<'a> FailureSignals<'a> {
    pub fn from_message(message: &'a str) -> Self {
        Self {
            message,
            ..Default::default()
        }
    }
}

fn disk_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)no space left|disk (is )?full|disk space|insufficient space|not enough space|quota exceeded|enospc",
        )
        .expect("disk pattern is valid")
    })
}

fn connection_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)connection|could not connect|could not translate host|network|unreachable|host name|server closed|no route to host|timeout expired|authentication failed",
        )
        .expect("connection pattern is valid")
    })
}

fn diagnostic_error_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(error|fatal|panic)\b").expect("diagnostic pattern is valid"))
}

/// Classify a failure
pub fn classify(signals: &FailureSignals<'_>) -> ErrorCategory {
    if signals.timed_out {
        ErrorCategory::Timeout
    } else if signals.compression_failed {
        ErrorCategory::Compression
    } else if disk_pattern().is_match(signals.message) {
        ErrorCategory::DiskSpace
    } else if connection_pattern().is_match(signals.message) {
        ErrorCategory::Connection
    } else {
        ErrorCategory::Other
    }
}

/// Whether a tool's diagnostic stream reports an error.
///
/// Checked even when the exit status is success.
pub fn diagnostics_report_error(stderr: &str) -> bool {
    diagnostic_error_pattern().is_match(stderr)
}

/// First few error-bearing lines of a diagnostic stream, for messages
pub fn summarize_diagnostics(stderr: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let error_lines: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| diagnostic_error_pattern().is_match(l))
        .take(max_lines)
        .collect();

    if error_lines.is_empty() {
        lines.into_iter().take(max_lines).collect::<Vec<_>>().join("; ")
    } else {
        error_lines.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_wins_over_everything() {
        let signals = FailureSignals {
            timed_out: true,
            compression_failed: true,
            message: "No space left on device; connection refused",
        };
        assert_eq!(classify(&signals), ErrorCategory::Timeout);
    }

    #[test]
    fn test_compression_wins_over_message() {
        let signals = FailureSignals {
            timed_out: false,
            compression_failed: true,
            message: "write failed: No space left on device",
        };
        assert_eq!(classify(&signals), ErrorCategory::Compression);
    }

    #[test]
    fn test_disk_wins_over_connection() {
        let msg = "connection ok but could not write: No space left on device";
        assert_eq!(classify(&FailureSignals::from_message(msg)), ErrorCategory::DiskSpace);
        assert_eq!(
            classify(&FailureSignals::from_message("Insufficient disk space: need 2 GiB")),
            ErrorCategory::DiskSpace
        );
    }

    #[test]
    fn test_connection_messages() {
        for msg in [
            "pg_dump: error: connection to server at \"db\" (10.0.0.2), port 5432 failed: Connection refused",
            "could not translate host name \"postgres\" to address",
            "FATAL: password authentication failed for user \"backup\"",
        ] {
            assert_eq!(classify(&FailureSignals::from_message(msg)), ErrorCategory::Connection, "{msg}");
        }
    }

    #[test]
    fn test_other() {
        let msg = "pg_dump: error: query failed: ERROR: permission denied for table secrets";
        assert_eq!(classify(&FailureSignals::from_message(msg)), ErrorCategory::Other);
    }

    #[test]
    fn test_diagnostics_trusted_over_exit_code() {
        assert!(diagnostics_report_error("pg_dump: error: aborting because of server version mismatch"));
        assert!(diagnostics_report_error("FATAL:  database \"x\" does not exist"));
        assert!(!diagnostics_report_error("pg_dump: warning: there are circular foreign-key constraints"));
        assert!(!diagnostics_report_error(""));
    }

    #[test]
    fn test_summarize_diagnostics_prefers_error_lines() {
        let stderr = "pg_dump: warning: something\npg_dump: error: bad thing\n\npg_dump: error: worse\n";
        assert_eq!(summarize_diagnostics(stderr, 5), "pg_dump: error: bad thing; pg_dump: error: worse");
        assert_eq!(summarize_diagnostics("just noise\nmore", 1), "just noise");
    }
}
