//! Backup attempt records.
//!
//! One `BackupAttempt` describes the outcome of the most recent backup of one
//! unit: a whole service, or a single database within the relational engine.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use super::{RunContext, ServiceKind};

/// Value written to `backup_file` when no artifact was produced
pub const NO_ARTIFACT: &str = "none";

/// Outcome of an attempt as stored in status records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
    /// Missing, unreadable, or unrecognised record
    #[serde(other)]
    Unknown,
}

impl Outcome {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
            Outcome::Unknown => "unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure taxonomy.
///
/// Variant order is classification priority, highest first; see
/// [`super::classify::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Compression,
    DiskSpace,
    Connection,
    Other,
    /// No per-database breakdown exists (catalog query failed)
    Unknown,
}

impl ErrorCategory {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Compression => "compression",
            ErrorCategory::DiskSpace => "disk_space",
            ErrorCategory::Connection => "connection",
            ErrorCategory::Other => "other",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit of work an attempt describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// A whole service (also used for the engine-level aggregate)
    Service(ServiceKind),
    /// One database within the relational engine
    Database(String),
}

impl Unit {
    pub fn service(&self) -> ServiceKind {
        match self {
            Unit::Service(service) => *service,
            Unit::Database(_) => ServiceKind::Postgresql,
        }
    }

    pub fn database(&self) -> Option<&str> {
        match self {
            Unit::Service(_) => None,
            Unit::Database(name) => Some(name),
        }
    }

    /// Status record file name for this unit
    pub fn record_file_name(&self) -> String {
        match self {
            Unit::Service(service) => format!("{}_last_backup.json", service),
            Unit::Database(name) => format!("postgresql_{}_last_backup.json", escape_file_component(name)),
        }
    }
}

/// Whether a database name can be used as-is in artifact and sidecar names
pub fn is_safe_database_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.chars().any(is_path_char)
}

fn is_path_char(c: char) -> bool {
    matches!(c, '/' | '\\' | '\0')
}

/// `name` with path separators and NUL replaced by `_`
pub fn escape_file_component(name: &str) -> String {
    name.chars().map(|c| if is_path_char(c) { '_' } else { c }).collect()
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Service(service) => write!(f, "{}", service),
            Unit::Database(name) => write!(f, "postgresql/{}", name),
        }
    }
}

/// One backup attempt for one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupAttempt {
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub status: Outcome,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub backup_date: String,
    #[serde(default = "no_artifact")]
    pub backup_file: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub size_bytes: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub duration_seconds: u64,
}

fn no_artifact() -> String {
    NO_ARTIFACT.to_string()
}

impl BackupAttempt {
    /// Build an attempt; size and duration are normalised here and nowhere else
    fn build(
        unit: &Unit,
        ctx: &RunContext,
        status: Outcome,
        message: impl Into<String>,
        artifact: Option<&Path>,
        size_bytes: Option<u64>,
        duration: Duration,
    ) -> Self {
        Self {
            service: unit.service().as_str().to_string(),
            database: unit.database().map(str::to_string),
            status,
            message: message.into(),
            error_category: None,
            error_detail: None,
            timestamp: RunContext::now_rfc3339(),
            backup_date: ctx.backup_date.format("%Y-%m-%d").to_string(),
            backup_file: artifact
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(no_artifact),
            size_bytes: size_bytes.unwrap_or(0),
            duration_seconds: duration.as_secs(),
        }
    }

    /// A successful attempt that produced `artifact`
    pub fn success(
        unit: &Unit,
        ctx: &RunContext,
        message: impl Into<String>,
        artifact: &Path,
        size_bytes: u64,
        duration: Duration,
    ) -> Self {
        Self::build(unit, ctx, Outcome::Success, message, Some(artifact), Some(size_bytes), duration)
    }

    /// A failed attempt
    pub fn failure(
        unit: &Unit,
        ctx: &RunContext,
        category: ErrorCategory,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        let mut attempt = Self::build(unit, ctx, Outcome::Failed, message, None, None, duration);
        attempt.error_category = Some(category);
        attempt
    }

    /// Attach a detailed error description
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if !detail.trim().is_empty() {
            self.error_detail = Some(detail);
        }
        self
    }

    /// Replace the reported size (used for engine-level aggregates)
    pub fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The unit this record belongs to
    pub fn unit(&self) -> Option<Unit> {
        let service = ServiceKind::parse(&self.service)?;
        Some(match &self.database {
            Some(db) if service == ServiceKind::Postgresql => Unit::Database(db.clone()),
            _ => Unit::Service(service),
        })
    }
}

/// Accept any JSON value for a count; non-numeric, negative, or fractional
/// garbage becomes 0, fractional values are truncated.
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(normalize_count(&value))
}

/// Normalise a loosely typed count to a non-negative integer
pub fn normalize_count(value: &serde_json::Value) -> u64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse::<u64>().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::RetentionPolicy;
    use chrono::{Local, TimeZone};
    use serde_json::json;

    fn ctx() -> RunContext {
        let at = Local.with_ymd_and_hms(2026, 10, 20, 3, 0, 0).earliest().unwrap();
        RunContext::new(at, "/backups", None, RetentionPolicy::default())
    }

    #[test]
    fn test_record_file_names() {
        assert_eq!(
            Unit::Service(ServiceKind::Rabbitmq).record_file_name(),
            "rabbitmq_last_backup.json"
        );
        assert_eq!(
            Unit::Database("app_db".into()).record_file_name(),
            "postgresql_app_db_last_backup.json"
        );
        assert_eq!(
            Unit::Database("../../etc/x".into()).record_file_name(),
            "postgresql_.._.._etc_x_last_backup.json"
        );
    }

    #[test]
    fn test_database_name_safety() {
        for name in ["app_db", "error", "fatal", "my db", "a..b"] {
            assert!(is_safe_database_name(name), "{}", name);
        }
        for name in ["", ".", "..", ".hidden", "a/b", "../x", "a\\b", "nul\0"] {
            assert!(!is_safe_database_name(name), "{:?}", name);
        }
    }

    #[test]
    fn test_failure_has_no_artifact() {
        let attempt = BackupAttempt::failure(
            &Unit::Database("metrics_db".into()),
            &ctx(),
            ErrorCategory::Timeout,
            "pg_dump timed out",
            Duration::from_millis(2500),
        );
        assert_eq!(attempt.service, "postgresql");
        assert_eq!(attempt.database.as_deref(), Some("metrics_db"));
        assert_eq!(attempt.backup_file, NO_ARTIFACT);
        assert_eq!(attempt.size_bytes, 0);
        assert_eq!(attempt.duration_seconds, 2);
        assert_eq!(attempt.backup_date, "2026-10-20");
        assert_eq!(attempt.error_category, Some(ErrorCategory::Timeout));
    }

    #[test]
    fn test_serialized_shape() {
        let attempt = BackupAttempt::success(
            &Unit::Service(ServiceKind::Loki),
            &ctx(),
            "Backup completed",
            Path::new("/backups/loki/daily/backup-x.tar.gz"),
            1024,
            Duration::from_secs(3),
        );
        let value = serde_json::to_value(&attempt).unwrap();
        assert_eq!(value["service"], "loki");
        assert_eq!(value["status"], "success");
        assert_eq!(value["size_bytes"], 1024);
        assert!(value.get("database").is_none());
        assert!(value.get("error_category").is_none());
    }

    #[test]
    fn test_malformed_counts_normalize_to_zero() {
        let raw = json!({
            "service": "grafana",
            "status": "success",
            "message": "ok",
            "timestamp": "",
            "backup_date": "",
            "backup_file": "x",
            "size_bytes": "",
            "duration_seconds": -4
        });
        let attempt: BackupAttempt = serde_json::from_value(raw).unwrap();
        assert_eq!(attempt.size_bytes, 0);
        assert_eq!(attempt.duration_seconds, 0);

        assert_eq!(normalize_count(&json!("42")), 42);
        assert_eq!(normalize_count(&json!(12.9)), 12);
        assert_eq!(normalize_count(&json!(null)), 0);
        assert_eq!(normalize_count(&json!("12abc")), 0);
    }

    #[test]
    fn test_unrecognised_status_is_unknown() {
        let raw = json!({"service": "loki", "status": "running"});
        let attempt: BackupAttempt = serde_json::from_value(raw).unwrap();
        assert_eq!(attempt.status, Outcome::Unknown);
        assert_eq!(attempt.backup_file, NO_ARTIFACT);
    }

    #[test]
    fn test_category_priority_order() {
        assert!(ErrorCategory::Timeout < ErrorCategory::Compression);
        assert!(ErrorCategory::Compression < ErrorCategory::DiskSpace);
        assert!(ErrorCategory::DiskSpace < ErrorCategory::Connection);
        assert!(ErrorCategory::Connection < ErrorCategory::Other);
        assert_eq!(serde_json::to_value(ErrorCategory::DiskSpace).unwrap(), "disk_space");
    }
}
