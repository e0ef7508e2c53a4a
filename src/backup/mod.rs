//! # Backup Module
//!
//! Per-service backup backends, the relational dump backend, the staging
//! relay, retention, and scheduling.
//!
//! # Artifact layout
//!
//! ```text
//! {root}/
//! ├── rabbitmq/{daily|weekly}/backup-{ts}.tar.gz
//! ├── rabbitmq/{daily|weekly}/definitions-{ts}.json
//! ├── loki/{daily|weekly}/backup-{ts}.tar.gz
//! ├── grafana/{daily|weekly}/backup-{ts}.tar.gz
//! ├── postgresql/{daily|weekly}/{database}-{ts}.sql.gz
//! ├── postgresql/errors/{database}_error.log
//! └── status/*.json
//! ```
//!
//! The daily/weekly partition is chosen solely by the weekday of the run.

pub mod archive;
pub mod attempt;
pub mod classify;
pub mod definitions;
pub mod errors;
pub mod integrity;
pub mod monitor;
pub mod postgres;
pub mod retention;
pub mod scheduler;
pub mod staging;

pub use attempt::{escape_file_component, is_safe_database_name, BackupAttempt, ErrorCategory, Outcome, Unit};
pub use errors::{BackupError, BackupErrorCode, BackupResult};

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, NaiveDate, SecondsFormat, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// The weekday whose runs land in the weekly partition
pub const WEEKLY_WEEKDAY: Weekday = Weekday::Sun;

/// Name of the status directory under the backup root
pub const STATUS_DIR_NAME: &str = "status";

/// Name of the error-detail directory under the engine's root
pub const ERRORS_DIR_NAME: &str = "errors";

/// A backed-up service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Message broker
    Rabbitmq,
    /// Log store
    Loki,
    /// Dashboard/config store
    Grafana,
    /// Relational engine
    Postgresql,
}

impl ServiceKind {
    /// All services in orchestrator order
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Rabbitmq,
        ServiceKind::Loki,
        ServiceKind::Grafana,
        ServiceKind::Postgresql,
    ];

    /// Returns the directory and record name
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Rabbitmq => "rabbitmq",
            ServiceKind::Loki => "loki",
            ServiceKind::Grafana => "grafana",
            ServiceKind::Postgresql => "postgresql",
        }
    }

    /// Whether the service is backed up as a volume archive
    pub fn is_archival(&self) -> bool {
        !matches!(self, ServiceKind::Postgresql)
    }

    /// Parse a service name
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Artifact partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Daily,
    Weekly,
}

impl Partition {
    /// Both partitions
    pub const ALL: [Partition; 2] = [Partition::Daily, Partition::Weekly];

    /// Partition for a run on the given weekday
    pub fn for_weekday(weekday: Weekday) -> Self {
        if weekday == WEEKLY_WEEKDAY {
            Partition::Weekly
        } else {
            Partition::Daily
        }
    }

    /// Returns the directory name
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Daily => "daily",
            Partition::Weekly => "weekly",
        }
    }
}

/// Retention policy, applied independently per service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Daily artifacts older than this many days are deleted
    #[serde(rename = "daily")]
    pub daily_days: u32,
    /// Number of most recent weekly artifacts kept
    #[serde(rename = "weekly")]
    pub weekly_count: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily_days: 7,
            weekly_count: 4,
        }
    }
}

/// Everything a backend needs to know about the current run.
///
/// Built once per orchestrator run and passed by reference, so every backend
/// sees the same timestamp, partition and paths.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run start, local time
    pub started_at: DateTime<Local>,
    /// Artifact timestamp: RFC3339 UTC with `:` and `.` replaced by `-`
    pub timestamp: String,
    /// Calendar day of the run
    pub backup_date: NaiveDate,
    /// Partition selected by the run's weekday
    pub partition: Partition,
    /// Final backup root
    pub backup_root: PathBuf,
    /// Status record directory
    pub status_dir: PathBuf,
    /// Local scratch root, present only when staging is active
    pub scratch_root: Option<PathBuf>,
    /// Active retention policy
    pub policy: RetentionPolicy,
}

impl RunContext {
    /// Create the context for a run starting at `started_at`
    pub fn new(
        started_at: DateTime<Local>,
        backup_root: impl Into<PathBuf>,
        scratch_root: Option<PathBuf>,
        policy: RetentionPolicy,
    ) -> Self {
        let backup_root = backup_root.into();
        Self {
            timestamp: artifact_timestamp(&started_at.with_timezone(&Utc)),
            backup_date: started_at.date_naive(),
            partition: Partition::for_weekday(started_at.weekday()),
            status_dir: backup_root.join(STATUS_DIR_NAME),
            backup_root,
            scratch_root,
            policy,
            started_at,
        }
    }

    /// Whether artifacts are written to scratch first
    pub fn is_staging(&self) -> bool {
        self.scratch_root.is_some()
    }

    /// Final directory for a service's artifacts in this run's partition
    pub fn target_dir(&self, service: ServiceKind) -> PathBuf {
        partition_dir(&self.backup_root, service, self.partition)
    }

    /// Directory backends write into: scratch when staging, else the target
    pub fn work_dir(&self, service: ServiceKind) -> PathBuf {
        match &self.scratch_root {
            Some(scratch) => partition_dir(scratch, service, self.partition),
            None => self.target_dir(service),
        }
    }

    /// Directory holding the engine's error-detail sidecars
    pub fn errors_dir(&self) -> PathBuf {
        self.backup_root
            .join(ServiceKind::Postgresql.as_str())
            .join(ERRORS_DIR_NAME)
    }

    /// Wall-clock completion timestamp for status records
    pub fn now_rfc3339() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

/// `{root}/{service}/{partition}`
pub fn partition_dir(root: &Path, service: ServiceKind, partition: Partition) -> PathBuf {
    root.join(service.as_str()).join(partition.as_str())
}

/// Format an artifact timestamp
///
/// `2026-10-18T03:00:00.123Z` becomes `2026-10-18T03-00-00-123Z`.
pub fn artifact_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// File name of a volume archive
pub fn archive_file_name(timestamp: &str) -> String {
    format!("backup-{}.tar.gz", timestamp)
}

/// File name of a database dump
pub fn dump_file_name(database: &str, timestamp: &str) -> String {
    format!("{}-{}.sql.gz", database, timestamp)
}

/// File name of a broker definitions export
pub fn definitions_file_name(timestamp: &str) -> String {
    format!("definitions-{}.json", timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, 0, 0).earliest().unwrap()
    }

    #[test]
    fn test_partition_by_weekday() {
        assert_eq!(Partition::for_weekday(Weekday::Sun), Partition::Weekly);
        for day in [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri, Weekday::Sat] {
            assert_eq!(Partition::for_weekday(day), Partition::Daily);
        }
    }

    #[test]
    fn test_run_context_paths() {
        // 2026-10-18 is a Sunday
        let ctx = RunContext::new(local(2026, 10, 18, 3), "/backups", None, RetentionPolicy::default());
        assert_eq!(ctx.partition, Partition::Weekly);
        assert_eq!(ctx.target_dir(ServiceKind::Loki), PathBuf::from("/backups/loki/weekly"));
        assert_eq!(ctx.work_dir(ServiceKind::Loki), ctx.target_dir(ServiceKind::Loki));
        assert_eq!(ctx.status_dir, PathBuf::from("/backups/status"));
        assert_eq!(ctx.errors_dir(), PathBuf::from("/backups/postgresql/errors"));
        assert!(!ctx.is_staging());
    }

    #[test]
    fn test_run_context_staging_work_dir() {
        let ctx = RunContext::new(
            local(2026, 10, 19, 3),
            "/mnt/s3/backups",
            Some(PathBuf::from("/tmp/stage")),
            RetentionPolicy::default(),
        );
        assert_eq!(ctx.partition, Partition::Daily);
        assert_eq!(ctx.work_dir(ServiceKind::Postgresql), PathBuf::from("/tmp/stage/postgresql/daily"));
        assert_eq!(ctx.target_dir(ServiceKind::Postgresql), PathBuf::from("/mnt/s3/backups/postgresql/daily"));
    }

    #[test]
    fn test_artifact_timestamp_has_no_colons_or_periods() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 3, 4, 5).unwrap();
        let ts = artifact_timestamp(&at);
        assert_eq!(ts, "2026-10-18T03-04-05-000Z");
        assert_eq!(archive_file_name(&ts), "backup-2026-10-18T03-04-05-000Z.tar.gz");
        assert_eq!(dump_file_name("app_db", &ts), "app_db-2026-10-18T03-04-05-000Z.sql.gz");
    }

    #[test]
    fn test_service_parse() {
        assert_eq!(ServiceKind::parse("grafana"), Some(ServiceKind::Grafana));
        assert_eq!(ServiceKind::parse("mysql"), None);
        assert!(!ServiceKind::Postgresql.is_archival());
    }
}
