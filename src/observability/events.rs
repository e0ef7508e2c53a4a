//! Observable events emitted during a backup run.

use std::fmt;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Run lifecycle
    /// Configuration loaded and validated
    ConfigLoaded,
    /// Orchestrator run begins
    RunStart,
    /// Orchestrator run complete
    RunComplete,
    /// Leftover temp files from an interrupted run removed
    StaleTempRemoved,

    // Per-service backups
    /// Service backup started
    BackupStart,
    /// Service backup complete
    BackupComplete,
    /// Service backup failed
    BackupFailed,
    /// Data copy finished with unreadable entries skipped
    ArchiveCopyWarnings,
    /// Broker definitions export failed (non-fatal)
    DefinitionsExportFailed,

    // Relational dumps
    /// Catalog query failed, no databases attempted
    CatalogQueryFailed,
    /// Size estimate failed, default assumed
    SizeEstimateFallback,
    /// Insufficient disk space for a dump
    DiskSpaceInsufficient,
    /// Dump still running, progress sample
    DumpProgress,
    /// Dump killed by the wall-clock timeout
    DumpTimeout,
    /// Progress monitor did not stop within its grace period
    MonitorAborted,
    /// A stale error sidecar could not be removed after a successful dump
    SidecarRemoveFailed,

    // Staging
    /// Staged artifact copied and verified
    StagingVerified,
    /// Staged artifact verified by size only
    StagingReducedConfidence,
    /// Staged artifact failed verification
    StagingFailed,

    // Ledger and retention
    /// Status record written
    StatusWritten,
    /// Summary written
    SummaryWritten,
    /// Retention deleted an artifact
    RetentionDelete,

    // Notification
    /// Notification attempt failed
    NotifyRetry,
    /// Notification delivery gave up
    NotifyFailed,

    // Restore
    /// Restore started
    RestoreStart,
    /// Restore complete
    RestoreComplete,
    /// Restore aborted
    RestoreAborted,
}

impl Event {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::RunStart => "RUN_START",
            Event::RunComplete => "RUN_COMPLETE",
            Event::StaleTempRemoved => "STALE_TEMP_REMOVED",
            Event::BackupStart => "BACKUP_START",
            Event::BackupComplete => "BACKUP_COMPLETE",
            Event::BackupFailed => "BACKUP_FAILED",
            Event::ArchiveCopyWarnings => "ARCHIVE_COPY_WARNINGS",
            Event::DefinitionsExportFailed => "DEFINITIONS_EXPORT_FAILED",
            Event::CatalogQueryFailed => "CATALOG_QUERY_FAILED",
            Event::SizeEstimateFallback => "SIZE_ESTIMATE_FALLBACK",
            Event::SidecarRemoveFailed => "SIDECAR_REMOVE_FAILED",
            Event::DiskSpaceInsufficient => "DISK_SPACE_INSUFFICIENT",
            Event::DumpProgress => "DUMP_PROGRESS",
            Event::DumpTimeout => "DUMP_TIMEOUT",
            Event::MonitorAborted => "MONITOR_ABORTED",
            Event::StagingVerified => "STAGING_VERIFIED",
            Event::StagingReducedConfidence => "STAGING_REDUCED_CONFIDENCE",
            Event::StagingFailed => "STAGING_FAILED",
            Event::StatusWritten => "STATUS_WRITTEN",
            Event::SummaryWritten => "SUMMARY_WRITTEN",
            Event::RetentionDelete => "RETENTION_DELETE",
            Event::NotifyRetry => "NOTIFY_RETRY",
            Event::NotifyFailed => "NOTIFY_FAILED",
            Event::RestoreStart => "RESTORE_START",
            Event::RestoreComplete => "RESTORE_COMPLETE",
            Event::RestoreAborted => "RESTORE_ABORTED",
        }
    }

    /// Whether the event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Event::BackupFailed
                | Event::CatalogQueryFailed
                | Event::DiskSpaceInsufficient
                | Event::DumpTimeout
                | Event::StagingFailed
                | Event::NotifyFailed
                | Event::RestoreAborted
        )
    }

    /// Whether the event is a degraded-but-proceeding condition
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::ArchiveCopyWarnings
                | Event::DefinitionsExportFailed
                | Event::SizeEstimateFallback
                | Event::MonitorAborted
                | Event::SidecarRemoveFailed
                | Event::StagingReducedConfidence
                | Event::NotifyRetry
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake() {
        for event in [Event::RunStart, Event::DumpProgress, Event::StagingReducedConfidence] {
            let name = event.as_str();
            assert!(name.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_failure_and_warning_disjoint() {
        for event in [
            Event::BackupFailed,
            Event::DumpTimeout,
            Event::NotifyRetry,
            Event::DefinitionsExportFailed,
            Event::SidecarRemoveFailed,
        ] {
            assert!(!(event.is_failure() && event.is_warning()));
        }
    }
}
