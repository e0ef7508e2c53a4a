//! Status ledger: one JSON record per unit, last write wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::summary::{BackupSummary, SummaryInputs};
use crate::backup::{
    escape_file_component, BackupAttempt, BackupError, BackupResult, Outcome, RetentionPolicy, ServiceKind, Unit,
};
use crate::observability::{log_event_with_fields, Event};

/// File name of the aggregate summary
pub const SUMMARY_FILE_NAME: &str = "backup_summary.json";

const DB_RECORD_PREFIX: &str = "postgresql_";
const RECORD_SUFFIX: &str = "_last_backup.json";

/// Status records under one directory
#[derive(Debug, Clone)]
pub struct StatusLedger {
    dir: PathBuf,
}

impl StatusLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a unit's record
    pub fn record_path(&self, unit: &Unit) -> PathBuf {
        self.dir.join(unit.record_file_name())
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE_NAME)
    }

    /// Persist `attempt`, replacing the unit's previous record
    pub fn record(&self, attempt: &BackupAttempt) -> BackupResult<PathBuf> {
        let unit = attempt.unit().ok_or_else(|| {
            BackupError::status_failed(format!("unknown service in record: {:?}", attempt.service))
        })?;
        let path = self.record_path(&unit);
        write_json_atomic(&path, attempt)?;

        let shown = path.display().to_string();
        log_event_with_fields(
            Event::StatusWritten,
            &[("path", shown.as_str()), ("status", attempt.status.as_str())],
        );
        Ok(path)
    }

    /// A unit's record; None if missing or unreadable
    pub fn load(&self, unit: &Unit) -> Option<BackupAttempt> {
        read_json(&self.record_path(unit)).ok()
    }

    /// A unit's outcome; `unknown` if the record is missing or unreadable
    pub fn status_of(&self, unit: &Unit) -> Outcome {
        self.load(unit).map(|a| a.status).unwrap_or(Outcome::Unknown)
    }

    /// Outcomes of every per-database record present
    pub fn database_records(&self) -> BTreeMap<String, Outcome> {
        let mut records = BTreeMap::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return records,
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(db) = database_from_record_name(&name) {
                let unit = Unit::Database(db.to_string());
                records.insert(db.to_string(), self.status_of(&unit));
            }
        }
        records
    }

    /// Drop per-database records for databases not in `current`
    pub fn retain_databases(&self, current: &[String]) -> usize {
        let mut removed = 0;
        for db in self.database_records().into_keys() {
            // record names carry the escaped form
            if current.iter().any(|c| escape_file_component(c) == db) {
                continue;
            }
            if fs::remove_file(self.record_path(&Unit::Database(db))).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Recompute the summary from the records currently on disk
    pub fn summarize(&self, policy: RetentionPolicy, next_scheduled_backup: String, timestamp: String) -> BackupSummary {
        let inputs = SummaryInputs {
            rabbitmq: self.status_of(&Unit::Service(ServiceKind::Rabbitmq)),
            loki: self.status_of(&Unit::Service(ServiceKind::Loki)),
            grafana: self.status_of(&Unit::Service(ServiceKind::Grafana)),
            engine: self.status_of(&Unit::Service(ServiceKind::Postgresql)),
            databases: self.database_records(),
        };
        BackupSummary::compute(inputs, policy, next_scheduled_backup, timestamp)
    }

    /// Replace the summary file
    pub fn write_summary(&self, summary: &BackupSummary) -> BackupResult<PathBuf> {
        let path = self.summary_path();
        write_json_atomic(&path, summary)?;
        log_event_with_fields(Event::SummaryWritten, &[("overall_status", summary.overall_status.as_str())]);
        Ok(path)
    }

    pub fn read_summary(&self) -> BackupResult<BackupSummary> {
        read_json(&self.summary_path())
    }
}

/// `postgresql_{db}_last_backup.json` → `{db}`; the engine record has no db
fn database_from_record_name(name: &str) -> Option<&str> {
    let db = name.strip_prefix(DB_RECORD_PREFIX)?.strip_suffix(RECORD_SUFFIX)?;
    if db.is_empty() {
        None
    } else {
        Some(db)
    }
}

/// Write to `{path}.tmp`, then rename into place
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> BackupResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BackupError::io_error_at_path(e, parent))?;
    }
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| BackupError::status_failed("cannot encode status record").with_source(e))?;

    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).map_err(|e| BackupError::io_error_at_path(e, &tmp))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        BackupError::io_error_at_path(e, path)
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> BackupResult<T> {
    let bytes = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BackupError::not_found(path.display().to_string())
        } else {
            BackupError::io_error_at_path(e, path)
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        BackupError::status_failed("unreadable status record")
            .with_path(path)
            .with_source(e)
    })
}
