//! Retention sweeper.
//!
//! Per service:
//!
//! - daily partition: delete artifacts whose mtime is older than
//!   `policy.daily_days` days
//! - weekly partition: keep the `policy.weekly_count` most recent runs of
//!   each unit, delete the rest regardless of age
//! - relational engine: delete error sidecars older than the error-log window
//!
//! A unit is an archival service, or one database of the relational engine.
//! A run is every file of a unit sharing one timestamp, so a broker's
//! `backup-{ts}.tar.gz` and `definitions-{ts}.json` are kept or dropped
//! together and count once.
//!
//! All deletions are best-effort.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use regex::Regex;

use super::{partition_dir, Partition, RetentionPolicy, ServiceKind, ERRORS_DIR_NAME};
use crate::observability::{log_event_with_fields, Event, ObservationScope};

/// Extension classes the sweeper manages
pub const ARTIFACT_EXTENSIONS: &[&str] = &[".tar.gz", ".sql.gz", ".json"];

const ERROR_LOG_SUFFIX: &str = "_error.log";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

fn timestamp_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"-\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}(-\d{3})?Z").expect("timestamp pattern is valid")
    })
}

/// Whether a file name belongs to a managed extension class
pub fn is_artifact(name: &str) -> bool {
    !name.starts_with('.') && ARTIFACT_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Family key: the name with its artifact timestamp removed
pub fn artifact_family(name: &str) -> String {
    timestamp_pattern().replace(name, "").into_owned()
}

fn artifact_stamp(name: &str) -> Option<&str> {
    timestamp_pattern().find(name).map(|m| m.as_str())
}

/// Retention unit a weekly file belongs to: the service itself for archival
/// services, the dumped database's family for the relational engine
fn retention_unit(service: ServiceKind, name: &str) -> String {
    if service.is_archival() {
        service.as_str().to_string()
    } else {
        artifact_family(name)
    }
}

/// What a sweep removed
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    /// Deletions that failed
    pub errors: usize,
}

impl SweepReport {
    fn remove(&mut self, path: &Path, reason: &str) {
        match fs::remove_file(path) {
            Ok(()) => {
                let shown = path.display().to_string();
                log_event_with_fields(Event::RetentionDelete, &[("path", shown.as_str()), ("reason", reason)]);
                self.deleted.push(path.to_path_buf());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => self.errors += 1,
        }
    }
}

/// A file with its modification time
struct Aged {
    path: PathBuf,
    name: String,
    modified: SystemTime,
}

fn list_files(dir: &Path, filter: impl Fn(&str) -> bool) -> Vec<Aged> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    entries
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !filter(&name) {
                return None;
            }
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            Some(Aged {
                path: entry.path(),
                name,
                modified: meta.modified().ok()?,
            })
        })
        .collect()
}

fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * SECS_PER_DAY)
}

/// Deletes artifacts that aged out of policy
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    root: PathBuf,
    policy: RetentionPolicy,
    error_log_days: u32,
}

impl RetentionSweeper {
    pub fn new(root: impl Into<PathBuf>, policy: RetentionPolicy, error_log_days: u32) -> Self {
        Self {
            root: root.into(),
            policy,
            error_log_days,
        }
    }

    /// Sweep every service directory as of `now`
    pub fn sweep(&self, now: SystemTime) -> SweepReport {
        let root = self.root.display().to_string();
        let scope = ObservationScope::with_fields("RETENTION_SWEEP", &[("root", root.as_str())]);
        let mut report = SweepReport::default();

        for service in ServiceKind::ALL {
            self.sweep_daily(&partition_dir(&self.root, service, Partition::Daily), now, &mut report);
            self.sweep_weekly(service, &partition_dir(&self.root, service, Partition::Weekly), &mut report);
        }
        self.sweep_error_logs(now, &mut report);

        let deleted = report.deleted.len().to_string();
        let errors = report.errors.to_string();
        scope.complete_with_fields(&[("deleted", deleted.as_str()), ("errors", errors.as_str())]);
        report
    }

    fn sweep_daily(&self, dir: &Path, now: SystemTime, report: &mut SweepReport) {
        let cutoff = now.checked_sub(days(self.policy.daily_days)).unwrap_or(SystemTime::UNIX_EPOCH);
        for file in list_files(dir, is_artifact) {
            if file.modified < cutoff {
                report.remove(&file.path, "daily retention");
            }
        }
    }

    fn sweep_weekly(&self, service: ServiceKind, dir: &Path, report: &mut SweepReport) {
        // unit -> run timestamp -> files
        let mut units: BTreeMap<String, BTreeMap<String, Vec<Aged>>> = BTreeMap::new();
        for file in list_files(dir, is_artifact) {
            let run = artifact_stamp(&file.name).unwrap_or(file.name.as_str()).to_string();
            units
                .entry(retention_unit(service, &file.name))
                .or_default()
                .entry(run)
                .or_default()
                .push(file);
        }

        for (_, runs) in units {
            let mut runs: Vec<(SystemTime, String, Vec<Aged>)> = runs
                .into_iter()
                .map(|(stamp, files)| {
                    let newest = files.iter().map(|f| f.modified).max().unwrap_or(SystemTime::UNIX_EPOCH);
                    (newest, stamp, files)
                })
                .collect();
            // newest first; the stamp breaks ties so the order is stable
            runs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
            for (_, _, files) in runs.iter().skip(self.policy.weekly_count as usize) {
                for file in files {
                    report.remove(&file.path, "weekly retention");
                }
            }
        }
    }

    fn sweep_error_logs(&self, now: SystemTime, report: &mut SweepReport) {
        let dir = self.root.join(ServiceKind::Postgresql.as_str()).join(ERRORS_DIR_NAME);
        let cutoff = now.checked_sub(days(self.error_log_days)).unwrap_or(SystemTime::UNIX_EPOCH);
        for file in list_files(&dir, |name| name.ends_with(ERROR_LOG_SUFFIX)) {
            if file.modified < cutoff {
                report.remove(&file.path, "error log retention");
            }
        }
    }
}

/// Remove temp files a killed run left under `root`'s service partitions:
/// `*.tmp`, `.*.partial` and `.snapshot-*` directories.
pub fn remove_stale_temp(root: &Path) -> usize {
    let mut removed = 0;
    for service in ServiceKind::ALL {
        for partition in Partition::ALL {
            let dir = partition_dir(root, service, partition);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for entry in entries.filter_map(|e| e.ok()) {
                let name = entry.file_name().to_string_lossy().into_owned();
                let path = entry.path();
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

                let result = if is_dir && name.starts_with(".snapshot-") {
                    fs::remove_dir_all(&path)
                } else if !is_dir
                    && (name.ends_with(".tmp") || (name.starts_with('.') && name.ends_with(".partial")))
                {
                    fs::remove_file(&path)
                } else {
                    continue;
                };

                if result.is_ok() {
                    removed += 1;
                    let shown = path.display().to_string();
                    log_event_with_fields(Event::StaleTempRemoved, &[("path", shown.as_str())]);
                }
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(SECS_PER_DAY);

    fn touch(dir: &Path, name: &str, modified: SystemTime) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"x").unwrap();
        File::options().write(true).open(&path).unwrap().set_modified(modified).unwrap();
        path
    }

    fn ts(day: u32) -> String {
        format!("2026-10-{:02}T03-00-00-000Z", day)
    }

    #[test]
    fn test_family_and_class() {
        assert_eq!(artifact_family(&format!("backup-{}.tar.gz", ts(1))), "backup.tar.gz");
        assert_eq!(artifact_family(&format!("app_db-{}.sql.gz", ts(1))), "app_db.sql.gz");
        assert_eq!(artifact_family(&format!("definitions-{}.json", ts(1))), "definitions.json");
        assert!(is_artifact("backup-x.tar.gz"));
        assert!(!is_artifact(".backup-x.tar.gz.partial"));
        assert!(!is_artifact("notes.txt"));
    }

    #[test]
    fn test_daily_age_cutoff() {
        let root = TempDir::new().unwrap();
        let now = SystemTime::now();
        let daily = partition_dir(root.path(), ServiceKind::Loki, Partition::Daily);
        let old = touch(&daily, &format!("backup-{}.tar.gz", ts(1)), now - DAY * 8);
        let fresh = touch(&daily, &format!("backup-{}.tar.gz", ts(12)), now - DAY * 6);
        let other = touch(&daily, "README", now - DAY * 100);

        let report = RetentionSweeper::new(root.path(), RetentionPolicy::default(), 30).sweep(now);

        assert_eq!(report.deleted, vec![old.clone()]);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(other.exists());
    }

    #[test]
    fn test_weekly_keeps_archive_and_definitions_as_one_run() {
        let root = TempDir::new().unwrap();
        let now = SystemTime::now();
        let weekly = partition_dir(root.path(), ServiceKind::Rabbitmq, Partition::Weekly);
        let mut archives = Vec::new();
        let mut definitions = Vec::new();
        for week in 0..6u32 {
            let at = now - DAY * (7 * week);
            archives.push(touch(&weekly, &format!("backup-{}.tar.gz", ts(week + 1)), at));
            definitions.push(touch(&weekly, &format!("definitions-{}.json", ts(week + 1)), at));
        }

        let policy = RetentionPolicy { daily_days: 7, weekly_count: 4 };
        RetentionSweeper::new(root.path(), policy, 30).sweep(now);

        for (i, (archive, defs)) in archives.iter().zip(&definitions).enumerate() {
            assert_eq!(archive.exists(), i < 4, "archive {}", i);
            assert_eq!(defs.exists(), i < 4, "definitions {}", i);
        }
    }

    #[test]
    fn test_retention_bounds_hold_for_all_small_policies() {
        let now = SystemTime::now();
        for d in 0..4u32 {
            for w in 0..4u32 {
                let root = TempDir::new().unwrap();
                let daily = partition_dir(root.path(), ServiceKind::Grafana, Partition::Daily);
                let weekly = partition_dir(root.path(), ServiceKind::Grafana, Partition::Weekly);
                for i in 0..6u32 {
                    let age = DAY * i + Duration::from_secs(60);
                    touch(&daily, &format!("backup-{}.tar.gz", ts(i + 1)), now - age);
                    touch(&weekly, &format!("backup-{}.tar.gz", ts(i + 1)), now - age * 7);
                }

                RetentionSweeper::new(root.path(), RetentionPolicy { daily_days: d, weekly_count: w }, 30)
                    .sweep(now);

                let cutoff = now - DAY * d;
                for f in list_files(&daily, is_artifact) {
                    assert!(f.modified >= cutoff, "d={} w={} kept {}", d, w, f.name);
                }
                let mut kept: Vec<String> = list_files(&weekly, is_artifact).into_iter().map(|f| f.name).collect();
                kept.sort();
                // newest weekly files are the ones with the lowest day index
                let expected: Vec<String> = (0..w.min(6)).map(|i| format!("backup-{}.tar.gz", ts(i + 1))).collect();
                assert_eq!(kept, expected, "d={} w={}", d, w);
            }
        }
    }

    #[test]
    fn test_weekly_count_bounds_each_unit() {
        let root = TempDir::new().unwrap();
        let now = SystemTime::now();
        let policy = RetentionPolicy { daily_days: 7, weekly_count: 4 };
        let postgres = partition_dir(root.path(), ServiceKind::Postgresql, Partition::Weekly);
        let loki = partition_dir(root.path(), ServiceKind::Loki, Partition::Weekly);
        let rabbitmq = partition_dir(root.path(), ServiceKind::Rabbitmq, Partition::Weekly);
        for week in 0..6u32 {
            let at = now - DAY * (7 * week);
            for db in ["app_db", "metrics", "auth"] {
                touch(&postgres, &format!("{}-{}.sql.gz", db, ts(week + 1)), at);
            }
            touch(&loki, &format!("backup-{}.tar.gz", ts(week + 1)), at);
            touch(&rabbitmq, &format!("backup-{}.tar.gz", ts(week + 1)), at);
            touch(&rabbitmq, &format!("definitions-{}.json", ts(week + 1)), at);
        }

        RetentionSweeper::new(root.path(), policy, 30).sweep(now);

        let dumps = list_files(&postgres, is_artifact);
        for db in ["app_db", "metrics", "auth"] {
            let family = format!("{}.sql.gz", db);
            let kept: Vec<&Aged> = dumps.iter().filter(|f| artifact_family(&f.name) == family).collect();
            assert_eq!(kept.len(), 4, "{}", db);
            assert!(kept.iter().all(|f| f.modified > now - DAY * 22), "{}", db);
        }
        assert_eq!(list_files(&loki, is_artifact).len(), 4);

        let mut runs: Vec<String> = list_files(&rabbitmq, is_artifact)
            .iter()
            .filter_map(|f| artifact_stamp(&f.name).map(str::to_string))
            .collect();
        assert_eq!(runs.len(), 8);
        runs.sort();
        runs.dedup();
        assert_eq!(runs.len(), 4);
    }

    #[test]
    fn test_error_logs_aged_separately() {
        let root = TempDir::new().unwrap();
        let now = SystemTime::now();
        let errors = root.path().join("postgresql/errors");
        let old = touch(&errors, "app_db_error.log", now - DAY * 31);
        let recent = touch(&errors, "metrics_db_error.log", now - DAY * 10);

        RetentionSweeper::new(root.path(), RetentionPolicy::default(), 30).sweep(now);
        assert!(!old.exists());
        assert!(recent.exists());
    }

    #[test]
    fn test_missing_dirs_are_not_errors() {
        let root = TempDir::new().unwrap();
        let report = RetentionSweeper::new(root.path().join("nothing"), RetentionPolicy::default(), 30)
            .sweep(SystemTime::now());
        assert!(report.deleted.is_empty());
        assert_eq!(report.errors, 0);
    }

    #[test]
    fn test_remove_stale_temp() {
        let root = TempDir::new().unwrap();
        let now = SystemTime::now();
        let dir = partition_dir(root.path(), ServiceKind::Postgresql, Partition::Daily);
        touch(&dir, "app_db-x.sql.gz.tmp", now);
        touch(&dir, ".app_db-x.sql.partial", now);
        let keep = touch(&dir, "app_db-x.sql.gz", now);
        fs::create_dir_all(partition_dir(root.path(), ServiceKind::Loki, Partition::Weekly).join(".snapshot-x/sub")).unwrap();

        assert_eq!(remove_stale_temp(root.path()), 3);
        assert!(keep.exists());
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);
    }
}
