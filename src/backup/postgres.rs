//! Relational dump backend.
//!
//! Enumerates databases, then dumps each one independently:
//!
//! ```text
//! pending → estimating → space-checked → dumping → compressing
//!         → verifying (staging only) → succeeded | failed(category)
//! ```
//!
//! A catalog query failure aborts before any database is attempted. Every
//! other failure is confined to its database.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::attempt::{is_safe_database_name, BackupAttempt, ErrorCategory, Unit};
use super::classify::{classify, diagnostics_report_error, summarize_diagnostics, FailureSignals};
use super::errors::{BackupError, BackupResult};
use super::integrity::{file_size, gzip_file, verify_gzip};
use super::monitor::{run_with_timeout, ProgressMonitor};
use super::staging::StagingRelay;
use super::{dump_file_name, RunContext, ServiceKind};
use crate::disk::SpaceCheck;
use crate::observability::{log_event_with_fields, Event, Timer};

/// Size assumed when the catalog cannot report one
pub const DEFAULT_SIZE_ESTIMATE: u64 = 1024 * 1024 * 1024;

/// Catalog query listing every non-template database
pub const CATALOG_QUERY: &str =
    "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname";

/// Access to a relational engine
#[async_trait]
pub trait RelationalEngine: Send + Sync {
    /// All non-template databases
    async fn list_databases(&self) -> BackupResult<Vec<String>>;

    /// Size of one database in bytes
    async fn database_size(&self, database: &str) -> BackupResult<u64>;

    /// Command that writes a plain SQL dump of `database` to stdout
    fn dump_command(&self, database: &str) -> Command;

    /// Command that executes SQL read from stdin against `database`
    fn restore_command(&self, database: &str) -> Command;
}

/// Connection parameters for [`PgCli`]
#[derive(Debug, Clone)]
pub struct PgConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database used for catalog queries
    pub database: String,
}

/// Engine access through the `psql` and `pg_dump` command line tools
#[derive(Debug, Clone)]
pub struct PgCli {
    conn: PgConnection,
}

impl PgCli {
    pub fn new(conn: PgConnection) -> Self {
        Self { conn }
    }

    fn base(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-h")
            .arg(&self.conn.host)
            .arg("-p")
            .arg(self.conn.port.to_string())
            .arg("-U")
            .arg(&self.conn.user)
            .env("PGPASSWORD", &self.conn.password)
            .env("PGCONNECT_TIMEOUT", "10")
            .kill_on_drop(true);
        cmd
    }

    async fn query(&self, sql: &str) -> BackupResult<String> {
        let output = self
            .base("psql")
            .arg("-d")
            .arg(&self.conn.database)
            .args(["-t", "-A", "-v", "ON_ERROR_STOP=1", "-c", sql])
            .output()
            .await
            .map_err(|e| BackupError::catalog_failed("failed to run psql").with_source(e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() || diagnostics_report_error(&stderr) {
            return Err(BackupError::catalog_failed(format!(
                "query failed: {}",
                summarize_diagnostics(&stderr, 3)
            )));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl RelationalEngine for PgCli {
    async fn list_databases(&self) -> BackupResult<Vec<String>> {
        let stdout = self.query(CATALOG_QUERY).await?;
        parse_catalog_output(&stdout)
    }

    async fn database_size(&self, database: &str) -> BackupResult<u64> {
        let sql = format!("SELECT pg_database_size('{}')", database.replace('\'', "''"));
        let stdout = self.query(&sql).await?;
        stdout
            .trim()
            .parse()
            .map_err(|_| BackupError::catalog_failed(format!("unexpected size output: {:?}", stdout.trim())))
    }

    fn dump_command(&self, database: &str) -> Command {
        let mut cmd = self.base("pg_dump");
        cmd.args(["--format=plain", "--no-owner", "--no-acl", "--no-password"])
            .arg(database);
        cmd
    }

    fn restore_command(&self, database: &str) -> Command {
        let mut cmd = self.base("psql");
        cmd.args(["-v", "ON_ERROR_STOP=1", "--no-password", "-d"]).arg(database);
        cmd
    }
}

/// Prefixes psql puts on diagnostic lines
const DIAGNOSTIC_PREFIXES: &[&str] = &["ERROR:", "FATAL:", "PANIC:", "psql:"];

/// Parse unaligned tuple output into database names.
///
/// Output carrying a psql diagnostic line is rejected as a whole; a partial
/// list is never returned. Names themselves are not judged here.
pub fn parse_catalog_output(stdout: &str) -> BackupResult<Vec<String>> {
    let mut names = Vec::new();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        if DIAGNOSTIC_PREFIXES.iter().any(|p| line.trim_start().starts_with(p)) {
            return Err(BackupError::catalog_failed(format!("malformed catalog row: {:?}", line.trim())));
        }
        names.push(line.to_string());
    }
    Ok(names)
}

/// Tunables for the dump path
#[derive(Debug, Clone, Copy)]
pub struct DumpSettings {
    /// Wall-clock bound per database
    pub timeout: Duration,
    /// Progress log interval
    pub progress_interval: Duration,
    /// How long the monitor and diagnostic reader get after the dump ends
    pub monitor_grace: Duration,
    /// Size assumed when the estimate query fails
    pub default_estimate: u64,
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            progress_interval: Duration::from_secs(30),
            monitor_grace: Duration::from_secs(5),
            default_estimate: DEFAULT_SIZE_ESTIMATE,
        }
    }
}

/// State of one database dump attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpState {
    Pending,
    Estimating,
    SpaceChecked,
    Dumping,
    Compressing,
    Verifying,
    Succeeded,
    Failed(ErrorCategory),
}

impl DumpState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DumpState::Succeeded | DumpState::Failed(_))
    }

    /// Whether `self → to` is allowed. `staging` enables the verifying step.
    pub fn can_transition_to(&self, to: DumpState, staging: bool) -> bool {
        use DumpState::*;
        match (*self, to) {
            (from, Failed(_)) => !from.is_terminal(),
            (Pending, Estimating)
            | (Estimating, SpaceChecked)
            | (SpaceChecked, Dumping)
            | (Dumping, Compressing) => true,
            (Compressing, Verifying) | (Verifying, Succeeded) => staging,
            (Compressing, Succeeded) => !staging,
            _ => false,
        }
    }
}

/// Tracks the state of a single database dump
#[derive(Debug)]
struct DumpTracker {
    state: DumpState,
    staging: bool,
}

impl DumpTracker {
    fn new(staging: bool) -> Self {
        Self {
            state: DumpState::Pending,
            staging,
        }
    }

    fn advance(&mut self, to: DumpState) {
        debug_assert!(
            self.state.can_transition_to(to, self.staging),
            "invalid dump transition {:?} -> {:?}",
            self.state,
            to
        );
        self.state = to;
    }
}

/// Result of one pass over the engine
#[derive(Debug, Clone)]
pub struct DumpRun {
    /// Databases from the catalog; None when the catalog query failed
    pub databases: Option<Vec<String>>,
    /// One attempt per database
    pub attempts: Vec<BackupAttempt>,
    /// Engine-level aggregate
    pub engine: BackupAttempt,
}

impl DumpRun {
    pub fn failed_count(&self) -> usize {
        self.attempts.iter().filter(|a| !a.is_success()).count()
    }

    pub fn is_success(&self) -> bool {
        self.engine.is_success()
    }
}

/// A per-database failure before it becomes an attempt
struct DumpFailure {
    message: String,
    detail: String,
    timed_out: bool,
    compression_failed: bool,
}

impl DumpFailure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: String::new(),
            timed_out: false,
            compression_failed: false,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    fn category(&self) -> ErrorCategory {
        let text = format!("{}\n{}", self.message, self.detail);
        classify(&FailureSignals {
            timed_out: self.timed_out,
            compression_failed: self.compression_failed,
            message: &text,
        })
    }
}

/// Dumps every database of one engine
pub struct DumpBackend {
    engine: Box<dyn RelationalEngine>,
    space: Box<dyn SpaceCheck>,
    relay: StagingRelay,
    settings: DumpSettings,
}

impl DumpBackend {
    pub fn new(
        engine: Box<dyn RelationalEngine>,
        space: Box<dyn SpaceCheck>,
        relay: StagingRelay,
        settings: DumpSettings,
    ) -> Self {
        Self {
            engine,
            space,
            relay,
            settings,
        }
    }

    /// Access to the engine, for restores
    pub fn engine(&self) -> &dyn RelationalEngine {
        self.engine.as_ref()
    }

    /// Dump all databases
    pub async fn dump_all(&self, ctx: &RunContext) -> DumpRun {
        let timer = Timer::new();
        let engine_unit = Unit::Service(ServiceKind::Postgresql);

        let databases = match self.engine.list_databases().await {
            Ok(dbs) => dbs,
            Err(e) => {
                let reason = e.to_string();
                log_event_with_fields(Event::CatalogQueryFailed, &[("reason", reason.as_str())]);
                let engine = BackupAttempt::failure(
                    &engine_unit,
                    ctx,
                    ErrorCategory::Unknown,
                    "Database catalog query failed; no databases attempted",
                    timer.elapsed(),
                )
                .with_detail(reason);
                return DumpRun {
                    databases: None,
                    attempts: Vec::new(),
                    engine,
                };
            }
        };

        let mut attempts = Vec::with_capacity(databases.len());
        for db in &databases {
            attempts.push(self.dump_one(ctx, db).await);
        }

        let failed: Vec<&BackupAttempt> = attempts.iter().filter(|a| !a.is_success()).collect();
        let total_size: u64 = attempts.iter().map(|a| a.size_bytes).sum();

        let engine = if failed.is_empty() {
            BackupAttempt::success(
                &engine_unit,
                ctx,
                format!("{} database(s) backed up", databases.len()),
                &ctx.target_dir(ServiceKind::Postgresql),
                total_size,
                timer.elapsed(),
            )
        } else {
            let category = failed
                .iter()
                .filter_map(|a| a.error_category)
                .min()
                .unwrap_or(ErrorCategory::Other);
            let names: Vec<&str> = failed.iter().filter_map(|a| a.database.as_deref()).collect();
            BackupAttempt::failure(
                &engine_unit,
                ctx,
                category,
                format!(
                    "{} of {} database backup(s) failed: {}",
                    failed.len(),
                    databases.len(),
                    names.join(", ")
                ),
                timer.elapsed(),
            )
            .with_size(total_size)
        };

        DumpRun {
            databases: Some(databases),
            attempts,
            engine,
        }
    }

    /// Dump a single database; never fails the caller
    async fn dump_one(&self, ctx: &RunContext, database: &str) -> BackupAttempt {
        let timer = Timer::new();
        let unit = Unit::Database(database.to_string());
        let mut tracker = DumpTracker::new(ctx.is_staging());
        log_event_with_fields(Event::BackupStart, &[("service", "postgresql"), ("database", database)]);

        if !is_safe_database_name(database) {
            let category = ErrorCategory::Other;
            tracker.advance(DumpState::Failed(category));
            let message = format!("Database name {:?} cannot be used in a file name; not dumped", database);
            log_event_with_fields(
                Event::BackupFailed,
                &[
                    ("service", "postgresql"),
                    ("database", database),
                    ("category", category.as_str()),
                    ("reason", message.as_str()),
                ],
            );
            return BackupAttempt::failure(&unit, ctx, category, message, timer.elapsed());
        }

        match self.run_states(ctx, database, &mut tracker).await {
            Ok((path, size_bytes)) => {
                tracker.advance(DumpState::Succeeded);
                remove_error_sidecar(ctx, database);
                let size = size_bytes.to_string();
                let secs = timer.elapsed_secs().to_string();
                log_event_with_fields(
                    Event::BackupComplete,
                    &[
                        ("service", "postgresql"),
                        ("database", database),
                        ("size_bytes", size.as_str()),
                        ("duration_secs", secs.as_str()),
                    ],
                );
                BackupAttempt::success(&unit, ctx, "Backup completed", &path, size_bytes, timer.elapsed())
            }
            Err(failure) => {
                let category = failure.category();
                tracker.advance(DumpState::Failed(category));
                log_event_with_fields(
                    Event::BackupFailed,
                    &[
                        ("service", "postgresql"),
                        ("database", database),
                        ("category", category.as_str()),
                        ("reason", failure.message.as_str()),
                    ],
                );
                write_error_sidecar(ctx, database, category, &failure);
                BackupAttempt::failure(&unit, ctx, category, failure.message, timer.elapsed())
                    .with_detail(failure.detail)
            }
        }
    }

    async fn run_states(
        &self,
        ctx: &RunContext,
        database: &str,
        tracker: &mut DumpTracker,
    ) -> Result<(PathBuf, u64), DumpFailure> {
        tracker.advance(DumpState::Estimating);
        let estimate = match self.engine.database_size(database).await {
            Ok(size) if size > 0 => size,
            result => {
                let reason = match result {
                    Err(e) => e.to_string(),
                    Ok(_) => "catalog reported zero bytes".to_string(),
                };
                log_event_with_fields(
                    Event::SizeEstimateFallback,
                    &[("database", database), ("reason", reason.as_str())],
                );
                self.settings.default_estimate
            }
        };

        let work_dir = ctx.work_dir(ServiceKind::Postgresql);
        fs::create_dir_all(&work_dir).map_err(|e| {
            DumpFailure::new(format!("Cannot create {}: {}", work_dir.display(), e))
        })?;

        let required = estimate.saturating_mul(2);
        if !self.space.has_space(required, &work_dir).await {
            return Err(DumpFailure::new(format!(
                "Insufficient disk space: need {} bytes for {} (estimated {} bytes)",
                required, database, estimate
            )));
        }
        tracker.advance(DumpState::SpaceChecked);

        tracker.advance(DumpState::Dumping);
        let file_name = dump_file_name(database, &ctx.timestamp);
        let partial = work_dir.join(format!(".{}-{}.sql.partial", database, ctx.timestamp));
        let monitor = ProgressMonitor::spawn(database, &partial, self.settings.progress_interval);
        let exec = run_with_timeout(
            self.engine.dump_command(database),
            &partial,
            self.settings.timeout,
            self.settings.monitor_grace,
        )
        .await;
        monitor.finish(self.settings.monitor_grace).await;

        let dump_failure = if exec.timed_out {
            let secs = self.settings.timeout.as_secs().to_string();
            log_event_with_fields(Event::DumpTimeout, &[("database", database), ("timeout_secs", secs.as_str())]);
            let mut failure = DumpFailure::new(format!(
                "pg_dump timed out after {}s",
                self.settings.timeout.as_secs()
            ));
            failure.timed_out = true;
            Some(failure)
        } else if let Some(err) = &exec.spawn_error {
            Some(DumpFailure::new(format!("pg_dump could not run: {}", err)))
        } else if file_size(&partial) == 0 {
            Some(DumpFailure::new("pg_dump produced no output"))
        } else if diagnostics_report_error(&exec.stderr) {
            Some(DumpFailure::new(format!(
                "pg_dump reported errors: {}",
                summarize_diagnostics(&exec.stderr, 3)
            )))
        } else if !exec.exit_ok {
            Some(DumpFailure::new("pg_dump exited with a failure status"))
        } else {
            None
        };
        if let Some(failure) = dump_failure {
            let _ = fs::remove_file(&partial);
            return Err(failure.with_detail(exec.stderr.trim()));
        }

        tracker.advance(DumpState::Compressing);
        let compressed_tmp = work_dir.join(format!("{}.tmp", file_name));
        let local_final = work_dir.join(&file_name);
        let compressed = {
            let src = partial.clone();
            let tmp = compressed_tmp.clone();
            let dst = local_final.clone();
            tokio::task::spawn_blocking(move || {
                gzip_file(&src, &tmp)?;
                verify_gzip(&tmp)?;
                fs::rename(&tmp, &dst)
            })
            .await
        };
        let _ = fs::remove_file(&partial);
        match compressed {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(compression_failure(&compressed_tmp, e.to_string())),
            Err(e) => return Err(compression_failure(&compressed_tmp, e.to_string())),
        }

        if !ctx.is_staging() {
            let size = file_size(&local_final);
            return Ok((local_final, size));
        }

        tracker.advance(DumpState::Verifying);
        let target = ctx.target_dir(ServiceKind::Postgresql).join(&file_name);
        match self.relay.relocate(&local_final, &target).await {
            Ok(outcome) => Ok((outcome.path, outcome.size_bytes)),
            Err(e) => Err(DumpFailure::new(format!(
                "Staging relay failed; local copy kept at {}",
                local_final.display()
            ))
            .with_detail(e.to_string())),
        }
    }
}

fn compression_failure(tmp: &Path, detail: String) -> DumpFailure {
    let _ = fs::remove_file(tmp);
    let mut failure = DumpFailure::new("Compression of dump failed").with_detail(detail);
    failure.compression_failed = true;
    failure
}

/// `{root}/postgresql/errors/{db}_error.log`
pub fn error_sidecar_path(ctx: &RunContext, database: &str) -> PathBuf {
    ctx.errors_dir().join(format!("{}_error.log", database))
}

fn write_error_sidecar(ctx: &RunContext, database: &str, category: ErrorCategory, failure: &DumpFailure) {
    let path = error_sidecar_path(ctx, database);
    let body = format!(
        "timestamp: {}\ndatabase: {}\ncategory: {}\nmessage: {}\n\n{}\n",
        RunContext::now_rfc3339(),
        database,
        category,
        failure.message,
        failure.detail
    );
    let written = path
        .parent()
        .map_or(Ok(()), |dir| fs::create_dir_all(dir))
        .and_then(|_| fs::write(&path, body));
    if let Err(e) = written {
        let path = path.display().to_string();
        let reason = e.to_string();
        log_event_with_fields(Event::BackupFailed, &[("path", path.as_str()), ("reason", reason.as_str())]);
    }
}

/// Remove a database's error sidecar; false if one remains
fn remove_error_sidecar(ctx: &RunContext, database: &str) -> bool {
    let path = error_sidecar_path(ctx, database);
    match fs::remove_file(&path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            let shown = path.display().to_string();
            let reason = e.to_string();
            log_event_with_fields(
                Event::SidecarRemoveFailed,
                &[("database", database), ("path", shown.as_str()), ("reason", reason.as_str())],
            );
            false
        }
    }
}
