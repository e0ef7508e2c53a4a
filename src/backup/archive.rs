//! Volume archive backend for the broker, log store and dashboard store.
//!
//! The data directory is copied best-effort into a snapshot directory and
//! the snapshot is archived as `backup-{ts}.tar.gz`. Files that fail to copy
//! are counted and logged; the attempt succeeds when the archive exists.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder;

use super::attempt::{BackupAttempt, Unit};
use super::classify::{classify, FailureSignals};
use super::definitions::DefinitionsExporter;
use super::errors::{BackupError, BackupResult};
use super::integrity::file_size;
use super::staging::StagingRelay;
use super::{archive_file_name, RunContext, ServiceKind};
use crate::observability::{log_event_with_fields, Event, Timer};

/// Result of archiving one data directory
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration: Duration,
    /// The archive file exists
    pub ok: bool,
    /// Entries that could not be copied into the snapshot
    pub copy_warnings: usize,
}

/// Archive `data_dir` into `target_dir/backup-{timestamp}.tar.gz`.
///
/// Blocking. Returns an error only when the data directory is missing or the
/// archive cannot be written at all.
pub fn archive(data_dir: &Path, target_dir: &Path, timestamp: &str) -> BackupResult<ArchiveOutcome> {
    let timer = Timer::new();

    if !data_dir.is_dir() {
        return Err(BackupError::dir_not_accessible(data_dir));
    }
    fs::create_dir_all(target_dir).map_err(|e| BackupError::io_error_at_path(e, target_dir))?;

    let snapshot = target_dir.join(format!(".snapshot-{}", timestamp));
    let _cleanup_guard = CleanupGuard::new(&snapshot);
    let mut copy_warnings = 0;
    copy_dir_best_effort(data_dir, &snapshot, &mut copy_warnings);

    let final_path = target_dir.join(archive_file_name(timestamp));
    let partial = target_dir.join(format!(".{}.partial", archive_file_name(timestamp)));
    if let Err(e) = create_tar_gz(&snapshot, &partial) {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }
    fs::rename(&partial, &final_path).map_err(|e| {
        let _ = fs::remove_file(&partial);
        BackupError::io_error_at_path(e, &final_path)
    })?;

    let ok = final_path.exists();
    Ok(ArchiveOutcome {
        size_bytes: file_size(&final_path),
        path: final_path,
        duration: timer.elapsed(),
        ok,
        copy_warnings,
    })
}

/// Write a gzip-compressed tar of `source_dir` to `archive_path`
fn create_tar_gz(source_dir: &Path, archive_path: &Path) -> BackupResult<()> {
    let file = File::create(archive_path).map_err(|e| {
        BackupError::io_error(e, format!("Failed to create archive: {}", archive_path.display()))
    })?;

    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);

    add_dir_to_archive(&mut builder, source_dir, source_dir)?;

    let encoder = builder
        .into_inner()
        .map_err(|e| BackupError::io_error(e, "Failed to finish archive"))?;
    let mut writer = encoder
        .finish()
        .map_err(|e| BackupError::io_error(e, "Failed to finish compression"))?;
    writer
        .flush()
        .map_err(|e| BackupError::io_error(e, "Failed to flush archive"))?;

    Ok(())
}

fn add_dir_to_archive<W: Write>(builder: &mut Builder<W>, base_dir: &Path, current_dir: &Path) -> BackupResult<()> {
    let mut entries: Vec<_> = fs::read_dir(current_dir)
        .map_err(|e| BackupError::io_error(e, format!("Failed to read directory: {}", current_dir.display())))?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let relative_path = path.strip_prefix(base_dir).unwrap_or(&path);
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(_) => continue,
        };

        if file_type.is_dir() {
            builder.append_dir(relative_path, &path).map_err(|e| {
                BackupError::io_error(e, format!("Failed to add directory to archive: {}", path.display()))
            })?;
            add_dir_to_archive(builder, base_dir, &path)?;
        } else {
            builder.append_path_with_name(&path, relative_path).map_err(|e| {
                BackupError::io_error(e, format!("Failed to add file to archive: {}", path.display()))
            })?;
        }
    }

    Ok(())
}

/// Copy `src` into `dst`, counting instead of propagating per-entry failures
fn copy_dir_best_effort(src: &Path, dst: &Path, warnings: &mut usize) {
    if fs::create_dir_all(dst).is_err() {
        *warnings += 1;
        return;
    }
    let entries = match fs::read_dir(src) {
        Ok(entries) => entries,
        Err(_) => {
            *warnings += 1;
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => {
                *warnings += 1;
                continue;
            }
        };
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        match entry.file_type() {
            Ok(t) if t.is_dir() => copy_dir_best_effort(&src_path, &dst_path, warnings),
            Ok(t) if t.is_symlink() => {
                let copied = fs::read_link(&src_path).and_then(|target| symlink(&target, &dst_path));
                if copied.is_err() {
                    *warnings += 1;
                }
            }
            Ok(_) => {
                if fs::copy(&src_path, &dst_path).is_err() {
                    *warnings += 1;
                }
            }
            Err(_) => *warnings += 1,
        }
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    fs::copy(target, link).map(|_| ())
}

/// RAII guard for cleaning up snapshot directories.
struct CleanupGuard<'a> {
    path: &'a Path,
}

impl<'a> CleanupGuard<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path }
    }
}

impl<'a> Drop for CleanupGuard<'a> {
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = fs::remove_dir_all(self.path);
        }
    }
}

/// Archival backend for one service
pub struct ArchivalBackend {
    service: ServiceKind,
    data_dir: PathBuf,
    definitions: Option<DefinitionsExporter>,
}

impl ArchivalBackend {
    pub fn new(service: ServiceKind, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            data_dir: data_dir.into(),
            definitions: None,
        }
    }

    /// Export broker definitions before archiving
    pub fn with_definitions(mut self, exporter: DefinitionsExporter) -> Self {
        self.definitions = Some(exporter);
        self
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Back up the service; never fails the caller
    pub async fn run(&self, ctx: &RunContext, relay: &StagingRelay) -> BackupAttempt {
        let timer = Timer::new();
        let unit = Unit::Service(self.service);
        let service = self.service.as_str();
        log_event_with_fields(Event::BackupStart, &[("service", service)]);

        if let Some(exporter) = &self.definitions {
            if let Err(e) = exporter.export(&ctx.target_dir(self.service), &ctx.timestamp).await {
                let reason = e.to_string();
                log_event_with_fields(
                    Event::DefinitionsExportFailed,
                    &[("service", service), ("reason", reason.as_str())],
                );
            }
        }

        let data_dir = self.data_dir.clone();
        let work_dir = ctx.work_dir(self.service);
        let timestamp = ctx.timestamp.clone();
        let archived = tokio::task::spawn_blocking(move || archive(&data_dir, &work_dir, &timestamp))
            .await
            .unwrap_or_else(|e| Err(BackupError::archive_failed(format!("archive task failed: {}", e))));

        let outcome = match archived {
            Ok(outcome) if outcome.ok => outcome,
            Ok(outcome) => {
                return self.failed(ctx, &timer, format!("Archive missing after backup: {}", outcome.path.display()))
            }
            Err(e) => return self.failed(ctx, &timer, format!("Backup failed: {}", e)),
        };

        if outcome.copy_warnings > 0 {
            let count = outcome.copy_warnings.to_string();
            log_event_with_fields(
                Event::ArchiveCopyWarnings,
                &[("service", service), ("skipped_entries", count.as_str())],
            );
        }

        let (path, size_bytes) = if ctx.is_staging() {
            let target = ctx.target_dir(self.service).join(archive_file_name(&ctx.timestamp));
            match relay.relocate(&outcome.path, &target).await {
                Ok(relayed) => (relayed.path, relayed.size_bytes),
                Err(e) => return self.failed(ctx, &timer, format!("Staging relay failed: {}", e)),
            }
        } else {
            (outcome.path, outcome.size_bytes)
        };

        let size = size_bytes.to_string();
        let secs = timer.elapsed_secs().to_string();
        log_event_with_fields(
            Event::BackupComplete,
            &[("service", service), ("size_bytes", size.as_str()), ("duration_secs", secs.as_str())],
        );

        let message = if outcome.copy_warnings > 0 {
            format!("Backup completed with {} entries not copied", outcome.copy_warnings)
        } else {
            "Backup completed".to_string()
        };
        BackupAttempt::success(&unit, ctx, message, &path, size_bytes, timer.elapsed())
    }

    fn failed(&self, ctx: &RunContext, timer: &Timer, message: String) -> BackupAttempt {
        let category = classify(&FailureSignals::from_message(&message));
        log_event_with_fields(
            Event::BackupFailed,
            &[
                ("service", self.service.as_str()),
                ("category", category.as_str()),
                ("reason", message.as_str()),
            ],
        );
        BackupAttempt::failure(&Unit::Service(self.service), ctx, category, message, timer.elapsed())
    }
}
