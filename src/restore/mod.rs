//! # Restore Module
//!
//! The inverse of the backup layout: pick an artifact, verify it, and put
//! it back.
//!
//! - Archival services: stop the container, clear the data directory,
//!   extract the archive in place, start the container.
//! - Relational engine: stream-decompress the dump into `psql` for one
//!   database.

pub mod confirm;

pub use confirm::{ConfirmationResult, RestoreGuard, RestoreOperation};

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;

use flate2::read::GzDecoder;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::backup::integrity::verify_gzip;
use crate::backup::postgres::RelationalEngine;
use crate::backup::retention::{artifact_family, is_artifact};
use crate::backup::{partition_dir, Partition, ServiceKind};
use crate::container::{ContainerControl, ContainerError};
use crate::observability::{log_event_with_fields, Event, Logger};

/// Token selecting the most recent artifact
pub const LATEST: &str = "latest";

/// Restore errors
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("no {what} backup found under {root}")]
    NotFound { what: String, root: PathBuf },
    #[error("artifact does not exist: {0}")]
    MissingArtifact(PathBuf),
    #[error("artifact failed integrity check: {path}")]
    Integrity {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("a database name is required to restore postgresql")]
    DatabaseRequired,
    #[error("restore not confirmed")]
    NotConfirmed,
    #[error("container control failed: {0}")]
    Container(#[from] ContainerError),
    #[error("restore I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("database restore failed: {0}")]
    Engine(String),
}

/// Where an archival service's data lives
#[derive(Debug, Clone)]
pub struct ArchiveTarget {
    pub service: ServiceKind,
    pub data_dir: PathBuf,
    pub container: String,
}

/// Resolve `selector` to an artifact path.
///
/// `latest` picks the most recently modified matching artifact across the
/// service's daily and weekly partitions; anything else is a path.
pub fn resolve_artifact(
    root: &Path,
    service: ServiceKind,
    selector: &str,
    database: Option<&str>,
) -> Result<PathBuf, RestoreError> {
    if selector != LATEST {
        let path = PathBuf::from(selector);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(RestoreError::MissingArtifact(path))
        };
    }

    let family = match (service, database) {
        (ServiceKind::Postgresql, Some(db)) => format!("{}.sql.gz", db),
        (ServiceKind::Postgresql, None) => return Err(RestoreError::DatabaseRequired),
        _ => "backup.tar.gz".to_string(),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for partition in Partition::ALL {
        let dir = partition_dir(root, service, partition);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_artifact(&name) || artifact_family(&name) != family {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }
    }

    newest.map(|(_, path)| path).ok_or_else(|| RestoreError::NotFound {
        what: database.map_or_else(|| service.to_string(), |db| format!("{}/{}", service, db)),
        root: root.to_path_buf(),
    })
}

async fn verify(path: &Path) -> Result<(), RestoreError> {
    let owned = path.to_path_buf();
    let checked = tokio::task::spawn_blocking(move || verify_gzip(&owned))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    checked.map(|_| ()).map_err(|source| RestoreError::Integrity {
        path: path.to_path_buf(),
        source,
    })
}

/// Remove everything inside `dir`, keeping `dir` itself
fn clear_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn extract(archive: &Path, dest: &Path) -> io::Result<()> {
    let decoder = GzDecoder::new(BufReader::new(File::open(archive)?));
    let mut tar = tar::Archive::new(decoder);
    tar.set_preserve_permissions(true);
    tar.unpack(dest)
}

/// Performs restores
pub struct Restorer {
    containers: Box<dyn ContainerControl>,
}

impl Restorer {
    pub fn new(containers: Box<dyn ContainerControl>) -> Self {
        Self { containers }
    }

    /// Replace a service's data directory with `artifact`
    pub async fn restore_archive(&self, target: &ArchiveTarget, artifact: &Path) -> Result<(), RestoreError> {
        let service = target.service.as_str();
        let shown = artifact.display().to_string();
        log_event_with_fields(Event::RestoreStart, &[("service", service), ("artifact", shown.as_str())]);

        if let Err(e) = verify(artifact).await {
            let reason = e.to_string();
            log_event_with_fields(Event::RestoreAborted, &[("service", service), ("reason", reason.as_str())]);
            return Err(e);
        }

        // an already stopped container is fine
        if let Err(e) = self.containers.stop(&target.container).await {
            let reason = e.to_string();
            Logger::warn("CONTAINER_STOP_FAILED", &[("container", target.container.as_str()), ("reason", reason.as_str())]);
        }

        let data_dir = target.data_dir.clone();
        let archive = artifact.to_path_buf();
        tokio::task::spawn_blocking(move || {
            clear_dir(&data_dir)?;
            extract(&archive, &data_dir)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;

        self.containers.start(&target.container).await?;

        log_event_with_fields(Event::RestoreComplete, &[("service", service), ("artifact", shown.as_str())]);
        Ok(())
    }

    /// Stream a compressed dump into `database`
    pub async fn restore_database(
        &self,
        engine: &dyn RelationalEngine,
        database: &str,
        artifact: &Path,
    ) -> Result<(), RestoreError> {
        let shown = artifact.display().to_string();
        log_event_with_fields(
            Event::RestoreStart,
            &[("service", "postgresql"), ("database", database), ("artifact", shown.as_str())],
        );

        if let Err(e) = verify(artifact).await {
            let reason = e.to_string();
            log_event_with_fields(Event::RestoreAborted, &[("database", database), ("reason", reason.as_str())]);
            return Err(e);
        }

        let mut child = engine
            .restore_command(database)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RestoreError::Engine(format!("cannot start restore client: {}", e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RestoreError::Engine("restore client has no stdin".to_string()))?;
        let diagnostics_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text).await;
                text
            })
        });

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(8);
        let path = artifact.to_path_buf();
        let reader = tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut decoder = GzDecoder::new(BufReader::new(File::open(&path)?));
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = decoder.read(&mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    // client went away; its exit status reports why
                    return Ok(());
                }
            }
        });

        let mut write_error = None;
        while let Some(chunk) = rx.recv().await {
            if let Err(e) = stdin.write_all(&chunk).await {
                write_error = Some(e);
                break;
            }
        }
        drop(rx);
        drop(stdin);

        let decoded = reader.await.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let status = child.wait().await?;

        let diagnostics = match diagnostics_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            return Err(RestoreError::Engine(format!(
                "restore client exited with {}: {}",
                status,
                diagnostics.trim()
            )));
        }
        decoded?;
        if let Some(e) = write_error {
            return Err(RestoreError::Io(e));
        }

        log_event_with_fields(
            Event::RestoreComplete,
            &[("service", "postgresql"), ("database", database), ("artifact", shown.as_str())],
        );
        Ok(())
    }
}
