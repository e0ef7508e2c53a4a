//! Staging relay: move a locally written artifact to its final, possibly
//! remote-backed, location with integrity verification.
//!
//! The destination is written as `{final}.tmp` and renamed into place only
//! after size and checksum match the local copy. On any mismatch the
//! destination is removed and the local copy kept.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::errors::{BackupError, BackupResult};
use super::integrity::{file_size, sha256_file, verify_gzip};
use crate::observability::{log_event_with_fields, Event};

/// Copy function used by the relay
pub type Copier = fn(&Path, &Path) -> io::Result<u64>;

fn default_copy(from: &Path, to: &Path) -> io::Result<u64> {
    fs::copy(from, to)
}

/// Result of a successful relocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Final artifact path
    pub path: PathBuf,
    /// Size verified at the destination
    pub size_bytes: u64,
    /// False when only sizes could be compared
    pub checksum_verified: bool,
}

/// Scratch-to-final relay
#[derive(Clone, Copy)]
pub struct StagingRelay {
    copier: Copier,
}

impl Default for StagingRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingRelay {
    pub fn new() -> Self {
        Self {
            copier: default_copy,
        }
    }

    /// Relay using a custom copy function
    pub fn with_copier(copier: Copier) -> Self {
        Self { copier }
    }

    /// Relocate `local` to `final_path`
    pub async fn relocate(&self, local: &Path, final_path: &Path) -> BackupResult<RelayOutcome> {
        let relay = *self;
        let local = local.to_path_buf();
        let final_path = final_path.to_path_buf();

        tokio::task::spawn_blocking(move || relay.relocate_blocking(&local, &final_path))
            .await
            .map_err(|e| BackupError::verification_failed(format!("relay task failed: {}", e)))?
    }

    fn relocate_blocking(&self, local: &Path, final_path: &Path) -> BackupResult<RelayOutcome> {
        if is_gzip(local) {
            verify_gzip(local).map_err(|e| {
                BackupError::verification_failed("local artifact failed gzip integrity check")
                    .with_path(local)
                    .with_source(e)
            })?;
        }

        let local_size = fs::metadata(local)
            .map_err(|e| BackupError::io_error_at_path(e, local))?
            .len();
        let local_sum = sha256_file(local).ok();

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BackupError::io_error_at_path(e, parent))?;
        }
        let tmp = tmp_path(final_path);

        if let Err(e) = (self.copier)(local, &tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(relay_failed(final_path, "copy failed").with_source(e));
        }

        let dest_size = file_size(&tmp);
        if dest_size != local_size {
            let _ = fs::remove_file(&tmp);
            return Err(relay_failed(
                final_path,
                &format!("size mismatch: local {} bytes, destination {} bytes", local_size, dest_size),
            ));
        }

        let dest_sum = sha256_file(&tmp).ok();
        let checksum_verified = match (&local_sum, &dest_sum) {
            (Some(l), Some(d)) if l != d => {
                let _ = fs::remove_file(&tmp);
                return Err(relay_failed(final_path, "checksum mismatch"));
            }
            (Some(_), Some(_)) => true,
            _ => false,
        };

        fs::rename(&tmp, final_path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            BackupError::io_error_at_path(e, final_path)
        })?;

        // the final copy is the artifact of record from here on
        let _ = fs::remove_file(local);

        let path = final_path.display().to_string();
        let size = dest_size.to_string();
        if checksum_verified {
            log_event_with_fields(
                Event::StagingVerified,
                &[("path", path.as_str()), ("size_bytes", size.as_str())],
            );
        } else {
            log_event_with_fields(
                Event::StagingReducedConfidence,
                &[
                    ("path", path.as_str()),
                    ("size_bytes", size.as_str()),
                    ("reason", "checksum unavailable, size-only verification"),
                ],
            );
        }

        Ok(RelayOutcome {
            path: final_path.to_path_buf(),
            size_bytes: dest_size,
            checksum_verified,
        })
    }
}

fn relay_failed(final_path: &Path, reason: &str) -> BackupError {
    let path = final_path.display().to_string();
    log_event_with_fields(Event::StagingFailed, &[("path", path.as_str()), ("reason", reason)]);
    BackupError::verification_failed(format!("staging relay failed: {}", reason)).with_path(final_path)
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// `{path}.tmp`
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::integrity::gzip_file;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_artifact(dir: &Path) -> PathBuf {
        let raw = dir.join("app_db.sql");
        let gz = dir.join("app_db-2026-10-18T03-00-00-000Z.sql.gz");
        fs::write(&raw, "CREATE TABLE accounts (id int);\n".repeat(200)).unwrap();
        gzip_file(&raw, &gz).unwrap();
        fs::remove_file(&raw).unwrap();
        gz
    }

    fn append_byte(from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)?;
        let mut f = fs::OpenOptions::new().append(true).open(to)?;
        f.write_all(b"x")?;
        Ok(fs::metadata(to)?.len())
    }

    fn flip_last_byte(from: &Path, to: &Path) -> io::Result<u64> {
        let mut bytes = fs::read(from)?;
        if let Some(last) = bytes.last_mut() {
            *last ^= 0xff;
        }
        fs::write(to, &bytes)?;
        Ok(bytes.len() as u64)
    }

    #[tokio::test]
    async fn test_round_trip_preserves_checksum_and_size() {
        let scratch = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let local = make_artifact(scratch.path());
        let sum = sha256_file(&local).unwrap();
        let size = file_size(&local);
        let dest = remote.path().join("postgresql/daily").join(local.file_name().unwrap());

        let outcome = StagingRelay::new().relocate(&local, &dest).await.unwrap();

        assert_eq!(outcome.path, dest);
        assert_eq!(outcome.size_bytes, size);
        assert!(outcome.checksum_verified);
        assert_eq!(sha256_file(&dest).unwrap(), sum);
        assert!(!local.exists());
        assert!(!tmp_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_size_mismatch_keeps_local() {
        let scratch = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let local = make_artifact(scratch.path());
        let dest = remote.path().join("x.sql.gz");

        let err = StagingRelay::with_copier(append_byte)
            .relocate(&local, &dest)
            .await
            .unwrap_err();

        assert!(err.message().contains("size mismatch"));
        assert!(local.exists());
        assert!(!dest.exists());
        assert!(!tmp_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_keeps_local() {
        let scratch = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let local = make_artifact(scratch.path());
        let dest = remote.path().join("x.sql.gz");

        let err = StagingRelay::with_copier(flip_last_byte)
            .relocate(&local, &dest)
            .await
            .unwrap_err();

        assert!(err.message().contains("checksum mismatch"));
        assert!(local.exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_corrupt_local_is_never_copied() {
        let scratch = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let local = scratch.path().join("broken.tar.gz");
        fs::write(&local, b"\x1f\x8b\x08\x00garbage").unwrap();
        let dest = remote.path().join("broken.tar.gz");

        assert!(StagingRelay::new().relocate(&local, &dest).await.is_err());
        assert!(local.exists());
        assert!(!dest.exists());
    }
}
