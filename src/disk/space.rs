//! Free-space guard via `df`.
//!
//! The guard fails open: it answers false only when a parsed available-byte
//! count is strictly below the requirement.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use super::{FilesystemProbe, SpaceCheck};
use crate::observability::{log_event_with_fields, Event};

/// `df` block-size flags tried in order, largest unit first, with the block
/// size in bytes each one reports in.
pub const DF_UNITS: &[(&str, u64)] = &[
    ("-BG", 1024 * 1024 * 1024),
    ("-BM", 1024 * 1024),
    ("-k", 1024),
];

/// Parse the available-blocks column from POSIX `df -P` output.
///
/// Takes the last non-empty line, fourth column, strips a trailing unit
/// suffix and returns blocks multiplied by `block_size`.
pub fn parse_df_output(output: &str, block_size: u64) -> Option<u64> {
    let line = output.lines().rev().find(|l| !l.trim().is_empty())?;
    let column = line.split_whitespace().nth(3)?;
    let digits = column.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let blocks: u64 = digits.parse().ok()?;
    Some(blocks.saturating_mul(block_size))
}

/// Decide from an optional available-byte count
pub fn decide(required_bytes: u64, available_bytes: Option<u64>) -> bool {
    match available_bytes {
        Some(available) => required_bytes <= available,
        None => true,
    }
}

/// Space guard that skips remote-gateway mounts
pub struct DiskSpaceGuard {
    probe: Box<dyn FilesystemProbe>,
    program: String,
}

impl DiskSpaceGuard {
    pub fn new(probe: Box<dyn FilesystemProbe>) -> Self {
        Self {
            probe,
            program: "df".to_string(),
        }
    }

    /// Use a different `df`-compatible program
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Directory whose filesystem holds `path`; None if nothing exists there
    fn containing_dir(path: &Path) -> Option<PathBuf> {
        if path.is_dir() {
            return Some(path.to_path_buf());
        }
        path.parent()
            .filter(|p| p.is_dir())
            .map(Path::to_path_buf)
    }

    /// Available bytes at `dir`, trying each block unit until one parses
    async fn available_bytes(&self, dir: &Path) -> Option<u64> {
        for (flag, block_size) in DF_UNITS {
            let output = Command::new(&self.program)
                .arg("-P")
                .arg(flag)
                .arg(dir)
                .kill_on_drop(true)
                .output()
                .await;

            let out = match output {
                Ok(out) => out,
                // tool missing; smaller units will not help
                Err(_) => return None,
            };
            if !out.status.success() {
                continue;
            }
            if let Some(bytes) = parse_df_output(&String::from_utf8_lossy(&out.stdout), *block_size) {
                return Some(bytes);
            }
        }
        None
    }
}

#[async_trait]
impl SpaceCheck for DiskSpaceGuard {
    async fn has_space(&self, required_bytes: u64, path: &Path) -> bool {
        let dir = match Self::containing_dir(path) {
            Some(dir) => dir,
            None => return true,
        };

        if self.probe.is_remote_gateway(&dir).await {
            return true;
        }

        let available = self.available_bytes(&dir).await;
        let ok = decide(required_bytes, available);
        if !ok {
            let required = required_bytes.to_string();
            let available = available.unwrap_or(0).to_string();
            let dir = dir.display().to_string();
            log_event_with_fields(
                Event::DiskSpaceInsufficient,
                &[
                    ("path", dir.as_str()),
                    ("required_bytes", required.as_str()),
                    ("available_bytes", available.as_str()),
                ],
            );
        }
        ok
    }
}
