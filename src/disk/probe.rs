//! Remote-gateway mount detection via `findmnt`.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use super::FilesystemProbe;

/// Filesystem types reported by object-storage gateway mounts
pub const REMOTE_GATEWAY_FS_TYPES: &[&str] = &["fuse.s3fs"];

/// Whether a reported filesystem type is a remote gateway
pub fn is_remote_fs_type(fs_type: &str) -> bool {
    let fs_type = fs_type.trim();
    REMOTE_GATEWAY_FS_TYPES.iter().any(|t| *t == fs_type)
}

/// Probe backed by the system's `findmnt`
#[derive(Debug, Clone)]
pub struct SystemProbe {
    program: String,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            program: "findmnt".to_string(),
        }
    }

    /// Use a different inspection program (same CLI as `findmnt`)
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FilesystemProbe for SystemProbe {
    async fn is_remote_gateway(&self, path: &Path) -> bool {
        let output = Command::new(&self.program)
            .args(["-n", "-o", "FSTYPE", "--target"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .lines()
                .next()
                .map(is_remote_fs_type)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_remote_fs_types() {
        assert!(is_remote_fs_type("fuse.s3fs"));
        assert!(is_remote_fs_type("fuse.s3fs\n"));
        assert!(!is_remote_fs_type("ext4"));
        assert!(!is_remote_fs_type("nfs4"));
        assert!(!is_remote_fs_type(""));
    }

    #[tokio::test]
    async fn test_missing_tool_is_not_remote() {
        let probe = SystemProbe::with_program("definitely-not-a-real-findmnt");
        let dir = TempDir::new().unwrap();
        assert!(!probe.is_remote_gateway(dir.path()).await);
    }

    #[tokio::test]
    async fn test_failing_tool_is_not_remote() {
        let probe = SystemProbe::with_program("false");
        let dir = TempDir::new().unwrap();
        assert!(!probe.is_remote_gateway(dir.path()).await);
    }
}
