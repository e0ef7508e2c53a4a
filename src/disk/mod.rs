//! Filesystem inspection: remote-gateway detection and free-space checks.
//!
//! Both checks shell out to platform tools and never fail the caller. A probe
//! that cannot tell answers "not remote"; a space check that cannot tell
//! answers "enough space".

mod probe;
mod space;

pub use probe::{is_remote_fs_type, SystemProbe, REMOTE_GATEWAY_FS_TYPES};
pub use space::{decide, parse_df_output, DiskSpaceGuard, DF_UNITS};

use std::path::Path;

use async_trait::async_trait;

/// Detects object-storage gateway mounts
#[async_trait]
pub trait FilesystemProbe: Send + Sync {
    /// Whether `path` is backed by a remote-gateway filesystem.
    ///
    /// Returns false when the inspection tool is missing or fails.
    async fn is_remote_gateway(&self, path: &Path) -> bool;
}

/// Best-effort free-space check
#[async_trait]
pub trait SpaceCheck: Send + Sync {
    /// Whether `required_bytes` fit at `path`. Never errors.
    async fn has_space(&self, required_bytes: u64, path: &Path) -> bool;
}
