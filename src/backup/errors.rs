//! Backup error types for stackback.
//!
//! Error codes follow the STACKBACK_CATEGORY_NAME format.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Backup error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupErrorCode {
    /// Archive creation failed
    ArchiveFailed,
    /// Engine catalog query failed
    CatalogQueryFailed,
    /// Dump subprocess failed
    DumpFailed,
    /// Compression of a dump failed
    CompressionFailed,
    /// Integrity verification failed
    VerificationFailed,
    /// Artifact not found
    NotFound,
    /// Status record could not be read or written
    StatusRecordFailed,
    /// I/O error during backup
    IoError,
    /// Invalid backup configuration
    InvalidConfig,
    /// Backup directory not accessible
    DirNotAccessible,
}

impl BackupErrorCode {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupErrorCode::ArchiveFailed => "STACKBACK_ARCHIVE_FAILED",
            BackupErrorCode::CatalogQueryFailed => "STACKBACK_CATALOG_QUERY_FAILED",
            BackupErrorCode::DumpFailed => "STACKBACK_DUMP_FAILED",
            BackupErrorCode::CompressionFailed => "STACKBACK_COMPRESSION_FAILED",
            BackupErrorCode::VerificationFailed => "STACKBACK_VERIFICATION_FAILED",
            BackupErrorCode::NotFound => "STACKBACK_NOT_FOUND",
            BackupErrorCode::StatusRecordFailed => "STACKBACK_STATUS_RECORD_FAILED",
            BackupErrorCode::IoError => "STACKBACK_IO_ERROR",
            BackupErrorCode::InvalidConfig => "STACKBACK_INVALID_CONFIG",
            BackupErrorCode::DirNotAccessible => "STACKBACK_DIR_NOT_ACCESSIBLE",
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            BackupErrorCode::NotFound => Severity::Warning,
            BackupErrorCode::InvalidConfig => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for BackupErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity level for backup errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Backup error with context
#[derive(Debug)]
pub struct BackupError {
    code: BackupErrorCode,
    message: String,
    path: Option<PathBuf>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackupError {
    /// Create a new backup error
    pub fn new(code: BackupErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Attach path context
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach an underlying error
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Archive creation failed
    pub fn archive_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::ArchiveFailed, message)
    }

    /// Catalog query failed
    pub fn catalog_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::CatalogQueryFailed, message)
    }

    /// Dump failed
    pub fn dump_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::DumpFailed, message)
    }

    /// Compression failed
    pub fn compression_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::CompressionFailed, message)
    }

    /// Integrity verification failed
    pub fn verification_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::VerificationFailed, message)
    }

    /// Artifact not found
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(
            BackupErrorCode::NotFound,
            format!("Backup not found: {}", what.into()),
        )
    }

    /// Status record failure
    pub fn status_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::StatusRecordFailed, message)
    }

    /// I/O error
    pub fn io_error(err: io::Error, context: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::IoError, context).with_source(err)
    }

    /// I/O error at a specific path
    pub fn io_error_at_path(err: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::io_error(err, format!("I/O error at {}", path.display())).with_path(path)
    }

    /// Invalid configuration
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::InvalidConfig, message)
    }

    /// Directory not accessible
    pub fn dir_not_accessible(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(
            BackupErrorCode::DirNotAccessible,
            format!("Backup directory not accessible: {}", path.display()),
        )
        .with_path(path)
    }

    /// Get the error code
    pub fn code(&self) -> BackupErrorCode {
        self.code
    }

    /// Get the message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the path if present
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Check if error is fatal
    pub fn is_fatal(&self) -> bool {
        matches!(self.code.severity(), Severity::Fatal)
    }
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code, self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for BackupError {
    fn from(err: io::Error) -> Self {
        Self::io_error(err, "I/O operation failed")
    }
}

/// Result type for backup operations
pub type BackupResult<T> = Result<T, BackupError>;
