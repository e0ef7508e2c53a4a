//! Runtime configuration.
//!
//! Built from an optional TOML file, then overlaid by environment
//! variables, then validated as a whole. Every field has a default, so an
//! empty environment yields a usable configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backup::postgres::{DumpSettings, PgConnection};
use crate::backup::RetentionPolicy;
use crate::config_validator::{format_validation_errors, ConfigValidationError, ConfigValidator};
use crate::observability::{log_event_with_fields, Event};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration:\n{}", format_validation_errors(.0))]
    Invalid(Vec<ConfigValidationError>),
}

/// Relational engine connection and container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database used for catalog queries
    pub database: String,
    pub container: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "postgres".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            container: "postgres".to_string(),
        }
    }
}

/// Broker data directory, management API and container
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RabbitmqConfig {
    pub host: String,
    pub management_port: u16,
    pub user: String,
    pub password: String,
    pub data_dir: PathBuf,
    pub container: String,
}

impl Default for RabbitmqConfig {
    fn default() -> Self {
        Self {
            host: "rabbitmq".to_string(),
            management_port: 15672,
            user: "guest".to_string(),
            password: "guest".to_string(),
            data_dir: PathBuf::from("/var/lib/rabbitmq"),
            container: "rabbitmq".to_string(),
        }
    }
}

impl RabbitmqConfig {
    pub fn management_url(&self) -> String {
        format!("http://{}:{}", self.host, self.management_port)
    }
}

/// Data directory and container of a volume-archived service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub data_dir: PathBuf,
    pub container: String,
}

fn default_loki() -> VolumeConfig {
    VolumeConfig {
        data_dir: PathBuf::from("/loki"),
        container: "loki".to_string(),
    }
}

fn default_grafana() -> VolumeConfig {
    VolumeConfig {
        data_dir: PathBuf::from("/var/lib/grafana"),
        container: "grafana".to_string(),
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Final artifact root
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,

    /// Local scratch used when the root is a remote-gateway mount
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Five-field cron expression
    #[serde(default = "default_schedule")]
    pub schedule: String,

    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Age after which engine error sidecars are removed
    #[serde(default = "default_error_log_retention_days")]
    pub error_log_retention_days: u32,

    /// Wall-clock bound per database dump
    #[serde(default = "default_dump_timeout_secs")]
    pub dump_timeout_secs: u64,

    #[serde(default)]
    pub postgres: PostgresConfig,

    #[serde(default)]
    pub rabbitmq: RabbitmqConfig,

    #[serde(default = "default_loki")]
    pub loki: VolumeConfig,

    #[serde(default = "default_grafana")]
    pub grafana: VolumeConfig,

    /// Notification base URL; unset disables notification
    #[serde(default)]
    pub notify_target: Option<String>,

    /// `production` selects the live webhook path
    #[serde(default = "default_deploy_env")]
    pub deploy_env: String,
}

fn default_backup_root() -> PathBuf {
    PathBuf::from("/backups")
}
fn default_scratch_dir() -> PathBuf {
    PathBuf::from("/tmp/stackback-staging")
}
fn default_schedule() -> String {
    "0 3 * * *".to_string()
}
fn default_error_log_retention_days() -> u32 {
    30
}
fn default_dump_timeout_secs() -> u64 {
    3600
}
fn default_deploy_env() -> String {
    "development".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_root: default_backup_root(),
            scratch_dir: default_scratch_dir(),
            schedule: default_schedule(),
            retention: RetentionPolicy::default(),
            error_log_retention_days: default_error_log_retention_days(),
            dump_timeout_secs: default_dump_timeout_secs(),
            postgres: PostgresConfig::default(),
            rabbitmq: RabbitmqConfig::default(),
            loki: default_loki(),
            grafana: default_grafana(),
            notify_target: None,
            deploy_env: default_deploy_env(),
        }
    }
}

/// Parse a numeric variable, recording a validation error when malformed
fn env_number<T: FromStr>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &str,
    v: &mut ConfigValidator,
) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            v.invalid(key, &raw, "Value must be a non-negative integer");
            None
        }
    }
}

impl Config {
    /// Load from `path` (if any) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_sources(path, &|key: &str| std::env::var(key).ok())
    }

    /// Load from `path` (if any) and an arbitrary variable lookup
    pub fn from_sources(path: Option<&Path>, env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        let mut v = ConfigValidator::new();
        config.apply_env(env, &mut v);
        config.validate_with(&mut v);
        v.finish().map_err(ConfigError::Invalid)?;

        let root = config.backup_root.display().to_string();
        log_event_with_fields(
            Event::ConfigLoaded,
            &[("backup_root", root.as_str()), ("schedule", config.schedule.as_str())],
        );
        Ok(config)
    }

    /// Parse a TOML file without environment overlay or validation
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>, v: &mut ConfigValidator) {
        if let Some(n) = env_number(env, "BACKUP_RETENTION_DAYS", v) {
            self.retention.daily_days = n;
        }
        if let Some(n) = env_number(env, "BACKUP_RETENTION_WEEKS", v) {
            self.retention.weekly_count = n;
        }
        if let Some(n) = env_number(env, "ERROR_LOG_RETENTION_DAYS", v) {
            self.error_log_retention_days = n;
        }
        if let Some(n) = env_number(env, "PG_DUMP_TIMEOUT", v) {
            self.dump_timeout_secs = n;
        }
        if let Some(n) = env_number(env, "POSTGRES_PORT", v) {
            self.postgres.port = n;
        }
        if let Some(n) = env_number(env, "RABBITMQ_MGMT_PORT", v) {
            self.rabbitmq.management_port = n;
        }

        let paths: [(&str, &mut PathBuf); 5] = [
            ("BACKUP_ROOT", &mut self.backup_root),
            ("BACKUP_SCRATCH_DIR", &mut self.scratch_dir),
            ("RABBITMQ_DATA_DIR", &mut self.rabbitmq.data_dir),
            ("LOKI_DATA_DIR", &mut self.loki.data_dir),
            ("GRAFANA_DATA_DIR", &mut self.grafana.data_dir),
        ];
        for (key, slot) in paths {
            if let Some(value) = env(key) {
                *slot = PathBuf::from(value);
            }
        }

        let strings: [(&str, &mut String); 13] = [
            ("BACKUP_SCHEDULE", &mut self.schedule),
            ("POSTGRES_HOST", &mut self.postgres.host),
            ("POSTGRES_USER", &mut self.postgres.user),
            ("POSTGRES_PASSWORD", &mut self.postgres.password),
            ("POSTGRES_DB", &mut self.postgres.database),
            ("POSTGRES_CONTAINER", &mut self.postgres.container),
            ("RABBITMQ_HOST", &mut self.rabbitmq.host),
            ("RABBITMQ_USER", &mut self.rabbitmq.user),
            ("RABBITMQ_PASSWORD", &mut self.rabbitmq.password),
            ("RABBITMQ_CONTAINER", &mut self.rabbitmq.container),
            ("LOKI_CONTAINER", &mut self.loki.container),
            ("GRAFANA_CONTAINER", &mut self.grafana.container),
            ("DEPLOY_ENV", &mut self.deploy_env),
        ];
        for (key, slot) in strings {
            if let Some(value) = env(key) {
                *slot = value;
            }
        }

        if let Some(target) = env("NOTIFY_TARGET") {
            self.notify_target = Some(target).filter(|t| !t.trim().is_empty());
        }
    }

    fn validate_with(&self, v: &mut ConfigValidator) {
        v.validate_non_empty("backup_root", &self.backup_root.to_string_lossy())
            .validate_absolute("backup_root", &self.backup_root)
            .validate_is_directory("backup_root", &self.backup_root)
            .validate_absolute("scratch_dir", &self.scratch_dir)
            .validate_schedule("schedule", &self.schedule)
            .validate_positive("dump_timeout_secs", self.dump_timeout_secs.min(i64::MAX as u64) as i64)
            .validate_port("postgres.port", self.postgres.port)
            .validate_non_empty("postgres.host", &self.postgres.host)
            .validate_non_empty("postgres.user", &self.postgres.user)
            .validate_port("rabbitmq.management_port", self.rabbitmq.management_port)
            .validate_non_empty("rabbitmq.data_dir", &self.rabbitmq.data_dir.to_string_lossy())
            .validate_non_empty("loki.data_dir", &self.loki.data_dir.to_string_lossy())
            .validate_non_empty("grafana.data_dir", &self.grafana.data_dir.to_string_lossy())
            .validate_url("notify_target", self.notify_target.as_deref().unwrap_or(""));
    }

    /// Validate an already-built configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut v = ConfigValidator::new();
        self.validate_with(&mut v);
        v.finish().map_err(ConfigError::Invalid)
    }

    pub fn is_production(&self) -> bool {
        self.deploy_env == "production"
    }

    pub fn pg_connection(&self) -> PgConnection {
        PgConnection {
            host: self.postgres.host.clone(),
            port: self.postgres.port,
            user: self.postgres.user.clone(),
            password: self.postgres.password.clone(),
            database: self.postgres.database.clone(),
        }
    }

    pub fn dump_settings(&self) -> DumpSettings {
        DumpSettings {
            timeout: Duration::from_secs(self.dump_timeout_secs),
            ..DumpSettings::default()
        }
    }
}
