//! CLI command implementations
//!
//! `run` never returns an error once configuration is valid: its result is
//! the failure count. The other commands map failures onto [`CliError`].

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use chrono::{Local, SecondsFormat};

use crate::backup::postgres::PgCli;
use crate::backup::scheduler::BackupScheduler;
use crate::backup::ServiceKind;
use crate::config::Config;
use crate::container::{ContainerControl, DockerCli};
use crate::orchestrator::Orchestrator;
use crate::restore::{resolve_artifact, ArchiveTarget, ConfirmationResult, RestoreGuard, RestoreOperation, Restorer};
use crate::status::StatusLedger;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Load configuration and run `command`; returns the process exit status
pub async fn execute(command: Command, config_path: Option<PathBuf>) -> CliResult<i32> {
    let config = Config::load(config_path.as_deref()).map_err(|e| CliError::config_error(e.to_string()))?;
    dispatch(command, &config).await
}

/// Run `command` against an already-loaded configuration
pub async fn dispatch(command: Command, config: &Config) -> CliResult<i32> {
    match command {
        Command::Run => run_backup(config).await,
        Command::Status => {
            print_status(config, &mut io::stdout())?;
            Ok(0)
        }
        Command::NextRun => {
            println!("{}", next_run(config)?);
            Ok(0)
        }
        Command::Restore {
            service,
            artifact,
            database,
            yes,
        } => {
            let request = RestoreRequest {
                service,
                artifact,
                database,
                yes,
            };
            let stdin = io::stdin();
            restore(config, &request, Box::new(DockerCli::new()), &mut stdin.lock(), &mut io::stdout()).await?;
            Ok(0)
        }
    }
}

async fn run_backup(config: &Config) -> CliResult<i32> {
    let orchestrator = Orchestrator::from_config(config).map_err(|e| CliError::config_error(e.to_string()))?;
    let report = orchestrator.run(Local::now()).await;
    println!("{}/{} services failed", report.failed, report.total);
    Ok(report.exit_code())
}

/// Write the current summary to `out`
pub fn print_status<W: Write>(config: &Config, out: &mut W) -> CliResult<()> {
    let ledger = StatusLedger::new(config.backup_root.join(crate::backup::STATUS_DIR_NAME));
    let summary = ledger
        .read_summary()
        .map_err(|e| CliError::status_unavailable(e.to_string()))?;
    let json = serde_json::to_string_pretty(&summary)
        .map_err(|e| CliError::status_unavailable(format!("cannot encode summary: {}", e)))?;
    writeln!(out, "{}", json).map_err(|e| CliError::status_unavailable(e.to_string()))
}

/// Next scheduled run from the configured schedule
pub fn next_run(config: &Config) -> CliResult<String> {
    let scheduler = BackupScheduler::new(&config.schedule).map_err(|e| CliError::config_error(e.to_string()))?;
    let next = scheduler
        .next_run(&Local::now())
        .map_err(|e| CliError::config_error(e.to_string()))?;
    Ok(next.to_rfc3339_opts(SecondsFormat::Secs, false))
}

/// Arguments of `stackback restore`
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub service: String,
    pub artifact: String,
    pub database: Option<String>,
    pub yes: bool,
}

/// Resolve, confirm and perform a restore
pub async fn restore<R: BufRead, W: Write>(
    config: &Config,
    request: &RestoreRequest,
    containers: Box<dyn ContainerControl>,
    input: &mut R,
    output: &mut W,
) -> CliResult<()> {
    let service = ServiceKind::parse(&request.service)
        .ok_or_else(|| CliError::usage_error(format!("unknown service: {}", request.service)))?;

    let database = request.database.as_deref();
    match (service, database) {
        (ServiceKind::Postgresql, None) => {
            return Err(CliError::usage_error("--database is required to restore postgresql"))
        }
        (ServiceKind::Postgresql, Some(_)) => {}
        (_, Some(_)) => return Err(CliError::usage_error("--database only applies to postgresql")),
        (_, None) => {}
    }

    let artifact = resolve_artifact(&config.backup_root, service, &request.artifact, database)
        .map_err(|e| CliError::restore_failed(e.to_string()))?;
    writeln!(output, "Restoring {} from {}", service, artifact.display())
        .map_err(|e| CliError::restore_failed(e.to_string()))?;

    let operation = if service.is_archival() {
        RestoreOperation::ArchiveRestore
    } else {
        RestoreOperation::DatabaseRestore
    };
    let mut guard = RestoreGuard::new(operation, service.as_str());
    if request.yes {
        guard = guard.assume_confirmed();
    }
    match guard
        .prompt(input, output)
        .map_err(|e| CliError::restore_failed(e.to_string()))?
    {
        ConfirmationResult::Confirmed => {}
        ConfirmationResult::PhraseNotMatch { expected } => {
            return Err(CliError::not_confirmed(format!("expected '{}', restore aborted", expected)))
        }
        ConfirmationResult::NotProvided { .. } => {
            return Err(CliError::not_confirmed("no confirmation given, restore aborted"))
        }
    }

    let restorer = Restorer::new(containers);
    let restored = match (service, database) {
        (ServiceKind::Postgresql, Some(db)) => {
            let engine = PgCli::new(config.pg_connection());
            restorer.restore_database(&engine, db, &artifact).await
        }
        _ => match archive_target(config, service) {
            Some(target) => restorer.restore_archive(&target, &artifact).await,
            None => return Err(CliError::usage_error(format!("{} is not restored from an archive", service))),
        },
    };
    restored.map_err(|e| CliError::restore_failed(e.to_string()))?;

    writeln!(output, "Restore of {} complete", service).map_err(|e| CliError::restore_failed(e.to_string()))
}

fn archive_target(config: &Config, service: ServiceKind) -> Option<ArchiveTarget> {
    let volume = match service {
        ServiceKind::Rabbitmq => (&config.rabbitmq.data_dir, &config.rabbitmq.container),
        ServiceKind::Loki => (&config.loki.data_dir, &config.loki.container),
        ServiceKind::Grafana => (&config.grafana.data_dir, &config.grafana.container),
        ServiceKind::Postgresql => return None,
    };
    Some(ArchiveTarget {
        service,
        data_dir: volume.0.clone(),
        container: volume.1.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::archive;
    use crate::backup::{partition_dir, Partition};
    use crate::cli::errors::CliErrorCode;
    use crate::container::ContainerError;
    use crate::status::BackupSummary;
    use async_trait::async_trait;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    struct NoContainers;

    #[async_trait]
    impl ContainerControl for NoContainers {
        async fn stop(&self, _name: &str) -> Result<(), ContainerError> {
            Ok(())
        }

        async fn start(&self, _name: &str) -> Result<(), ContainerError> {
            Ok(())
        }
    }

    fn config_at(root: &TempDir, data: &TempDir) -> Config {
        let mut config = Config::default();
        config.backup_root = root.path().to_path_buf();
        config.loki.data_dir = data.path().to_path_buf();
        config
    }

    fn request(service: &str, yes: bool) -> RestoreRequest {
        RestoreRequest {
            service: service.to_string(),
            artifact: "latest".to_string(),
            database: None,
            yes,
        }
    }

    fn seed_loki_backup(config: &Config, data: &TempDir) {
        fs::write(data.path().join("index"), b"v1").unwrap();
        let target = partition_dir(&config.backup_root, ServiceKind::Loki, Partition::Daily);
        archive(data.path(), &target, "2026-10-17T03-00-00-000Z").unwrap();
        fs::write(data.path().join("index"), b"v2").unwrap();
    }

    #[tokio::test]
    async fn test_restore_declined_leaves_data() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let config = config_at(&root, &data);
        seed_loki_backup(&config, &data);

        let mut input = Cursor::new(b"yes\n".to_vec());
        let mut output = Vec::new();
        let err = restore(&config, &request("loki", false), Box::new(NoContainers), &mut input, &mut output)
            .await
            .unwrap_err();

        assert_eq!(err.code(), CliErrorCode::NotConfirmed);
        assert_eq!(fs::read(data.path().join("index")).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_restore_latest_with_typed_phrase() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let config = config_at(&root, &data);
        seed_loki_backup(&config, &data);

        let mut input = Cursor::new(b"restore loki\n".to_vec());
        let mut output = Vec::new();
        restore(&config, &request("loki", false), Box::new(NoContainers), &mut input, &mut output)
            .await
            .unwrap();

        assert_eq!(fs::read(data.path().join("index")).unwrap(), b"v1");
        assert!(String::from_utf8(output).unwrap().contains("Restore of loki complete"));
    }

    #[tokio::test]
    async fn test_restore_usage_errors() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let config = config_at(&root, &data);
        let mut input = Cursor::new(Vec::new());
        let mut output = Vec::new();

        let err = restore(&config, &request("mysql", true), Box::new(NoContainers), &mut input, &mut output)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 64);

        let err = restore(&config, &request("postgresql", true), Box::new(NoContainers), &mut input, &mut output)
            .await
            .unwrap_err();
        assert_eq!(err.code(), CliErrorCode::UsageError);

        let err = restore(&config, &request("grafana", true), Box::new(NoContainers), &mut input, &mut output)
            .await
            .unwrap_err();
        assert_eq!(err.code(), CliErrorCode::RestoreFailed);
    }

    #[test]
    fn test_status_prints_summary() {
        let root = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let config = config_at(&root, &data);

        let mut out = Vec::new();
        assert_eq!(
            print_status(&config, &mut out).unwrap_err().code(),
            CliErrorCode::StatusUnavailable
        );

        let ledger = StatusLedger::new(root.path().join("status"));
        let summary: BackupSummary = ledger.summarize(
            Default::default(),
            "2026-10-19T03:00:00+00:00".to_string(),
            "2026-10-18T03:05:00Z".to_string(),
        );
        ledger.write_summary(&summary).unwrap();

        print_status(&config, &mut out).unwrap();
        let printed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(printed["overall_status"], "partial_failure");
        assert_eq!(printed["next_scheduled_backup"], "2026-10-19T03:00:00+00:00");
    }

    #[test]
    fn test_next_run_uses_schedule() {
        let mut config = Config::default();
        config.schedule = "15 4 * * *".to_string();
        let next = next_run(&config).unwrap();
        assert!(next.contains("T04:15:00"));
    }
}
