//! CLI argument definitions using clap
//!
//! Commands:
//! - stackback run
//! - stackback status
//! - stackback next-run
//! - stackback restore <service> <artifact|latest> [--database <db>] [--yes]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// stackback - scheduled backup and restore for the service stack
#[derive(Parser, Debug)]
#[command(name = "stackback")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one backup pass over every service
    ///
    /// Exit status is the number of failed services.
    Run,

    /// Print the current backup summary as JSON
    Status,

    /// Print the next scheduled backup time
    NextRun,

    /// Restore a service from a backup
    ///
    /// Destroys the service's current data. Requires typed confirmation
    /// unless --yes is given.
    Restore {
        /// rabbitmq, loki, grafana or postgresql
        service: String,

        /// Artifact path, or `latest`
        artifact: String,

        /// Database to restore (postgresql only)
        #[arg(long)]
        database: Option<String>,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_arguments() {
        let cli = Cli::try_parse_from([
            "stackback",
            "restore",
            "postgresql",
            "latest",
            "--database",
            "app_db",
            "--yes",
            "--config",
            "/etc/stackback.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/stackback.toml")));
        match cli.command {
            Command::Restore {
                service,
                artifact,
                database,
                yes,
            } => {
                assert_eq!(service, "postgresql");
                assert_eq!(artifact, "latest");
                assert_eq!(database.as_deref(), Some("app_db"));
                assert!(yes);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_next_run_is_kebab_case() {
        let cli = Cli::try_parse_from(["stackback", "next-run"]).unwrap();
        assert!(matches!(cli.command, Command::NextRun));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_restore_requires_artifact() {
        assert!(Cli::try_parse_from(["stackback", "restore", "loki"]).is_err());
    }
}
