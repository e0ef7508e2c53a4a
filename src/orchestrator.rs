//! # Orchestrator
//!
//! One backup run, start to finish:
//!
//! 1. Remove temp files left by a killed previous run
//! 2. Decide whether to stage through local scratch
//! 3. Back up rabbitmq, loki, grafana, then every postgresql database
//! 4. Sweep aged artifacts
//! 5. Summarize this run's outcomes and persist the summary
//! 6. Notify
//!
//! Backends run one at a time. A failing unit never stops the others.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Local, SecondsFormat};

use crate::backup::archive::ArchivalBackend;
use crate::backup::definitions::DefinitionsExporter;
use crate::backup::postgres::{DumpBackend, PgCli};
use crate::backup::retention::{remove_stale_temp, RetentionSweeper, SweepReport};
use crate::backup::scheduler::BackupScheduler;
use crate::backup::staging::StagingRelay;
use crate::backup::{BackupAttempt, BackupResult, Outcome, RetentionPolicy, RunContext, ServiceKind};
use crate::config::Config;
use crate::disk::{DiskSpaceGuard, FilesystemProbe, SystemProbe};
use crate::notify::{NoopNotifier, Notifier, WebhookNotifier};
use crate::observability::{log_event_with_fields, Event, Logger, Timer};
use crate::status::{BackupSummary, StatusLedger, SummaryInputs};

/// Placeholder when the next run cannot be computed
pub const NEXT_RUN_UNKNOWN: &str = "unknown";

/// Paths and policy for a run
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub backup_root: PathBuf,
    pub scratch_dir: PathBuf,
    pub policy: RetentionPolicy,
    pub error_log_days: u32,
}

/// Collaborators of a run
pub struct Components {
    pub probe: Box<dyn FilesystemProbe>,
    /// rabbitmq, loki, grafana, in run order
    pub archival: Vec<ArchivalBackend>,
    pub dumps: DumpBackend,
    pub relay: StagingRelay,
    pub scheduler: BackupScheduler,
    pub notifier: Box<dyn Notifier>,
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Failed top-level services
    pub failed: usize,
    pub total: usize,
    pub duration_secs: u64,
    pub summary: BackupSummary,
    pub sweep: SweepReport,
}

impl RunReport {
    /// Process exit status: the failure count
    pub fn exit_code(&self) -> i32 {
        self.failed as i32
    }
}

/// Sequential backup orchestrator
pub struct Orchestrator {
    settings: RunSettings,
    components: Components,
    ledger: StatusLedger,
}

impl Orchestrator {
    pub fn new(settings: RunSettings, components: Components) -> Self {
        let ledger = StatusLedger::new(settings.backup_root.join(crate::backup::STATUS_DIR_NAME));
        Self {
            settings,
            components,
            ledger,
        }
    }

    /// Wire the production collaborators from configuration
    pub fn from_config(config: &Config) -> BackupResult<Self> {
        let exporter = DefinitionsExporter::new(
            config.rabbitmq.management_url(),
            config.rabbitmq.user.clone(),
            config.rabbitmq.password.clone(),
        )?;
        let archival = vec![
            ArchivalBackend::new(ServiceKind::Rabbitmq, config.rabbitmq.data_dir.clone()).with_definitions(exporter),
            ArchivalBackend::new(ServiceKind::Loki, config.loki.data_dir.clone()),
            ArchivalBackend::new(ServiceKind::Grafana, config.grafana.data_dir.clone()),
        ];

        let relay = StagingRelay::new();
        let dumps = DumpBackend::new(
            Box::new(PgCli::new(config.pg_connection())),
            Box::new(DiskSpaceGuard::new(Box::new(SystemProbe::new()))),
            relay,
            config.dump_settings(),
        );

        let settings = RunSettings {
            backup_root: config.backup_root.clone(),
            scratch_dir: config.scratch_dir.clone(),
            policy: config.retention,
            error_log_days: config.error_log_retention_days,
        };
        let ledger = StatusLedger::new(settings.backup_root.join(crate::backup::STATUS_DIR_NAME));

        let notifier: Box<dyn Notifier> = match &config.notify_target {
            Some(target) => Box::new(
                WebhookNotifier::new(target, &config.deploy_env, ledger)
                    .map_err(|e| crate::backup::BackupError::invalid_config("cannot build notifier").with_source(e))?,
            ),
            None => Box::new(NoopNotifier),
        };

        let components = Components {
            probe: Box::new(SystemProbe::new()),
            archival,
            dumps,
            relay,
            scheduler: BackupScheduler::new(&config.schedule)?,
            notifier,
        };
        Ok(Self::new(settings, components))
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    /// Next scheduled run after `now`, formatted for the summary
    pub fn next_run(&self, now: &DateTime<Local>) -> String {
        match self.components.scheduler.next_run(now) {
            Ok(next) => next.to_rfc3339_opts(SecondsFormat::Secs, false),
            Err(e) => {
                let reason = e.to_string();
                Logger::warn("NEXT_RUN_UNKNOWN", &[("reason", reason.as_str())]);
                NEXT_RUN_UNKNOWN.to_string()
            }
        }
    }

    fn record(&self, attempt: &BackupAttempt) {
        if let Err(e) = self.ledger.record(attempt) {
            let reason = e.to_string();
            Logger::error("STATUS_WRITE_FAILED", &[("service", attempt.service.as_str()), ("reason", reason.as_str())]);
        }
    }

    /// Run every backend once
    pub async fn run(&self, now: DateTime<Local>) -> RunReport {
        let timer = Timer::new();
        let root = self.settings.backup_root.display().to_string();
        log_event_with_fields(Event::RunStart, &[("backup_root", root.as_str())]);

        remove_stale_temp(&self.settings.backup_root);
        remove_stale_temp(&self.settings.scratch_dir);

        let staging = self.components.probe.is_remote_gateway(&self.settings.backup_root).await;
        let scratch = staging.then(|| self.settings.scratch_dir.clone());
        if staging {
            let shown = self.settings.scratch_dir.display().to_string();
            Logger::info("STAGING_ENABLED", &[("scratch_dir", shown.as_str())]);
        }
        let ctx = RunContext::new(now, self.settings.backup_root.clone(), scratch, self.settings.policy);

        let mut archived = Vec::with_capacity(self.components.archival.len());
        for backend in &self.components.archival {
            let attempt = backend.run(&ctx, &self.components.relay).await;
            self.record(&attempt);
            archived.push(attempt);
        }

        let dump_run = self.components.dumps.dump_all(&ctx).await;
        for attempt in &dump_run.attempts {
            self.record(attempt);
        }
        self.record(&dump_run.engine);
        if let Some(databases) = &dump_run.databases {
            self.ledger.retain_databases(databases);
        }

        let sweeper = RetentionSweeper::new(
            self.settings.backup_root.clone(),
            self.settings.policy,
            self.settings.error_log_days,
        );
        let sweep = sweeper.sweep(SystemTime::now());

        // tally from this run's attempts; the ledger may be unwritable
        let databases: BTreeMap<String, Outcome> = match &dump_run.databases {
            Some(_) => dump_run
                .attempts
                .iter()
                .filter_map(|a| a.database.clone().map(|db| (db, a.status)))
                .collect(),
            None => self.ledger.database_records(),
        };
        let outcome_of = |service: ServiceKind| {
            archived
                .iter()
                .find(|a| a.service == service.as_str())
                .map_or(Outcome::Unknown, |a| a.status)
        };
        let inputs = SummaryInputs {
            rabbitmq: outcome_of(ServiceKind::Rabbitmq),
            loki: outcome_of(ServiceKind::Loki),
            grafana: outcome_of(ServiceKind::Grafana),
            engine: dump_run.engine.status,
            databases,
        };
        let summary = BackupSummary::compute(
            inputs,
            self.settings.policy,
            self.next_run(&now),
            RunContext::now_rfc3339(),
        );
        if let Err(e) = self.ledger.write_summary(&summary) {
            let reason = e.to_string();
            Logger::error("SUMMARY_WRITE_FAILED", &[("reason", reason.as_str())]);
        }

        let failed = summary.failed_services();
        let duration_secs = timer.elapsed_secs();
        // delivery failures are logged by the notifier
        let _ = self.components.notifier.notify(failed, duration_secs).await;

        let total = ServiceKind::ALL.len();
        let failed_str = failed.to_string();
        let total_str = total.to_string();
        let secs = duration_secs.to_string();
        log_event_with_fields(
            Event::RunComplete,
            &[
                ("failed", failed_str.as_str()),
                ("total", total_str.as_str()),
                ("duration_secs", secs.as_str()),
                ("overall_status", summary.overall_status.as_str()),
            ],
        );

        RunReport {
            failed,
            total,
            duration_secs,
            summary,
            sweep,
        }
    }
}
