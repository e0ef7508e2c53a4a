//! # Status Module
//!
//! Machine-readable outcome records read by dashboards and the notifier.
//!
//! ```text
//! {root}/status/
//! ├── rabbitmq_last_backup.json
//! ├── loki_last_backup.json
//! ├── grafana_last_backup.json
//! ├── postgresql_last_backup.json
//! ├── postgresql_{db}_last_backup.json
//! └── backup_summary.json
//! ```

mod ledger;
mod summary;

pub use ledger::{StatusLedger, SUMMARY_FILE_NAME};
pub use summary::{BackupSummary, EngineSummary, OverallStatus, ServicesSummary, SummaryInputs};
