//! Aggregate backup summary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backup::{Outcome, RetentionPolicy};

/// Aggregate outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Success,
    PartialFailure,
}

impl OverallStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            OverallStatus::Success
        } else {
            OverallStatus::PartialFailure
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OverallStatus::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Success => "success",
            OverallStatus::PartialFailure => "partial_failure",
        }
    }
}

/// Relational engine section of the summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub overall_status: OverallStatus,
    pub databases: BTreeMap<String, Outcome>,
}

/// Per-service outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesSummary {
    pub rabbitmq: Outcome,
    pub loki: Outcome,
    pub grafana: Outcome,
    pub postgresql: EngineSummary,
}

/// Contents of `backup_summary.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub overall_status: OverallStatus,
    pub timestamp: String,
    pub services: ServicesSummary,
    pub retention_policy: RetentionPolicy,
    pub next_scheduled_backup: String,
}

/// Inputs to [`BackupSummary::compute`]
#[derive(Debug, Clone)]
pub struct SummaryInputs {
    pub rabbitmq: Outcome,
    pub loki: Outcome,
    pub grafana: Outcome,
    /// Engine-level record (catalog query and aggregate)
    pub engine: Outcome,
    pub databases: BTreeMap<String, Outcome>,
}

impl BackupSummary {
    /// Aggregate unit outcomes.
    ///
    /// The engine succeeds iff its own record and every database record are
    /// `success`; the run succeeds iff every service including the engine
    /// does. `unknown` counts as failure.
    pub fn compute(
        inputs: SummaryInputs,
        policy: RetentionPolicy,
        next_scheduled_backup: String,
        timestamp: String,
    ) -> Self {
        let engine_ok = inputs.engine.is_success() && inputs.databases.values().all(Outcome::is_success);
        let overall_ok = inputs.rabbitmq.is_success()
            && inputs.loki.is_success()
            && inputs.grafana.is_success()
            && engine_ok;

        Self {
            overall_status: OverallStatus::from_success(overall_ok),
            timestamp,
            services: ServicesSummary {
                rabbitmq: inputs.rabbitmq,
                loki: inputs.loki,
                grafana: inputs.grafana,
                postgresql: EngineSummary {
                    overall_status: OverallStatus::from_success(engine_ok),
                    databases: inputs.databases,
                },
            },
            retention_policy: policy,
            next_scheduled_backup,
        }
    }

    /// Number of failed top-level services
    pub fn failed_services(&self) -> usize {
        let s = &self.services;
        [s.rabbitmq.is_success(), s.loki.is_success(), s.grafana.is_success(), s.postgresql.overall_status.is_success()]
            .iter()
            .filter(|ok| !**ok)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(services: [Outcome; 4], dbs: &[(&str, Outcome)]) -> SummaryInputs {
        SummaryInputs {
            rabbitmq: services[0],
            loki: services[1],
            grafana: services[2],
            engine: services[3],
            databases: dbs.iter().map(|(n, o)| (n.to_string(), *o)).collect(),
        }
    }

    fn compute(i: SummaryInputs) -> BackupSummary {
        BackupSummary::compute(i, RetentionPolicy::default(), "next".into(), "now".into())
    }

    #[test]
    fn test_overall_success_iff_every_status_success() {
        let outcomes = [Outcome::Success, Outcome::Failed, Outcome::Unknown];
        for a in outcomes {
            for b in outcomes {
                for db in outcomes {
                    let i = inputs(
                        [a, Outcome::Success, b, Outcome::Success],
                        &[("app_db", Outcome::Success), ("metrics_db", db)],
                    );
                    let all_ok = [a, b, db].iter().all(Outcome::is_success);
                    assert_eq!(compute(i).overall_status.is_success(), all_ok);
                }
            }
        }
    }

    #[test]
    fn test_database_failure_fails_engine() {
        let summary = compute(inputs(
            [Outcome::Success; 4],
            &[("app_db", Outcome::Success), ("metrics_db", Outcome::Failed)],
        ));
        assert_eq!(summary.overall_status, OverallStatus::PartialFailure);
        assert_eq!(summary.services.postgresql.overall_status, OverallStatus::PartialFailure);
        assert_eq!(summary.failed_services(), 1);
    }

    #[test]
    fn test_json_shape() {
        let summary = compute(inputs([Outcome::Success; 4], &[("app_db", Outcome::Success)]));
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(
            value,
            json!({
                "overall_status": "success",
                "timestamp": "now",
                "services": {
                    "rabbitmq": "success",
                    "loki": "success",
                    "grafana": "success",
                    "postgresql": {
                        "overall_status": "success",
                        "databases": {"app_db": "success"}
                    }
                },
                "retention_policy": {"daily": 7, "weekly": 4},
                "next_scheduled_backup": "next"
            })
        );
    }
}
