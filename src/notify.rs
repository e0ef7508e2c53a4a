//! Run notification.
//!
//! The orchestrator calls [`Notifier::notify`] once per run. Delivery failure
//! is logged and never changes the run's outcome.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;

use crate::backup::ServiceKind;
use crate::observability::{log_event_with_fields, Event};
use crate::status::StatusLedger;

/// Delivery attempts before giving up
pub const NOTIFY_ATTEMPTS: u32 = 3;

/// Delay between attempts
pub const NOTIFY_RETRY_DELAY: Duration = Duration::from_secs(5);

const WEBHOOK_NAME: &str = "stackback-backup";

/// Notification errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification client error: {0}")]
    Client(String),
    #[error("notification delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Receives the result of each run
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, failed: usize, duration_secs: u64) -> Result<(), NotifyError>;
}

/// Used when no notification target is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _failed: usize, _duration_secs: u64) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Webhook endpoint for a deployment environment
pub fn webhook_url(target: &str, environment: &str) -> String {
    let path = if environment == "production" {
        "webhook"
    } else {
        "webhook-test"
    };
    format!("{}/{}/{}", target.trim_end_matches('/'), path, WEBHOOK_NAME)
}

/// Posts the run result and current summary to a webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    environment: String,
    ledger: StatusLedger,
    retry_delay: Duration,
}

impl WebhookNotifier {
    pub fn new(target: &str, environment: &str, ledger: StatusLedger) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            url: webhook_url(target, environment),
            environment: environment.to_string(),
            ledger,
            retry_delay: NOTIFY_RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn payload(&self, failed: usize, duration_secs: u64) -> serde_json::Value {
        let summary = self
            .ledger
            .read_summary()
            .ok()
            .and_then(|s| serde_json::to_value(s).ok())
            .unwrap_or(serde_json::Value::Null);

        json!({
            "status": if failed == 0 { "success" } else { "failure" },
            "failed": failed,
            "total": ServiceKind::ALL.len(),
            "duration_seconds": duration_secs,
            "environment": self.environment,
            "summary": summary,
        })
    }

    async fn deliver(&self, body: &serde_json::Value) -> Result<(), String> {
        self.client
            .post(&self.url)
            .json(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, failed: usize, duration_secs: u64) -> Result<(), NotifyError> {
        let body = self.payload(failed, duration_secs);
        let mut last = String::new();

        for attempt in 1..=NOTIFY_ATTEMPTS {
            match self.deliver(&body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last = e;
                    if attempt < NOTIFY_ATTEMPTS {
                        let n = attempt.to_string();
                        log_event_with_fields(Event::NotifyRetry, &[("attempt", n.as_str()), ("reason", last.as_str())]);
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        let n = NOTIFY_ATTEMPTS.to_string();
        log_event_with_fields(Event::NotifyFailed, &[("attempts", n.as_str()), ("reason", last.as_str())]);
        Err(NotifyError::Exhausted {
            attempts: NOTIFY_ATTEMPTS,
            last,
        })
    }
}
