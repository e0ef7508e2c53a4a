//! Backup schedule for stackback.
//!
//! Computes the next run from a 5-field cron expression. The scheduler does
//! not run backups itself; it only provides timing information for the
//! summary and the `next-run` command.

use std::fmt;

use chrono::{DateTime, NaiveTime, TimeZone};
use croner::Cron;

use super::errors::{BackupError, BackupResult};

/// Backup scheduler for one cron expression
pub struct BackupScheduler {
    expression: String,
    cron: Cron,
    /// Daily slot, when the expression is a plain `M H * * *`
    slot: Option<NaiveTime>,
}

impl BackupScheduler {
    /// Parse and validate a 5-field expression
    pub fn new(expression: &str) -> BackupResult<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(BackupError::invalid_config(format!(
                "schedule must have 5 fields, got {}: {:?}",
                fields.len(),
                expression
            )));
        }

        let cron = Cron::new(expression).parse().map_err(|e| {
            BackupError::invalid_config(format!("invalid schedule {:?}: {}", expression, e))
        })?;

        Ok(Self {
            expression: fields.join(" "),
            cron,
            slot: daily_slot(&fields),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The daily slot, if the expression has one
    pub fn slot(&self) -> Option<NaiveTime> {
        self.slot
    }

    /// Next run strictly after the current minute's slot.
    ///
    /// For a daily slot: today at the slot if `now` is still before it,
    /// otherwise tomorrow at the slot, using calendar-day arithmetic.
    pub fn next_run<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> BackupResult<DateTime<Tz>> {
        if let Some(slot) = self.slot {
            let today = now.date_naive();
            let day = if now.time() < slot {
                Some(today)
            } else {
                today.succ_opt()
            };
            let local = day.and_then(|d| now.timezone().from_local_datetime(&d.and_time(slot)).earliest());
            if let Some(next) = local {
                return Ok(next);
            }
            // slot falls in a DST gap; let the cron engine pick
        }

        self.cron
            .find_next_occurrence(now, false)
            .map_err(|e| BackupError::invalid_config(format!("no next run for {:?}: {}", self.expression, e)))
    }
}

impl fmt::Debug for BackupScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupScheduler")
            .field("expression", &self.expression)
            .field("slot", &self.slot)
            .finish()
    }
}

/// `M H * * *` with literal minute and hour
fn daily_slot(fields: &[&str]) -> Option<NaiveTime> {
    if fields[2..].iter().any(|f| *f != "*") {
        return None;
    }
    let minute: u32 = fields[0].parse().ok()?;
    let hour: u32 = fields[1].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Utc};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_before_slot_is_today() {
        let s = BackupScheduler::new("0 3 * * *").unwrap();
        assert_eq!(s.next_run(&at(2026, 10, 18, 2, 0)).unwrap(), at(2026, 10, 18, 3, 0));
    }

    #[test]
    fn test_after_slot_is_tomorrow() {
        let s = BackupScheduler::new("0 3 * * *").unwrap();
        assert_eq!(s.next_run(&at(2026, 10, 18, 4, 0)).unwrap(), at(2026, 10, 19, 3, 0));
    }

    #[test]
    fn test_exactly_at_slot_is_tomorrow() {
        let s = BackupScheduler::new("0 3 * * *").unwrap();
        assert_eq!(s.next_run(&at(2026, 10, 18, 3, 0)).unwrap(), at(2026, 10, 19, 3, 0));
    }

    #[test]
    fn test_month_and_year_boundaries() {
        let s = BackupScheduler::new("0 3 * * *").unwrap();
        assert_eq!(s.next_run(&at(2026, 10, 31, 4, 0)).unwrap(), at(2026, 11, 1, 3, 0));
        assert_eq!(s.next_run(&at(2026, 12, 31, 23, 59)).unwrap(), at(2027, 1, 1, 3, 0));
        assert_eq!(s.next_run(&at(2028, 2, 28, 5, 0)).unwrap(), at(2028, 2, 29, 3, 0));
    }

    #[test]
    fn test_non_literal_fields_use_cron() {
        let s = BackupScheduler::new("*/15 * * * *").unwrap();
        assert!(s.slot().is_none());
        let next = s.next_run(&at(2026, 10, 18, 2, 7)).unwrap();
        assert_eq!(next, at(2026, 10, 18, 2, 15));

        let weekly = BackupScheduler::new("30 2 * * 0").unwrap();
        assert!(weekly.slot().is_none());
        let now = at(2026, 10, 19, 0, 0);
        let next = weekly.next_run(&now).unwrap();
        assert!(next > now);
        assert_eq!((next.hour(), next.minute()), (2, 30));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(BackupScheduler::new("0 3 * *").is_err());
        assert!(BackupScheduler::new("0 3 * * * *").is_err());
        assert!(BackupScheduler::new("61 3 * * *").is_err());
        assert!(BackupScheduler::new("nonsense").is_err());
        assert!(BackupScheduler::new("0 25 * * *").unwrap_err().is_fatal());
    }
}
