//! Observability for stackback
//!
//! Structured JSON-lines logging with typed lifecycle events.
//!
//! # Usage
//!
//! ```ignore
//! use stackback::observability::{log_event_with_fields, Event, ObservationScope};
//!
//! log_event_with_fields(Event::DumpProgress, &[("database", "app_db"), ("bytes", "1024")]);
//!
//! let scope = ObservationScope::with_fields("RETENTION", &[("root", "/backups")]);
//! // ... do work ...
//! scope.complete();
//! ```

mod events;
mod logger;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use scope::{ObservationScope, Timer};

fn severity_for(event: Event) -> Severity {
    if event.is_failure() {
        Severity::Error
    } else if event.is_warning() {
        Severity::Warn
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(severity_for(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity_for(event), event.as_str(), fields);
}
