//! stackback - scheduled backup and restore for a broker, a log store, a
//! dashboard store and a PostgreSQL engine
//!
//! Backends write timestamped artifacts under a daily/weekly layout, the
//! status ledger records one outcome per unit, and the orchestrator ties a
//! run together.

pub mod backup;
pub mod cli;
pub mod config;
pub mod config_validator;
pub mod container;
pub mod disk;
pub mod notify;
pub mod observability;
pub mod orchestrator;
pub mod restore;
pub mod status;
