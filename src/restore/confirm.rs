//! Restore confirmation.
//!
//! A restore destroys the current data of a service, so it requires the
//! operator to type `restore <service>` unless confirmation was given up
//! front.

use std::io::{BufRead, Write};

/// Kind of restore being confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOperation {
    /// Replace a service's data directory with an archive
    ArchiveRestore,
    /// Replay a dump into a database
    DatabaseRestore,
}

impl RestoreOperation {
    /// Warning message shown before confirmation
    pub fn warning(&self) -> &'static str {
        match self {
            RestoreOperation::ArchiveRestore => {
                "WARNING: Restore will stop the service, DELETE its current data directory and replace it with the archive contents. Current data will be lost."
            }
            RestoreOperation::DatabaseRestore => {
                "WARNING: Restore will replay the dump into the existing database. Conflicting objects and rows will be overwritten or cause errors."
            }
        }
    }

    /// Confirmation phrase to type
    pub fn confirm_phrase(&self, service: &str) -> String {
        format!("restore {}", service)
    }
}

/// Result of a confirmation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationResult {
    /// Confirmation is valid, proceed
    Confirmed,
    /// Typed phrase doesn't match
    PhraseNotMatch { expected: String },
    /// No input was given
    NotProvided { warning: String },
}

impl ConfirmationResult {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ConfirmationResult::Confirmed)
    }
}

/// Guards one restore behind a typed confirmation
#[derive(Debug)]
pub struct RestoreGuard {
    operation: RestoreOperation,
    service: String,
    confirmed: bool,
}

impl RestoreGuard {
    pub fn new(operation: RestoreOperation, service: impl Into<String>) -> Self {
        Self {
            operation,
            service: service.into(),
            confirmed: false,
        }
    }

    /// Confirmation given on the command line
    pub fn assume_confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }

    /// Confirm with typed phrase
    pub fn confirm_with_phrase(&mut self, phrase: &str) -> ConfirmationResult {
        let phrase = phrase.trim();
        if phrase.is_empty() {
            self.confirmed = false;
            return ConfirmationResult::NotProvided {
                warning: self.operation.warning().to_string(),
            };
        }

        let expected = self.operation.confirm_phrase(&self.service);
        if phrase.to_lowercase() != expected.to_lowercase() {
            self.confirmed = false;
            return ConfirmationResult::PhraseNotMatch { expected };
        }

        self.confirmed = true;
        ConfirmationResult::Confirmed
    }

    /// Show the warning on `output` and read one line of confirmation from
    /// `input`, unless already confirmed.
    pub fn prompt<R: BufRead, W: Write>(&mut self, input: &mut R, output: &mut W) -> std::io::Result<ConfirmationResult> {
        if self.confirmed {
            return Ok(ConfirmationResult::Confirmed);
        }

        writeln!(output, "{}", self.operation.warning())?;
        write!(
            output,
            "Type '{}' to continue: ",
            self.operation.confirm_phrase(&self.service)
        )?;
        output.flush()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        Ok(self.confirm_with_phrase(&line))
    }

    /// Check if operation is confirmed
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn operation(&self) -> RestoreOperation {
        self.operation
    }
}
