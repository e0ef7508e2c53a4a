//! Dump subprocess supervision.
//!
//! [`run_with_timeout`] runs a dump command with stdout redirected to a file
//! under a hard wall-clock bound. [`ProgressMonitor`] samples the growing
//! file and logs progress until told to stop.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::observability::{log_event_with_fields, Event};

/// Background observer of a growing dump file.
///
/// Advisory only: it reads the file size and logs, nothing else.
pub struct ProgressMonitor {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ProgressMonitor {
    /// Start sampling `path` every `interval`
    pub fn spawn(label: impl Into<String>, path: impl Into<PathBuf>, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let label = label.into();
        let path = path.into();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick completes immediately
            ticker.tick().await;
            let mut elapsed = Duration::ZERO;

            loop {
                tokio::select! {
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        elapsed += interval;
                        let bytes = tokio::fs::metadata(&path)
                            .await
                            .map(|m| m.len())
                            .unwrap_or(0)
                            .to_string();
                        let secs = elapsed.as_secs().to_string();
                        log_event_with_fields(
                            Event::DumpProgress,
                            &[
                                ("unit", label.as_str()),
                                ("bytes", bytes.as_str()),
                                ("elapsed_secs", secs.as_str()),
                            ],
                        );
                    }
                }
            }
        });

        Self { stop, handle }
    }

    /// Signal completion and wait up to `grace` for the task to exit, then
    /// abort it. Returns true if the monitor exited on its own.
    pub async fn finish(self, grace: Duration) -> bool {
        let _ = self.stop.send(true);
        let mut handle = self.handle;

        let joined = tokio::time::timeout(grace, &mut handle).await;
        match joined {
            Ok(_) => true,
            Err(_) => {
                handle.abort();
                let grace_ms = grace.as_millis().to_string();
                log_event_with_fields(Event::MonitorAborted, &[("grace_ms", grace_ms.as_str())]);
                false
            }
        }
    }
}

/// Outcome of a supervised subprocess run
#[derive(Debug, Default, Clone)]
pub struct DumpExecution {
    /// The wall-clock bound fired and the process was killed
    pub timed_out: bool,
    /// Exit status was success
    pub exit_ok: bool,
    /// Captured diagnostic stream
    pub stderr: String,
    /// The process could not be started or waited on
    pub spawn_error: Option<String>,
}

impl DumpExecution {
    fn spawn_failed(err: impl std::fmt::Display) -> Self {
        Self {
            spawn_error: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// Run `command` with stdout written to `output`, bounded by `timeout`.
///
/// On timeout the child is killed. Diagnostic output is collected for at
/// most `grace` after the child exits.
pub async fn run_with_timeout(
    mut command: Command,
    output: &Path,
    timeout: Duration,
    grace: Duration,
) -> DumpExecution {
    let out_file = match std::fs::File::create(output) {
        Ok(f) => f,
        Err(e) => return DumpExecution::spawn_failed(format!("cannot create {}: {}", output.display(), e)),
    };

    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(out_file))
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return DumpExecution::spawn_failed(e),
    };

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        })
    });

    let mut execution = DumpExecution::default();
    let waited = tokio::time::timeout(timeout, child.wait()).await;
    match waited {
        Ok(Ok(status)) => execution.exit_ok = status.success(),
        Ok(Err(e)) => execution.spawn_error = Some(e.to_string()),
        Err(_) => {
            execution.timed_out = true;
            let _ = child.kill().await;
        }
    }

    if let Some(mut task) = stderr_task {
        let collected = tokio::time::timeout(grace, &mut task).await;
        match collected {
            Ok(Ok(stderr)) => execution.stderr = stderr,
            // a grandchild may still hold the pipe open
            _ => task.abort(),
        }
    }

    execution
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_successful_run_writes_stdout() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.sql");
        let exec = run_with_timeout(
            sh("echo 'CREATE TABLE t();'; echo 'pg_dump: warning: meh' >&2"),
            &out,
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await;

        assert!(exec.exit_ok);
        assert!(!exec.timed_out);
        assert!(exec.stderr.contains("warning"));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "CREATE TABLE t();\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.sql");
        let started = std::time::Instant::now();
        let exec = run_with_timeout(
            sh("exec sleep 30"),
            &out,
            Duration::from_millis(300),
            Duration::from_secs(1),
        )
        .await;

        assert!(exec.timed_out);
        assert!(!exec.exit_ok);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.sql");
        let exec = run_with_timeout(sh("echo boom >&2; exit 3"), &out, Duration::from_secs(5), Duration::from_secs(1)).await;
        assert!(!exec.exit_ok);
        assert_eq!(exec.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.sql");
        let exec = run_with_timeout(
            Command::new("no-such-dump-tool"),
            &out,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )
        .await;
        assert!(exec.spawn_error.is_some());
        assert!(!exec.exit_ok);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_signal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.sql");
        std::fs::write(&path, b"abc").unwrap();

        let monitor = ProgressMonitor::spawn("app_db", &path, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(monitor.finish(Duration::from_secs(1)).await);
    }
}
