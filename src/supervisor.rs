//! Process supervisor for the student's server
//!
//! Launches the validated start command as a subprocess rooted at the
//! submission's working directory and decides readiness by racing the
//! first loopback-host output line against a short fixed timeout.
//! Liveness is always confirmed with the OS (`try_wait`), never
//! inferred from output pipes. The supervisor guarantees termination:
//! every wait is bounded, and a process that cannot be killed is
//! escalated to a fatal error, because a stale server can poison every
//! later submission (port bindings, shared files).

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::error::GradeError;

/// Only this interpreter may be launched. A coarse safety valve against
/// start scripts invoking arbitrary binaries, not a sandbox.
const ALLOWED_INTERPRETER: &str = "node";

/// Output substring taken as "the server is listening"
const READY_PATTERN: &str = "localhost";

/// How long to wait for the readiness signal before proceeding anyway
const READY_TIMEOUT_MS: u64 = 2500;

/// How long a killed process gets to actually exit
const KILL_WAIT_SECS: u64 = 5;

/// How the start resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The process printed the readiness pattern
    Signaled,
    /// The timeout won the race; the process is running but never
    /// announced itself. Not an error.
    TimedOutButRunning,
}

/// Owns the student server subprocess for one grading lifecycle
pub struct ProcessSupervisor {
    child: Option<Child>,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self { child: None }
    }

    /// Whether a process was started and has not exited. Asks the OS
    /// directly; a server that closes its stdio while still running
    /// counts as running.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Spawn `command` in `work_dir` and wait for readiness.
    ///
    /// Rejects commands whose interpreter is not allow-listed; that is
    /// a configuration problem (a bad default) or a submission trying
    /// to run something it shouldn't, and either way nothing spawns.
    pub async fn start(&mut self, command: &str, work_dir: &Path) -> Result<Readiness> {
        let mut parts = command.split_whitespace();
        let interpreter = parts.next().ok_or_else(|| {
            GradeError::Config("start command is empty".into())
        })?;
        if interpreter != ALLOWED_INTERPRETER {
            return Err(GradeError::Config(format!(
                "start command must invoke {:?}, got {:?}",
                ALLOWED_INTERPRETER, command
            ))
            .into());
        }

        info!("Starting submission server: {}", command);

        let mut child = Command::new(interpreter)
            .args(parts)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn start command {:?}", command))?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        if let Some(stdout) = stdout {
            spawn_output_observer(stdout, Some(ready_tx));
        }
        if let Some(stderr) = stderr {
            // Servers commonly announce on stderr too; the drain also
            // keeps the pipe from backing up
            spawn_output_observer(stderr, None);
        }

        self.child = Some(child);

        let readiness = tokio::select! {
            signal = ready_rx => match signal {
                Ok(()) => Readiness::Signaled,
                // Output closed without the pattern; proceed anyway
                Err(_) => Readiness::TimedOutButRunning,
            },
            _ = tokio::time::sleep(Duration::from_millis(READY_TIMEOUT_MS)) => {
                Readiness::TimedOutButRunning
            }
        };

        debug!("Server start resolved: {:?}", readiness);
        Ok(readiness)
    }

    /// Terminate the process if it is still open. Idempotent; tolerates
    /// never-started and already-exited processes. A process that
    /// refuses to die is a fatal, batch-halting condition.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // Closed output pipes are no evidence of exit (a server can
        // close its stdio and keep running); only the OS knows
        if let Ok(Some(status)) = child.try_wait() {
            debug!("Server already exited with {}", status);
            return Ok(());
        }

        info!("Stopping submission server");
        if let Err(e) = child.start_kill() {
            return Err(GradeError::Fatal(format!(
                "could not kill submission server: {}",
                e
            ))
            .into());
        }

        match timeout(Duration::from_secs(KILL_WAIT_SECS), child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Server exited with {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(GradeError::Fatal(format!(
                "failed waiting for killed submission server: {}",
                e
            ))
            .into()),
            Err(_) => Err(GradeError::Fatal(
                "submission server did not exit after kill".into(),
            )
            .into()),
        }
    }
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain one output pipe line by line, sending on `ready` when the
/// readiness pattern appears. EOF only ends the drain; it says nothing
/// about whether the process exited.
fn spawn_output_observer(
    pipe: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    ready: Option<oneshot::Sender<()>>,
) {
    tokio::spawn(async move {
        let mut ready = ready;
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!("server output: {}", line);
                    if line.contains(READY_PATTERN) {
                        if let Some(tx) = ready.take() {
                            let _ = tx.send(());
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed reading server output: {}", e);
                    break;
                }
            }
        }
    });
}
