//! Trainer process seam.
//!
//! [`Trainer`] abstracts over the external training program so the launcher
//! can be tested without spawning processes. [`ProcessTrainer`] is the real
//! implementation: one child process per phase, output inherited, killed if
//! the launcher drops it.

use crate::error::LaunchError;
use crate::flags::render_command_line;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// A fully resolved trainer command for one phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub phase: String,
    pub program: PathBuf,
    /// Interpreter arguments and the script path.
    pub leading_args: Vec<String>,
    pub flags: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        render_command_line(
            &self.program.to_string_lossy(),
            &self.leading_args,
            &self.flags,
        )
    }
}

/// How a trainer process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseOutcome {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
}

impl PhaseOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs one trainer invocation to completion.
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<PhaseOutcome, LaunchError>;
}

/// Trainer backed by a child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessTrainer {
    timeout: Option<Duration>,
}

impl ProcessTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill a phase that runs longer than `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Trainer for ProcessTrainer {
    async fn run(&self, invocation: &Invocation) -> Result<PhaseOutcome, LaunchError> {
        debug!(
            phase = %invocation.phase,
            cwd = %invocation.working_dir.display(),
            "Spawning trainer"
        );

        let started = Instant::now();
        let mut child = Command::new(&invocation.program)
            .args(&invocation.leading_args)
            .args(&invocation.flags)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                phase: invocation.phase.clone(),
                source,
            })?;

        let status = match self.timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, child.wait()).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        let _ = child.kill().await;
                        return Err(LaunchError::Timeout {
                            phase: invocation.phase.clone(),
                            timeout_secs: limit.as_secs(),
                        });
                    }
                }
            }
            None => child.wait().await?,
        };

        Ok(PhaseOutcome {
            exit_code: status.code(),
            elapsed: started.elapsed(),
        })
    }
}
