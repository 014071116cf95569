//! Run launcher: drives a [`Pipeline`] through a [`Trainer`], one phase at a
//! time, stopping at the first failure.

use crate::config::LauncherConfig;
use crate::error::LaunchError;
use crate::experiment::{CHECKPOINT_DIR, ExperimentConfig};
use crate::flags::build_flags;
use crate::pipeline::Pipeline;
use crate::records::{PhaseRecord, PhaseStatus, PipelineRun};
use crate::trainer::{Invocation, PhaseOutcome, Trainer};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Resolved settings for building invocations.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub program: PathBuf,
    pub leading_args: Vec<String>,
    pub working_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Where run records go; `None` disables them.
    pub records_dir: Option<PathBuf>,
}

impl LaunchSettings {
    pub fn from_config(config: &LauncherConfig, workspace: &Path) -> Self {
        let mut leading_args = config.trainer.python_args.clone();
        leading_args.push(config.trainer.script.to_string_lossy().into_owned());
        Self {
            program: config.trainer.python_path.clone(),
            leading_args,
            working_dir: config.trainer.resolve_working_dir(workspace),
            checkpoint_dir: PathBuf::from(CHECKPOINT_DIR),
            env: config.trainer.env.clone(),
            records_dir: config
                .records
                .enabled
                .then(|| config.records.resolve_dir(workspace)),
        }
    }

    /// Resolve a checkpoint path against the trainer's working directory.
    pub fn resolve_checkpoint(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

/// Sequential driver for pipelines.
pub struct Launcher {
    trainer: Arc<dyn Trainer>,
    settings: LaunchSettings,
}

impl Launcher {
    pub fn new(trainer: Arc<dyn Trainer>, settings: LaunchSettings) -> Self {
        Self { trainer, settings }
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    /// Build the trainer invocation for one phase.
    pub fn invocation(&self, phase: &ExperimentConfig) -> Invocation {
        Invocation {
            phase: phase.name.clone(),
            program: self.settings.program.clone(),
            leading_args: self.settings.leading_args.clone(),
            flags: build_flags(phase),
            working_dir: self.settings.working_dir.clone(),
            env: self.settings.env.clone(),
        }
    }

    /// Validate the pipeline and return the commands `launch` would run.
    pub fn plan(&self, pipeline: &Pipeline) -> Result<Vec<Invocation>, LaunchError> {
        pipeline.validate(&self.settings.checkpoint_dir)?;
        Ok(pipeline.phases.iter().map(|p| self.invocation(p)).collect())
    }

    /// Run every phase in order. Ctrl-C is not handled here; see [`Self::launch_until`].
    pub async fn launch(&self, pipeline: &Pipeline) -> Result<PipelineRun, LaunchError> {
        self.launch_until(pipeline, std::future::pending()).await
    }

    /// Run every phase in order, aborting the current phase when `shutdown`
    /// resolves. The aborted child process is killed.
    ///
    /// Returns the run record when every phase succeeds. On failure the
    /// record (with the failing phase marked) is still written before the
    /// error is returned.
    pub async fn launch_until<F>(
        &self,
        pipeline: &Pipeline,
        shutdown: F,
    ) -> Result<PipelineRun, LaunchError>
    where
        F: Future<Output = ()>,
    {
        let invocations = self.plan(pipeline)?;
        tokio::pin!(shutdown);

        let records = pipeline
            .phases
            .iter()
            .zip(&invocations)
            .map(|(phase, inv)| PhaseRecord {
                name: phase.name.clone(),
                stage: phase.stage,
                command: inv.command_line(),
                status: PhaseStatus::Pending,
                exit_code: None,
                elapsed_secs: None,
                output_checkpoint: phase
                    .mode
                    .produces_checkpoint()
                    .then(|| phase.output_checkpoint(&self.settings.checkpoint_dir)),
                error: None,
            })
            .collect();
        let mut run = PipelineRun::new(&pipeline.name, records);
        run.status = PhaseStatus::Running;

        info!(
            pipeline = %pipeline.name,
            run_id = %run.id,
            phases = pipeline.len(),
            "Launching pipeline"
        );

        let total = pipeline.len();
        for (index, (phase, invocation)) in pipeline.phases.iter().zip(&invocations).enumerate() {
            run.phases[index].status = PhaseStatus::Running;
            info!(
                phase = %phase.name,
                stage = %phase.stage,
                index = index + 1,
                total,
                "Starting phase"
            );
            debug!(command = %invocation.command_line(), "Trainer command");

            let result = tokio::select! {
                result = self.run_phase(phase, invocation) => result,
                () = &mut shutdown => Err(LaunchError::Interrupted { phase: phase.name.clone() }),
            };

            let result = result.and_then(|outcome| {
                let record = &mut run.phases[index];
                record.exit_code = outcome.exit_code;
                record.elapsed_secs = Some(outcome.elapsed.as_secs_f64());
                if outcome.success() {
                    Ok(outcome)
                } else {
                    Err(LaunchError::PhaseFailed {
                        phase: phase.name.clone(),
                        code: outcome.exit_code,
                    })
                }
            });

            match result {
                Ok(outcome) => {
                    run.phases[index].status = PhaseStatus::Completed;
                    info!(
                        phase = %phase.name,
                        elapsed_secs = outcome.elapsed.as_secs(),
                        "Phase completed"
                    );
                }
                Err(err) => {
                    error!(phase = %phase.name, error = %err, "Phase failed, halting pipeline");
                    let record = &mut run.phases[index];
                    record.status = PhaseStatus::Failed;
                    record.error = Some(err.to_string());
                    run.finish(PhaseStatus::Failed);
                    self.save_record(&run);
                    return Err(err);
                }
            }
        }

        run.finish(PhaseStatus::Completed);
        self.save_record(&run);
        info!(pipeline = %pipeline.name, run_id = %run.id, "Pipeline completed");
        Ok(run)
    }

    async fn run_phase(
        &self,
        phase: &ExperimentConfig,
        invocation: &Invocation,
    ) -> Result<PhaseOutcome, LaunchError> {
        if let Some(ckpt) = &phase.restore_checkpoint {
            let resolved = self.settings.resolve_checkpoint(ckpt);
            if !resolved.is_file() {
                return Err(LaunchError::MissingCheckpoint {
                    phase: phase.name.clone(),
                    path: resolved,
                });
            }
        }

        self.trainer.run(invocation).await
    }

    fn save_record(&self, run: &PipelineRun) {
        let Some(dir) = &self.settings.records_dir else {
            return;
        };
        match run.save(dir) {
            Ok(path) => debug!(path = %path.display(), "Saved run record"),
            Err(e) => warn!(error = %e, "Failed to save run record"),
        }
    }
}
