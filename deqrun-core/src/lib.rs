//! # deqrun-core
//!
//! Experiment model and sequential launcher for deep-equilibrium optical-flow
//! training. A [`Pipeline`] is an ordered list of [`ExperimentConfig`] phases
//! (chairs -> things -> sintel -> kitti), each restoring the checkpoint its
//! predecessor wrote. The [`Launcher`] renders each phase into trainer flags
//! and runs the external trainer once per phase, halting on the first failure.

pub mod config;
pub mod error;
pub mod experiment;
pub mod flags;
pub mod launcher;
pub mod pipeline;
pub mod presets;
pub mod records;
pub mod trainer;

pub use config::{LauncherConfig, config_exists, load_config};
pub use error::{ConfigError, LaunchError};
pub use experiment::{
    CHECKPOINT_DIR, ExperimentConfig, FlagValue, ImageSize, ModelSize, RunMode, SolverKind, Stage,
};
pub use flags::build_flags;
pub use launcher::{LaunchSettings, Launcher};
pub use pipeline::Pipeline;
pub use records::{PhaseRecord, PhaseStatus, PipelineRun};
pub use trainer::{Invocation, PhaseOutcome, ProcessTrainer, Trainer};
