//! Experiment configuration: one phase of a training pipeline.
//!
//! An [`ExperimentConfig`] holds everything the external trainer needs for a
//! single invocation. It is built once, rendered to flags once, and never
//! mutated by the launcher.

use crate::error::LaunchError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Dataset stage the trainer loads for a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Chairs,
    Things,
    Sintel,
    Kitti,
    Autoflow,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chairs => "chairs",
            Self::Things => "things",
            Self::Sintel => "sintel",
            Self::Kitti => "kitti",
            Self::Autoflow => "autoflow",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-point solver name, passed through to the trainer untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Naive,
    #[default]
    Anderson,
    Broyden,
}

impl SolverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Anderson => "anderson",
            Self::Broyden => "broyden",
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the trainer does with the phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Train,
    Eval,
    Test,
    Viz,
}

impl RunMode {
    /// The switch selecting this mode, if any. Training is the trainer's default.
    pub fn switch(&self) -> Option<&'static str> {
        match self {
            Self::Train => None,
            Self::Eval => Some("--eval"),
            Self::Test => Some("--test"),
            Self::Viz => Some("--viz"),
        }
    }

    /// Whether the trainer writes `checkpoints/<name>.pth` in this mode.
    pub fn produces_checkpoint(&self) -> bool {
        matches!(self, Self::Train)
    }
}

/// Model width preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSize {
    Tiny,
    Large,
    Huge,
    Gigantic,
}

impl ModelSize {
    pub fn switch(&self) -> &'static str {
        match self {
            Self::Tiny => "--tiny",
            Self::Large => "--large",
            Self::Huge => "--huge",
            Self::Gigantic => "--gigantic",
        }
    }
}

/// Training crop size, serialized as `[height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

impl ImageSize {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

impl From<[u32; 2]> for ImageSize {
    fn from([height, width]: [u32; 2]) -> Self {
        Self { height, width }
    }
}

impl From<ImageSize> for [u32; 2] {
    fn from(size: ImageSize) -> Self {
        [size.height, size.width]
    }
}

/// Value of a flag not covered by a typed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    /// Bare flag when true, omitted when false.
    Switch(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

/// Directory, relative to its working directory, where the trainer saves
/// `<name>.pth` after a training phase. The trainer does not take it as a flag.
pub const CHECKPOINT_DIR: &str = "checkpoints";

/// Flags rendered from typed fields. Extra flags may not reuse these.
pub const TYPED_FLAGS: &[&str] = &[
    "eval",
    "test",
    "viz",
    "name",
    "stage",
    "validation",
    "test_set",
    "restore_ckpt",
    "gpus",
    "num_steps",
    "batch_size",
    "lr",
    "image_size",
    "wdecay",
    "gamma",
    "tiny",
    "large",
    "huge",
    "gigantic",
    "wnorm",
    "mixed_precision",
    "f_solver",
    "f_thres",
    "n_losses",
    "phantom_grad",
    "output_path",
    "total_run",
    "start_run",
    "eval_interval",
];

/// Configuration of a single trainer invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    pub stage: Stage,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default, alias = "validation")]
    pub validation_sets: Vec<String>,
    #[serde(default, alias = "test_set")]
    pub test_sets: Vec<String>,
    #[serde(default = "default_gpu_ids", alias = "gpus")]
    pub gpu_ids: BTreeSet<u32>,
    #[serde(default = "default_num_steps")]
    pub num_steps: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_learning_rate", alias = "lr")]
    pub learning_rate: f64,
    #[serde(default = "default_image_size")]
    pub image_size: ImageSize,
    #[serde(default = "default_weight_decay", alias = "wdecay")]
    pub weight_decay: f64,
    #[serde(default)]
    pub gamma: Option<f64>,
    #[serde(default, alias = "f_solver")]
    pub solver_kind: SolverKind,
    #[serde(default = "default_f_thres")]
    pub f_thres: u32,
    #[serde(default = "default_one")]
    pub n_losses: u32,
    #[serde(default = "default_one")]
    pub phantom_grad: u32,
    #[serde(default, alias = "restore_ckpt")]
    pub restore_checkpoint: Option<PathBuf>,
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub model_size: Option<ModelSize>,
    #[serde(default)]
    pub wnorm: bool,
    #[serde(default)]
    pub mixed_precision: bool,
    #[serde(default)]
    pub total_run: Option<u32>,
    #[serde(default)]
    pub start_run: Option<u32>,
    #[serde(default)]
    pub eval_interval: Option<u64>,
    #[serde(default)]
    pub extra_flags: BTreeMap<String, FlagValue>,
}

fn default_gpu_ids() -> BTreeSet<u32> {
    BTreeSet::from([0, 1])
}

fn default_num_steps() -> u64 {
    100_000
}

fn default_batch_size() -> u32 {
    6
}

fn default_learning_rate() -> f64 {
    0.00002
}

fn default_image_size() -> ImageSize {
    ImageSize::new(384, 512)
}

fn default_weight_decay() -> f64 {
    0.00005
}

fn default_f_thres() -> u32 {
    40
}

fn default_one() -> u32 {
    1
}

impl ExperimentConfig {
    /// A training phase with the trainer's own defaults.
    pub fn new(name: &str, stage: Stage) -> Self {
        Self {
            name: name.to_string(),
            stage,
            mode: RunMode::Train,
            validation_sets: Vec::new(),
            test_sets: Vec::new(),
            gpu_ids: default_gpu_ids(),
            num_steps: default_num_steps(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            image_size: default_image_size(),
            weight_decay: default_weight_decay(),
            gamma: None,
            solver_kind: SolverKind::default(),
            f_thres: default_f_thres(),
            n_losses: 1,
            phantom_grad: 1,
            restore_checkpoint: None,
            output_path: None,
            model_size: None,
            wnorm: false,
            mixed_precision: false,
            total_run: None,
            start_run: None,
            eval_interval: None,
            extra_flags: BTreeMap::new(),
        }
    }

    /// Path of the checkpoint the trainer writes when this phase completes.
    pub fn output_checkpoint(&self, checkpoint_dir: &Path) -> PathBuf {
        checkpoint_dir.join(format!("{}.pth", self.name))
    }

    /// Check field ranges and flag collisions.
    pub fn validate(&self) -> Result<(), LaunchError> {
        let invalid = |reason: String| LaunchError::InvalidExperiment {
            phase: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(invalid("name must not contain path separators".into()));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be positive".into()));
        }
        if self.num_steps == 0 {
            return Err(invalid("num_steps must be positive".into()));
        }
        if self.f_thres == 0 {
            return Err(invalid("f_thres must be positive".into()));
        }
        if self.n_losses == 0 {
            return Err(invalid("n_losses must be at least 1".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(invalid(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if let Some(gamma) = self.gamma {
            if !(gamma > 0.0 && gamma <= 1.0) {
                return Err(invalid(format!("gamma must be in (0, 1], got {gamma}")));
            }
        }
        if self.image_size.height == 0 || self.image_size.width == 0 {
            return Err(invalid("image_size must be positive".into()));
        }
        if self.gpu_ids.is_empty() {
            return Err(invalid("at least one GPU id is required".into()));
        }
        if let (Some(start), Some(total)) = (self.start_run, self.total_run) {
            if start == 0 || start > total {
                return Err(invalid(format!(
                    "start_run must be in 1..={total}, got {start}"
                )));
            }
        }
        for key in self.extra_flags.keys() {
            let bare = key.trim_start_matches('-');
            if bare.is_empty() {
                return Err(invalid("extra flag name must not be empty".into()));
            }
            if !bare.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid(format!(
                    "extra flag '{key}' may only contain letters, digits and '_'"
                )));
            }
            // The trainer's parser expands unambiguous prefixes.
            if let Some(owned) = TYPED_FLAGS.iter().find(|f| f.starts_with(bare)) {
                return Err(invalid(format!(
                    "extra flag '--{bare}' would set '--{owned}', which a typed field owns"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_trainer_defaults() {
        let config = ExperimentConfig::new("deq-flow", Stage::Chairs);
        assert_eq!(config.mode, RunMode::Train);
        assert_eq!(config.batch_size, 6);
        assert_eq!(config.image_size, ImageSize::new(384, 512));
        assert_eq!(config.gpu_ids, BTreeSet::from([0, 1]));
        assert!(config.restore_checkpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_output_checkpoint_follows_name() {
        let config = ExperimentConfig::new("deq-flow-A-chairs", Stage::Chairs);
        assert_eq!(
            config.output_checkpoint(Path::new("checkpoints")),
            PathBuf::from("checkpoints/deq-flow-A-chairs.pth")
        );
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let mut config = ExperimentConfig::new("x", Stage::Things);
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::new("x", Stage::Things);
        config.gamma = Some(1.5);
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::new("x", Stage::Things);
        config.learning_rate = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::new("x", Stage::Things);
        config.gpu_ids.clear();
        assert!(config.validate().is_err());

        let config = ExperimentConfig::new("runs/x", Stage::Things);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_typed_flag_in_extras() {
        let mut config = ExperimentConfig::new("x", Stage::Sintel);
        config
            .extra_flags
            .insert("--f_thres".into(), FlagValue::Int(12));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("--f_thres"));
    }

    #[test]
    fn test_validate_rejects_inline_values_in_extra_keys() {
        for key in ["f_thres=12", "lr 0.1", "batch-size", "gpus,1"] {
            let mut config = ExperimentConfig::new("x", Stage::Sintel);
            config.extra_flags.insert(key.into(), FlagValue::Switch(true));
            assert!(config.validate().is_err(), "accepted extra flag {key:?}");
        }
    }

    #[test]
    fn test_validate_rejects_abbreviated_typed_flags() {
        for key in ["f_thre", "batch", "--restore", "test"] {
            let mut config = ExperimentConfig::new("x", Stage::Sintel);
            config.extra_flags.insert(key.into(), FlagValue::Int(5));
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("typed field"), "{key}: {err}");
        }

        let mut config = ExperimentConfig::new("x", Stage::Sintel);
        config
            .extra_flags
            .insert("f_thres_decay".into(), FlagValue::Float(0.5));
        config.extra_flags.insert("schedule".into(), FlagValue::Text("onecycle".into()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_start_run_bounds() {
        let mut config = ExperimentConfig::new("x", Stage::Chairs);
        config.total_run = Some(3);
        config.start_run = Some(4);
        assert!(config.validate().is_err());
        config.start_run = Some(2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_aliases_and_defaults() {
        let config: ExperimentConfig = toml::from_str(
            r#"
name = "deq-flow-H-things"
stage = "things"
validation = ["sintel", "kitti"]
gpus = [1, 0, 1]
lr = 0.000125
image_size = [432, 960]
f_solver = "broyden"
restore_ckpt = "checkpoints/deq-flow-H-chairs.pth"
model_size = "huge"

[extra_flags]
schedule = "onecycle"
clip = 1.0
active_bn = true
"#,
        )
        .unwrap();
        assert_eq!(config.stage, Stage::Things);
        assert_eq!(config.validation_sets, vec!["sintel", "kitti"]);
        assert_eq!(config.gpu_ids, BTreeSet::from([0, 1]));
        assert_eq!(config.image_size, ImageSize::new(432, 960));
        assert_eq!(config.solver_kind, SolverKind::Broyden);
        assert_eq!(config.model_size, Some(ModelSize::Huge));
        assert_eq!(config.batch_size, 6);
        assert_eq!(
            config.extra_flags.get("schedule"),
            Some(&FlagValue::Text("onecycle".into()))
        );
        assert_eq!(config.extra_flags.get("clip"), Some(&FlagValue::Float(1.0)));
        assert_eq!(
            config.extra_flags.get("active_bn"),
            Some(&FlagValue::Switch(true))
        );
    }

    #[test]
    fn test_mode_switches() {
        assert_eq!(RunMode::Train.switch(), None);
        assert_eq!(RunMode::Eval.switch(), Some("--eval"));
        assert!(RunMode::Train.produces_checkpoint());
        assert!(!RunMode::Test.produces_checkpoint());
    }
}
