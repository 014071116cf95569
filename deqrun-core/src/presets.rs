//! Built-in pipelines for the standard DEQ-Flow training schedules.

use crate::experiment::{ExperimentConfig, ImageSize, ModelSize, RunMode, SolverKind, Stage};
use crate::pipeline::Pipeline;
use std::path::Path;

/// Names accepted by [`preset`], with a one-line summary each.
pub const PRESETS: &[(&str, &str)] = &[
    ("deq-flow-b", "base model, chairs -> things"),
    ("deq-flow-h", "huge model, chairs -> things"),
    (
        "deq-flow-h-full",
        "huge model, chairs -> things -> sintel -> kitti",
    ),
    (
        "eval-things",
        "evaluate the huge things checkpoint on sintel and kitti",
    ),
];

pub fn preset_names() -> impl Iterator<Item = &'static str> {
    PRESETS.iter().map(|(name, _)| *name)
}

/// Look up a built-in pipeline by name.
pub fn preset(name: &str, checkpoint_dir: &Path) -> Option<Pipeline> {
    let pipeline = match name {
        "deq-flow-b" => Pipeline::chain(
            "deq-flow-B",
            vec![chairs("deq-flow-B", None), things("deq-flow-B", None)],
            checkpoint_dir,
        ),
        "deq-flow-h" => Pipeline::chain(
            "deq-flow-H",
            vec![
                chairs("deq-flow-H", Some(ModelSize::Huge)),
                things("deq-flow-H", Some(ModelSize::Huge)),
            ],
            checkpoint_dir,
        ),
        "deq-flow-h-full" => Pipeline::chain(
            "deq-flow-H-full",
            vec![
                chairs("deq-flow-H", Some(ModelSize::Huge)),
                things("deq-flow-H", Some(ModelSize::Huge)),
                sintel("deq-flow-H", Some(ModelSize::Huge)),
                kitti("deq-flow-H", Some(ModelSize::Huge)),
            ],
            checkpoint_dir,
        ),
        "eval-things" => {
            let mut eval = deq("deq-flow-H-eval", Stage::Things, Some(ModelSize::Huge));
            eval.mode = RunMode::Eval;
            eval.validation_sets = vec!["sintel".into(), "kitti".into()];
            eval.restore_checkpoint =
                Some(checkpoint_dir.join("deq-flow-H-things.pth"));
            Pipeline::new("eval-things", vec![eval])
        }
        _ => return None,
    };
    Some(pipeline)
}

/// Settings shared by every DEQ phase.
fn deq(name: &str, stage: Stage, size: Option<ModelSize>) -> ExperimentConfig {
    ExperimentConfig {
        model_size: size,
        wnorm: true,
        solver_kind: SolverKind::Anderson,
        f_thres: 36,
        n_losses: 6,
        phantom_grad: 3,
        gpu_ids: [0, 1].into(),
        ..ExperimentConfig::new(name, stage)
    }
}

fn chairs(prefix: &str, size: Option<ModelSize>) -> ExperimentConfig {
    ExperimentConfig {
        validation_sets: vec!["chairs".into()],
        num_steps: 120_000,
        batch_size: 12,
        learning_rate: 0.0004,
        image_size: ImageSize::new(368, 496),
        weight_decay: 0.0001,
        eval_interval: Some(20_000),
        ..deq(&format!("{prefix}-chairs"), Stage::Chairs, size)
    }
}

fn things(prefix: &str, size: Option<ModelSize>) -> ExperimentConfig {
    ExperimentConfig {
        validation_sets: vec!["sintel".into(), "kitti".into()],
        num_steps: 120_000,
        batch_size: 6,
        learning_rate: 0.000125,
        image_size: ImageSize::new(432, 960),
        weight_decay: 0.0001,
        f_thres: 40,
        ..deq(&format!("{prefix}-things"), Stage::Things, size)
    }
}

fn sintel(prefix: &str, size: Option<ModelSize>) -> ExperimentConfig {
    ExperimentConfig {
        validation_sets: vec!["sintel".into()],
        num_steps: 120_000,
        batch_size: 6,
        learning_rate: 0.000125,
        image_size: ImageSize::new(368, 768),
        weight_decay: 0.00001,
        gamma: Some(0.85),
        f_thres: 40,
        ..deq(&format!("{prefix}-sintel"), Stage::Sintel, size)
    }
}

fn kitti(prefix: &str, size: Option<ModelSize>) -> ExperimentConfig {
    ExperimentConfig {
        validation_sets: vec!["kitti".into()],
        num_steps: 50_000,
        batch_size: 6,
        learning_rate: 0.0001,
        image_size: ImageSize::new(288, 960),
        weight_decay: 0.00001,
        gamma: Some(0.85),
        f_thres: 40,
        ..deq(&format!("{prefix}-kitti"), Stage::Kitti, size)
    }
}
