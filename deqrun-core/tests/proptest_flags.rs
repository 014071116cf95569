//! Property-based tests for flag rendering and pipeline chaining.

use proptest::prelude::*;

use deqrun_core::{
    ExperimentConfig, FlagValue, ImageSize, Pipeline, SolverKind, Stage, build_flags,
};
use std::path::{Path, PathBuf};

fn stage() -> impl Strategy<Value = Stage> {
    prop_oneof![
        Just(Stage::Chairs),
        Just(Stage::Things),
        Just(Stage::Sintel),
        Just(Stage::Kitti),
        Just(Stage::Autoflow),
    ]
}

fn solver() -> impl Strategy<Value = SolverKind> {
    prop_oneof![
        Just(SolverKind::Naive),
        Just(SolverKind::Anderson),
        Just(SolverKind::Broyden),
    ]
}

prop_compose! {
    fn experiment()(
        name in "[a-z][a-z0-9-]{0,20}",
        stage in stage(),
        solver in solver(),
        (f_thres, n_losses, phantom_grad) in (1u32..200, 1u32..12, 1u32..8),
        batch_size in 1u32..64,
        (height, width) in (1u32..1024, 1u32..1024),
        lr in 1e-6f64..1e-2,
        gpus in prop::collection::btree_set(0u32..8, 1..4),
        validation in prop::collection::vec("[a-z]{3,8}", 0..3),
        extras in prop::collection::btree_map("[a-z_]{3,10}", 0i64..1000, 0..3),
        restore in prop::option::of("[a-z]{1,10}"),
    ) -> ExperimentConfig {
        let mut config = ExperimentConfig::new(&name, stage);
        config.solver_kind = solver;
        config.f_thres = f_thres;
        config.n_losses = n_losses;
        config.phantom_grad = phantom_grad;
        config.batch_size = batch_size;
        config.image_size = ImageSize::new(height, width);
        config.learning_rate = lr;
        config.gpu_ids = gpus;
        config.validation_sets = validation;
        config.extra_flags = extras
            .into_iter()
            .map(|(k, v)| (format!("x_{k}"), FlagValue::Int(v)))
            .collect();
        config.restore_checkpoint = restore.map(|r| PathBuf::from(format!("checkpoints/{r}.pth")));
        config
    }
}

proptest! {
    #[test]
    fn flags_are_deterministic(config in experiment()) {
        let first = build_flags(&config);
        let second = build_flags(&config.clone());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn flags_carry_solver_settings(config in experiment()) {
        let flags = build_flags(&config);
        let pos = flags.iter().position(|f| f == "--f_solver").unwrap();
        prop_assert_eq!(flags[pos + 1].as_str(), config.solver_kind.as_str());
        prop_assert_eq!(&flags[pos + 2], "--f_thres");
        prop_assert_eq!(flags[pos + 3].clone(), config.f_thres.to_string());
    }

    #[test]
    fn restore_flag_present_iff_checkpoint(config in experiment()) {
        let flags = build_flags(&config);
        let has_flag = flags.iter().any(|f| f == "--restore_ckpt");
        prop_assert_eq!(has_flag, config.restore_checkpoint.is_some());
    }

    #[test]
    fn gpus_render_sorted(config in experiment()) {
        let flags = build_flags(&config);
        let pos = flags.iter().position(|f| f == "--gpus").unwrap();
        let rendered: Vec<u32> = flags[pos + 1..]
            .iter()
            .take_while(|f| !f.starts_with("--"))
            .map(|f| f.parse().unwrap())
            .collect();
        let expected: Vec<u32> = config.gpu_ids.iter().copied().collect();
        prop_assert_eq!(rendered, expected);
    }

    #[test]
    fn chained_pipelines_link_consecutive_phases(
        stages in prop::collection::vec(stage(), 1..6),
    ) {
        let phases: Vec<ExperimentConfig> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| ExperimentConfig::new(&format!("phase-{i}"), *s))
            .collect();
        let dir = Path::new("checkpoints");
        let pipeline = Pipeline::chain("prop", phases, dir);

        prop_assert!(pipeline.validate(dir).is_ok());
        prop_assert!(pipeline.phases[0].restore_checkpoint.is_none());
        for i in 1..pipeline.len() {
            prop_assert_eq!(
                pipeline.phases[i].restore_checkpoint.clone(),
                Some(pipeline.phases[i - 1].output_checkpoint(dir))
            );
        }
    }
}
