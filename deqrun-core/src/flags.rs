//! Rendering an [`ExperimentConfig`] into the trainer's command-line flags.
//!
//! The output is a pure function of the config: same config, same flags, same
//! order. Set-valued and map-valued fields are ordered collections, so nothing
//! here depends on hash iteration order.

use crate::experiment::{ExperimentConfig, FlagValue};

/// Build the full flag list for one trainer invocation.
pub fn build_flags(config: &ExperimentConfig) -> Vec<String> {
    let mut flags = FlagList::default();

    if let Some(switch) = config.mode.switch() {
        flags.switch(switch);
    }
    flags.value("--name", &config.name);
    flags.value("--stage", config.stage.as_str());
    flags.values("--validation", &config.validation_sets);
    flags.values("--test_set", &config.test_sets);
    if let Some(ckpt) = &config.restore_checkpoint {
        flags.value("--restore_ckpt", ckpt.display());
    }
    flags.values("--gpus", &config.gpu_ids);
    flags.value("--num_steps", config.num_steps);
    flags.value("--batch_size", config.batch_size);
    flags.value("--lr", config.learning_rate);
    flags.values(
        "--image_size",
        [config.image_size.height, config.image_size.width],
    );
    flags.value("--wdecay", config.weight_decay);
    if let Some(gamma) = config.gamma {
        flags.value("--gamma", gamma);
    }
    if let Some(size) = config.model_size {
        flags.switch(size.switch());
    }
    if config.wnorm {
        flags.switch("--wnorm");
    }
    if config.mixed_precision {
        flags.switch("--mixed_precision");
    }
    flags.value("--f_solver", config.solver_kind.as_str());
    flags.value("--f_thres", config.f_thres);
    flags.value("--n_losses", config.n_losses);
    flags.value("--phantom_grad", config.phantom_grad);
    if let Some(path) = &config.output_path {
        flags.value("--output_path", path.display());
    }
    if let Some(total) = config.total_run {
        flags.value("--total_run", total);
    }
    if let Some(start) = config.start_run {
        flags.value("--start_run", start);
    }
    if let Some(interval) = config.eval_interval {
        flags.value("--eval_interval", interval);
    }

    for (key, value) in &config.extra_flags {
        let flag = format!("--{}", key.trim_start_matches('-'));
        match value {
            FlagValue::Switch(true) => flags.switch(&flag),
            FlagValue::Switch(false) => {}
            FlagValue::Int(v) => flags.value(&flag, v),
            FlagValue::Float(v) => flags.value(&flag, v),
            FlagValue::Text(v) => flags.value(&flag, v),
            FlagValue::List(vs) => flags.values(&flag, vs),
        }
    }

    flags.0
}

/// Render flags as a single shell-like line, for logs and dry runs.
pub fn render_command_line(program: &str, leading: &[String], flags: &[String]) -> String {
    std::iter::once(program)
        .chain(leading.iter().map(String::as_str))
        .chain(flags.iter().map(String::as_str))
        .map(quote)
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[derive(Default)]
struct FlagList(Vec<String>);

impl FlagList {
    fn switch(&mut self, flag: &str) {
        self.0.push(flag.to_string());
    }

    fn value(&mut self, flag: &str, value: impl ToString) {
        self.0.push(flag.to_string());
        self.0.push(value.to_string());
    }

    /// Multi-valued flag (`nargs='+'`); omitted entirely when empty.
    fn values<I>(&mut self, flag: &str, values: I)
    where
        I: IntoIterator,
        I::Item: ToString,
    {
        let start = self.0.len();
        self.0.push(flag.to_string());
        self.0.extend(values.into_iter().map(|v| v.to_string()));
        if self.0.len() == start + 1 {
            self.0.truncate(start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{ModelSize, RunMode, SolverKind, Stage};
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn window<'a>(flags: &'a [String], flag: &str, n: usize) -> Option<Vec<&'a str>> {
        let pos = flags.iter().position(|f| f == flag)?;
        Some(flags[pos..=pos + n].iter().map(String::as_str).collect())
    }

    #[test]
    fn test_chairs_anderson_flags() {
        let mut config = ExperimentConfig::new("deq-flow-A-chairs", Stage::Chairs);
        config.solver_kind = SolverKind::Anderson;
        config.f_thres = 36;
        let flags = build_flags(&config);

        assert_eq!(window(&flags, "--stage", 1).unwrap(), ["--stage", "chairs"]);
        assert_eq!(
            window(&flags, "--f_solver", 3).unwrap(),
            ["--f_solver", "anderson", "--f_thres", "36"]
        );
        assert!(!flags.iter().any(|f| f == "--restore_ckpt"));
    }

    #[test]
    fn test_things_restore_flag() {
        let mut config = ExperimentConfig::new("deq-flow-A-things", Stage::Things);
        config.restore_checkpoint = Some(PathBuf::from("checkpoints/deq-flow-A-chairs.pth"));
        let flags = build_flags(&config);
        assert_eq!(
            window(&flags, "--restore_ckpt", 1).unwrap(),
            ["--restore_ckpt", "checkpoints/deq-flow-A-chairs.pth"]
        );
    }

    #[test]
    fn test_full_flag_order() {
        let mut config = ExperimentConfig::new("deq-flow-H-sintel", Stage::Sintel);
        config.validation_sets = vec!["sintel".into()];
        config.gpu_ids = [1, 0].into_iter().collect();
        config.num_steps = 120_000;
        config.batch_size = 6;
        config.learning_rate = 0.000125;
        config.image_size = crate::experiment::ImageSize::new(368, 768);
        config.weight_decay = 0.00001;
        config.gamma = Some(0.85);
        config.model_size = Some(ModelSize::Huge);
        config.wnorm = true;
        config.f_thres = 40;
        config.n_losses = 6;
        config.phantom_grad = 3;

        let expected: Vec<String> = [
            "--name", "deq-flow-H-sintel", "--stage", "sintel", "--validation", "sintel",
            "--gpus", "0", "1", "--num_steps", "120000", "--batch_size", "6", "--lr",
            "0.000125", "--image_size", "368", "768", "--wdecay", "0.00001", "--gamma",
            "0.85", "--huge", "--wnorm", "--f_solver", "anderson", "--f_thres", "40",
            "--n_losses", "6", "--phantom_grad", "3",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(build_flags(&config), expected);
    }

    #[test]
    fn test_eval_mode_and_extras() {
        let mut config = ExperimentConfig::new("deq-flow-H", Stage::Things);
        config.mode = RunMode::Test;
        config.test_sets = vec!["sintel".into(), "kitti".into()];
        config.output_path = Some(PathBuf::from("submission"));
        config
            .extra_flags
            .insert("warm_start".into(), FlagValue::Switch(true));
        config
            .extra_flags
            .insert("active_bn".into(), FlagValue::Switch(false));
        config
            .extra_flags
            .insert("--viz_split".into(), FlagValue::List(vec!["train".into()]));

        let flags = build_flags(&config);
        assert_eq!(flags[0], "--test");
        assert_eq!(
            window(&flags, "--test_set", 2).unwrap(),
            ["--test_set", "sintel", "kitti"]
        );
        assert!(!flags.iter().any(|f| f == "--validation"));
        assert!(!flags.iter().any(|f| f == "--active_bn"));
        let tail: Vec<&str> = flags[flags.len() - 3..].iter().map(String::as_str).collect();
        assert_eq!(tail, ["--viz_split", "train", "--warm_start"]);
    }

    #[test]
    fn test_build_flags_is_deterministic() {
        let mut config = ExperimentConfig::new("a", Stage::Kitti);
        config.extra_flags.insert("b".into(), FlagValue::Int(1));
        config.extra_flags.insert("a".into(), FlagValue::Int(2));
        assert_eq!(build_flags(&config), build_flags(&config.clone()));
    }

    #[test]
    fn test_render_command_line_quotes() {
        let line = render_command_line(
            "python",
            &["main.py".to_string()],
            &["--name".to_string(), "my run".to_string()],
        );
        assert_eq!(line, "python main.py --name 'my run'");
    }
}
