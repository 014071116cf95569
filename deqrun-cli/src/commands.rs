//! CLI subcommand handlers.

use crate::Cli;
use crate::Commands;
use crate::ConfigAction;
use crate::PipelineSource;
use deqrun_core::config::workspace_config_path;
use deqrun_core::presets::{PRESETS, preset};
use deqrun_core::{
    CHECKPOINT_DIR, ConfigError, LaunchSettings, Launcher, LauncherConfig, Pipeline, PipelineRun,
    ProcessTrainer,
};
use std::path::Path;
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(cli: Cli, workspace: &Path) -> anyhow::Result<()> {
    let config = load_config(&cli, workspace)?;
    match cli.command {
        Commands::Run { source, dry_run } => handle_run(&source, dry_run, &config, workspace).await,
        Commands::Plan { source } => handle_plan(&source, &config, workspace),
        Commands::Validate { source } => handle_validate(&source, &config, workspace),
        Commands::Presets => {
            println!("Built-in pipelines:");
            for (name, summary) in PRESETS {
                println!("  {:<18} {}", name, summary);
            }
            Ok(())
        }
        Commands::Runs { limit } => handle_runs(limit, &config, workspace),
        Commands::Config { action } => handle_config(action, &config, workspace),
    }
}

/// Load layered configuration and apply CLI overrides.
fn load_config(cli: &Cli, workspace: &Path) -> anyhow::Result<LauncherConfig> {
    let mut config = deqrun_core::load_config(Some(workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(python) = &cli.python {
        config.trainer.python_path = python.clone();
    }
    Ok(config)
}

fn resolve_pipeline(source: &PipelineSource) -> Result<Pipeline, ConfigError> {
    let checkpoint_dir = Path::new(CHECKPOINT_DIR);
    match (&source.pipeline, &source.preset) {
        (Some(path), _) => Pipeline::load(path, checkpoint_dir),
        (None, Some(name)) => {
            preset(name, checkpoint_dir).ok_or_else(|| ConfigError::UnknownPreset {
                name: name.clone(),
            })
        }
        // clap's argument group requires one of the two.
        (None, None) => unreachable!("pipeline source is required"),
    }
}

fn build_launcher(config: &LauncherConfig, workspace: &Path) -> Launcher {
    let trainer = ProcessTrainer::with_timeout(config.trainer.timeout());
    Launcher::new(
        Arc::new(trainer),
        LaunchSettings::from_config(config, workspace),
    )
}

fn print_plan(launcher: &Launcher, pipeline: &Pipeline) -> anyhow::Result<()> {
    let invocations = launcher.plan(pipeline)?;
    println!(
        "Pipeline '{}' ({} phases, cwd {}):",
        pipeline.name,
        invocations.len(),
        launcher.settings().working_dir.display()
    );
    for (i, (phase, inv)) in pipeline.phases.iter().zip(&invocations).enumerate() {
        println!("\n  [{}] {} ({})", i + 1, phase.name, phase.stage);
        println!("      {}", inv.command_line());
    }
    Ok(())
}

async fn handle_run(
    source: &PipelineSource,
    dry_run: bool,
    config: &LauncherConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    let pipeline = resolve_pipeline(source)?;
    let launcher = build_launcher(config, workspace);

    if dry_run {
        return print_plan(&launcher, &pipeline);
    }

    let shutdown = async {
        // If the handler cannot be installed, never interrupt.
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        tracing::warn!("Interrupt received, stopping current phase");
    };

    let run = match launcher.launch_until(&pipeline, shutdown).await {
        Ok(run) => run,
        Err(err) => {
            if let Some(phase) = err.phase() {
                eprintln!("Pipeline '{}' halted at phase '{}'.", pipeline.name, phase);
            }
            return Err(err.into());
        }
    };
    let elapsed: f64 = run.phases.iter().filter_map(|p| p.elapsed_secs).sum();
    println!(
        "Pipeline '{}' completed: {} phase(s) in {:.1}s (run {})",
        run.pipeline,
        run.completed_phases(),
        elapsed,
        run.id
    );
    Ok(())
}

fn handle_plan(
    source: &PipelineSource,
    config: &LauncherConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    let pipeline = resolve_pipeline(source)?;
    print_plan(&build_launcher(config, workspace), &pipeline)
}

fn handle_validate(
    source: &PipelineSource,
    config: &LauncherConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    let pipeline = resolve_pipeline(source)?;
    pipeline.validate(Path::new(CHECKPOINT_DIR))?;
    println!(
        "Pipeline '{}' is valid ({} phases).",
        pipeline.name,
        pipeline.len()
    );

    if let Some(ckpt) = pipeline.external_checkpoint() {
        let settings = LaunchSettings::from_config(config, workspace);
        let resolved = settings.resolve_checkpoint(ckpt);
        if !resolved.is_file() {
            println!(
                "  Warning: initial checkpoint {} does not exist yet.",
                resolved.display()
            );
        }
    }
    Ok(())
}

fn handle_runs(limit: usize, config: &LauncherConfig, workspace: &Path) -> anyhow::Result<()> {
    let dir = config.records.resolve_dir(workspace);
    let runs = PipelineRun::list(&dir)?;
    if runs.is_empty() {
        println!("No recorded runs in {}.", dir.display());
        return Ok(());
    }
    for run in runs.iter().take(limit) {
        println!(
            "{}  {:<20} {:?}  {}/{} phases  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.pipeline,
            run.status,
            run.completed_phases(),
            run.phases.len(),
            run.id
        );
        if let Some(failed) = run.phases.iter().find(|p| p.error.is_some()) {
            println!(
                "    {}: {}",
                failed.name,
                failed.error.as_deref().unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    config: &LauncherConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let toml_str = toml::to_string_pretty(&LauncherConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            if !deqrun_core::config_exists(Some(workspace)) {
                println!("# No configuration file found; showing defaults.\n");
            }
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
