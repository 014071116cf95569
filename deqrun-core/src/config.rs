//! Configuration system for deqrun.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! workspace config -> explicit file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/deqrun/config.toml` and/or
//! `.deqrun/config.toml` in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level launcher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub records: RecordsConfig,
}

/// How the external trainer is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// Interpreter used to run the trainer script.
    #[serde(default = "default_python")]
    pub python_path: PathBuf,
    /// Arguments placed before the script (unbuffered output by default).
    #[serde(default = "default_python_args")]
    pub python_args: Vec<String>,
    /// Trainer entry point, relative to the working directory.
    #[serde(default = "default_script")]
    pub script: PathBuf,
    /// Directory the trainer runs in (the workspace if unset).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Per-phase time limit in seconds. No limit if unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Extra environment variables for the trainer process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            python_path: default_python(),
            python_args: default_python_args(),
            script: default_script(),
            working_dir: None,
            timeout_secs: None,
            env: BTreeMap::new(),
        }
    }
}

impl TrainerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Directory the trainer runs in, given the workspace.
    pub fn resolve_working_dir(&self, workspace: &Path) -> PathBuf {
        match &self.working_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.to_path_buf(),
        }
    }
}

fn default_python() -> PathBuf {
    PathBuf::from("python")
}

fn default_python_args() -> Vec<String> {
    vec!["-u".to_string()]
}

fn default_script() -> PathBuf {
    PathBuf::from("main.py")
}

/// Run record persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Records directory, relative to the workspace.
    #[serde(default = "default_records_dir")]
    pub dir: PathBuf,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_records_dir(),
        }
    }
}

impl RecordsConfig {
    pub fn resolve_dir(&self, workspace: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            workspace.join(&self.dir)
        }
    }
}

fn default_records_dir() -> PathBuf {
    PathBuf::from(".deqrun/runs")
}

fn default_true() -> bool {
    true
}

/// User-level config file, if the platform has a config directory.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "deqrun", "deqrun")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".deqrun").join("config.toml")
}

/// Load configuration with layered sources.
///
/// An explicit `config_file` must exist; the user and workspace files are
/// used only when present.
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
) -> Result<LauncherConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(LauncherConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // DEQRUN_TRAINER__PYTHON_PATH, DEQRUN_CHECKPOINTS__DIR, etc.
    figment = figment.merge(Env::prefixed("DEQRUN_").split("__"));

    figment.extract().map_err(|e| ConfigError::Figment(Box::new(e)))
}

/// Whether any config file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
