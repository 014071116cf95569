//! Pipelines: ordered phases chained through checkpoint files.
//!
//! Phase `i > 0` restores the checkpoint phase `i - 1` writes. Pipelines are
//! loaded from TOML:
//!
//! ```toml
//! name = "deq-flow-H"
//! chain = true
//!
//! [[phase]]
//! name = "deq-flow-H-chairs"
//! stage = "chairs"
//!
//! [[phase]]
//! name = "deq-flow-H-things"
//! stage = "things"
//! ```

use crate::error::{ConfigError, LaunchError};
use crate::experiment::ExperimentConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// An ordered sequence of phases run one after another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    #[serde(rename = "phase", default)]
    pub phases: Vec<ExperimentConfig>,
}

/// On-disk pipeline definition.
#[derive(Debug, Deserialize)]
struct PipelineFile {
    name: String,
    /// Fill each later phase's restore checkpoint from the previous phase.
    #[serde(default)]
    chain: bool,
    #[serde(rename = "phase", default)]
    phases: Vec<ExperimentConfig>,
}

impl Pipeline {
    pub fn new(name: &str, phases: Vec<ExperimentConfig>) -> Self {
        Self {
            name: name.to_string(),
            phases,
        }
    }

    /// Build a pipeline whose later phases restore from their predecessor.
    ///
    /// Phase 0 keeps whatever restore checkpoint it was given.
    pub fn chain(name: &str, mut phases: Vec<ExperimentConfig>, checkpoint_dir: &Path) -> Self {
        for i in 1..phases.len() {
            let ckpt = phases[i - 1].output_checkpoint(checkpoint_dir);
            phases[i].restore_checkpoint = Some(ckpt);
        }
        Self::new(name, phases)
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Parse a pipeline definition from TOML text.
    pub fn from_toml(content: &str, checkpoint_dir: &Path) -> Result<Self, toml::de::Error> {
        let file: PipelineFile = toml::from_str(content)?;
        Ok(if file.chain {
            Self::chain(&file.name, file.phases, checkpoint_dir)
        } else {
            Self::new(&file.name, file.phases)
        })
    }

    /// Load a pipeline definition file.
    pub fn load(path: &Path, checkpoint_dir: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, checkpoint_dir).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })
    }

    /// Restore checkpoint phase 0 needs from outside the pipeline, if any.
    pub fn external_checkpoint(&self) -> Option<&PathBuf> {
        self.phases.first()?.restore_checkpoint.as_ref()
    }

    /// Validate every phase and the checkpoint chain.
    pub fn validate(&self, checkpoint_dir: &Path) -> Result<(), LaunchError> {
        let invalid = |reason: String| LaunchError::InvalidPipeline {
            pipeline: self.name.clone(),
            reason,
        };

        // The name is part of the run record's file name.
        if self.name.trim().is_empty() {
            return Err(invalid("pipeline name must not be empty".into()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(invalid("pipeline name must not contain path separators".into()));
        }
        if self.phases.is_empty() {
            return Err(invalid("pipeline has no phases".into()));
        }

        let mut seen = HashSet::new();
        for phase in &self.phases {
            phase.validate()?;
            if !seen.insert(phase.name.as_str()) {
                return Err(invalid(format!("duplicate phase name '{}'", phase.name)));
            }
        }

        for pair in self.phases.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if !prev.mode.produces_checkpoint() {
                return Err(invalid(format!(
                    "phase '{}' runs in {:?} mode and writes no checkpoint for '{}'",
                    prev.name, prev.mode, next.name
                )));
            }
            let expected = prev.output_checkpoint(checkpoint_dir);
            match &next.restore_checkpoint {
                Some(actual) if *actual == expected => {}
                Some(actual) => {
                    return Err(invalid(format!(
                        "phase '{}' restores {} but '{}' writes {}",
                        next.name,
                        actual.display(),
                        prev.name,
                        expected.display()
                    )));
                }
                None => {
                    return Err(invalid(format!(
                        "phase '{}' must restore {} from '{}'",
                        next.name,
                        expected.display(),
                        prev.name
                    )));
                }
            }
        }
        Ok(())
    }
}
