//! Run records: what a pipeline launch did, phase by phase.
//!
//! Records are written as pretty JSON next to each other in the records
//! directory, one file per launch, using write-to-`.tmp`-then-rename.

use crate::error::LaunchError;
use crate::experiment::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Status of one phase (or of the whole run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Outcome of a single phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub stage: Stage,
    pub command: String,
    pub status: PhaseStatus,
    pub exit_code: Option<i32>,
    pub elapsed_secs: Option<f64>,
    pub output_checkpoint: Option<PathBuf>,
    pub error: Option<String>,
}

/// A single launch of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub pipeline: String,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phases: Vec<PhaseRecord>,
}

impl PipelineRun {
    pub fn new(pipeline: &str, phases: Vec<PhaseRecord>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pipeline: pipeline.to_string(),
            status: PhaseStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            phases,
        }
    }

    /// Mark the run finished. Phases never reached become `Skipped`.
    pub fn finish(&mut self, status: PhaseStatus) {
        for phase in &mut self.phases {
            if phase.status == PhaseStatus::Pending {
                phase.status = PhaseStatus::Skipped;
            }
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn completed_phases(&self) -> usize {
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Completed)
            .count()
    }

    /// File name this run is stored under.
    pub fn file_name(&self) -> String {
        format!("{}-{}.json", self.pipeline, self.id)
    }

    /// Atomically write this record into `dir`, returning its path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, LaunchError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, LaunchError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Load every record in `dir`, most recent first.
    ///
    /// Files that fail to parse are skipped with a warning.
    pub fn list(dir: &Path) -> Result<Vec<Self>, LaunchError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::load(&path) {
                Ok(run) => runs.push(run),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping run record"),
            }
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> PhaseRecord {
        PhaseRecord {
            name: name.into(),
            stage: Stage::Chairs,
            command: format!("python main.py --name {name}"),
            status: PhaseStatus::Pending,
            exit_code: None,
            elapsed_secs: None,
            output_checkpoint: None,
            error: None,
        }
    }

    #[test]
    fn test_finish_marks_unreached_skipped() {
        let mut run = PipelineRun::new("p", vec![record("a"), record("b")]);
        run.phases[0].status = PhaseStatus::Failed;
        run.finish(PhaseStatus::Failed);
        assert_eq!(run.phases[1].status, PhaseStatus::Skipped);
        assert_eq!(run.completed_phases(), 0);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_save_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut run = PipelineRun::new("deq-flow-H", vec![record("a")]);
        run.phases[0].status = PhaseStatus::Completed;
        run.finish(PhaseStatus::Completed);

        let path = run.save(dir.path()).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        std::fs::write(dir.path().join("garbage.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let runs = PipelineRun::list(dir.path()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);
        assert_eq!(runs[0].status, PhaseStatus::Completed);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let runs = PipelineRun::list(Path::new("/nonexistent/deqrun/runs")).unwrap();
        assert!(runs.is_empty());
    }
}
