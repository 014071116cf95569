//! Error types for the deqrun core library.
//!
//! Uses `thiserror` for public API error types. Every variant is fatal to
//! a pipeline launch; nothing here is retried.

use std::path::PathBuf;

/// Top-level error type for launching pipelines.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Invalid experiment '{phase}': {reason}")]
    InvalidExperiment { phase: String, reason: String },

    #[error("Invalid pipeline '{pipeline}': {reason}")]
    InvalidPipeline { pipeline: String, reason: String },

    #[error("Checkpoint for phase '{phase}' not found: {}", .path.display())]
    MissingCheckpoint { phase: String, path: PathBuf },

    #[error("Failed to spawn trainer for phase '{phase}': {source}")]
    Spawn {
        phase: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Phase '{phase}' failed with {}", describe_exit(.code))]
    PhaseFailed { phase: String, code: Option<i32> },

    #[error("Phase '{phase}' timed out after {timeout_secs}s")]
    Timeout { phase: String, timeout_secs: u64 },

    #[error("Phase '{phase}' interrupted")]
    Interrupted { phase: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LaunchError {
    /// Name of the phase the error belongs to, if any.
    pub fn phase(&self) -> Option<&str> {
        match self {
            Self::InvalidExperiment { phase, .. }
            | Self::MissingCheckpoint { phase, .. }
            | Self::Spawn { phase, .. }
            | Self::PhaseFailed { phase, .. }
            | Self::Timeout { phase, .. }
            | Self::Interrupted { phase } => Some(phase),
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

/// Errors from loading configuration and pipeline definitions.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Failed to load configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Unknown preset: {name}")]
    UnknownPreset { name: String },
}
