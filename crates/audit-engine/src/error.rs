use std::path::PathBuf;

use thiserror::Error;

/// Faults raised inside an analyzer. The orchestrator turns them into a
/// degraded finding instead of failing the run.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Arithmetic overflow: {0}")]
    Arithmetic(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Analyzer panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}
