use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateTableError {
    #[error("Failed to read rate table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rate table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid rate table: {0}")]
    Invalid(String),
}
