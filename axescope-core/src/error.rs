use axescope_scanner::FetchError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("No domains could be resolved from the configuration")]
    NoDomains,

    #[error("State file {path} is corrupt: {reason}")]
    StateCorruption { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("cannot parse '{0}'")]
    Parse(String),

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("URL has no host: {0}")]
    MissingHost(String),
}

impl CoreError {
    /// Errors that end the run instead of being handled per target.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::Configuration(_) | CoreError::NoDomains | CoreError::StateCorruption { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
