use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a chain processor or its factory.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Failed to attach chain to track {track}: {reason}")]
    Attach { track: usize, reason: String },

    #[error("Failed to load patch '{name}': {reason}")]
    PatchLoad { name: String, reason: String },

    #[error("Unsupported sound module '{0}'")]
    UnsupportedModule(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed patch file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from engine control operations that can fail.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Track {0} out of range")]
    InvalidTrack(usize),

    #[error("Patch index {0} out of range")]
    InvalidPatch(usize),

    #[error("No patch named '{0}'")]
    UnknownPatch(String),

    #[error("No chain factory installed")]
    NoChainFactory,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Errors from loading an engine configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}
