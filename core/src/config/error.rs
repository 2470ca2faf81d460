//! Error types for configuration operations

use std::path::PathBuf;

use thiserror::Error;

/// Errors during configuration loading, saving and validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration")]
    Load(#[from] confy::ConfyError),

    #[error("configuration file {} does not exist", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to save configuration")]
    Save(#[source] confy::ConfyError),

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}
