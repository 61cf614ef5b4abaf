//! Error types for roster-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while locating, loading or validating the
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure while reading the configuration file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The configuration file did not exist at the expected path.
    #[error("configuration not found at {path}")]
    NotFound { path: PathBuf },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.roster/`.
    #[error("cannot determine home directory; set $HOME or pass --config")]
    HomeNotFound,

    /// Parsed, but semantically unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
