//! Error types for roster-sync.

use std::path::PathBuf;

use thiserror::Error;

use roster_core::{ConfigError, RoleKind, UnitKey};
use roster_directory::DirectoryError;
use roster_store::StoreError;

/// Every fatal condition of a run. Any of these discards the run
/// transaction and leaves the watermark file untouched.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A configured role short name has no row in the store.
    #[error("role {kind} ('{shortname}') does not exist in the store")]
    MissingRole { kind: RoleKind, shortname: String },

    /// The extensible attribute field for class labels does not exist.
    #[error("profile field '{shortname}' does not exist in the store")]
    MissingProfileField { shortname: String },

    #[error("the store has no system scope")]
    MissingSystemScope,

    /// `--unit` named a key that is not in the configured unit list.
    #[error("unit {0} is not configured")]
    UnknownUnit(UnitKey),

    #[error("naming template '{name}': {source}")]
    Template {
        name: String,
        #[source]
        source: tera::Error,
    },

    #[error("invalid local admin pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
