//! Error types for roster-store.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal store failures. Any of these aborts the run and discards the
/// in-flight transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be opened.
    #[error("cannot open store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A statement failed; `context` names the operation.
    #[error("store statement failed ({context}): {source}")]
    Statement {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// The configured table prefix contains characters outside `[A-Za-z0-9_]`.
    #[error("invalid table prefix '{0}'")]
    InvalidPrefix(String),
}

/// Convenience constructor for [`StoreError::Statement`].
pub(crate) fn sql_err(context: &'static str, source: rusqlite::Error) -> StoreError {
    StoreError::Statement { context, source }
}
