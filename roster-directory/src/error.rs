//! Error types for roster-directory.

use thiserror::Error;

/// Fatal directory failures. Any of these aborts the run.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Could not open a connection to the directory server.
    #[error("cannot connect to directory at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: ldap3::LdapError,
    },

    /// Bind rejected or failed.
    #[error("directory bind as '{dn}' failed: {source}")]
    Bind {
        dn: String,
        #[source]
        source: ldap3::LdapError,
    },

    /// A bind DN is configured but no password could be resolved.
    #[error("no bind password for '{dn}': set bind_password or the variable named by bind_password_env")]
    MissingPassword { dn: String },

    /// Search failed (transport error or non-success result code).
    #[error("directory search {filter} under '{base}' failed: {source}")]
    Search {
        base: String,
        filter: String,
        #[source]
        source: ldap3::LdapError,
    },

    /// Failure raised by a non-LDAP directory implementation.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}
