//! Shared entrypoint wiring the LDAP directory and the SQLite store from a
//! loaded configuration.

use tracing::info;

use roster_core::Config;
use roster_directory::{DirectoryReader, LdapDirectory};
use roster_store::Store;

use crate::error::{io_err, SyncError};
use crate::orchestrator::{self, RunOptions};
use crate::report::RunReport;

/// Connect to the configured directory and store, then run.
pub fn run(config: &Config, options: &RunOptions) -> Result<RunReport, SyncError> {
    let directory = LdapDirectory::connect(&config.directory)?;
    let mut reader = DirectoryReader::new(directory, &config.directory);
    let mut store = Store::open(&config.store.path, &config.store.table_prefix)?;

    let result = orchestrator::run(config, &mut reader, &mut store, options);
    reader.into_inner().close();
    if let Ok(report) = &result {
        info!(committed = report.committed, warnings = report.warnings.len(), "sync finished");
    }
    result
}

/// Create the schema in the configured store and seed the configured role
/// short names and class field.
pub fn init_store(config: &Config) -> Result<(), SyncError> {
    if let Some(dir) = config.store.path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let store = Store::open(&config.store.path, &config.store.table_prefix)?;
    store.init_schema()?;
    for &kind in roster_core::RoleKind::all() {
        store.ensure_role(config.roles.shortname(kind))?;
    }
    store.ensure_profile_field(&config.defaults.class_field)?;
    info!(path = %config.store.path.display(), "store initialised");
    Ok(())
}
