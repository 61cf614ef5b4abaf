//! Shared fixture: a temp directory holding the store and watermark file, an
//! in-memory directory, and helpers to inspect the store afterwards.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use roster_core::{Config, DirectoryTimestamp, Login, RoleKind, ScopeId, UnitKey, UserId};
use roster_directory::entry::attr;
use roster_directory::{Directory, DirectoryError, DirectoryReader, Filter, MemoryDirectory, RawEntry};
use roster_store::{ScopeFamily, Store, StoreTx};
use roster_sync::{pipeline, run_at, RunOptions, RunReport, SyncError};
use tempfile::TempDir;

pub const PEOPLE: &str = "ou=people,dc=example,dc=org";
pub const STRUCTURES: &str = "ou=structures,dc=example,dc=org";
pub const OLD: &str = "20240101000000Z";

pub fn ts(s: &str) -> DirectoryTimestamp {
    s.parse().expect("timestamp")
}

pub struct Fixture {
    pub home: TempDir,
    pub config: Config,
    pub directory: MemoryDirectory,
}

/// Route engine logs to the test harness; `RUST_LOG` overrides the level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}

impl Fixture {
    /// `extra` is appended verbatim to the YAML configuration.
    pub fn new(units: &[&str], extra: &str) -> Self {
        init_logging();
        let home = TempDir::new().expect("tempdir");
        let config = config_at(home.path(), units, extra);
        pipeline::init_store(&config).expect("init store");
        Self {
            home,
            config,
            directory: MemoryDirectory::new(),
        }
    }

    /// A fixture whose store has the schema but no seeded roles.
    pub fn unseeded(units: &[&str]) -> Self {
        init_logging();
        let home = TempDir::new().expect("tempdir");
        let config = config_at(home.path(), units, "");
        let store = Store::open(&config.store.path, &config.store.table_prefix).expect("open");
        store.init_schema().expect("schema");
        Self {
            home,
            config,
            directory: MemoryDirectory::new(),
        }
    }

    pub fn watermark_path(&self) -> PathBuf {
        self.config.watermarks.path.clone()
    }

    pub fn run(&mut self, options: RunOptions, at: &str) -> Result<RunReport, SyncError> {
        run_with(&self.config, &mut self.directory, options, at)
    }

    pub fn store(&self) -> Store {
        Store::open(&self.config.store.path, &self.config.store.table_prefix).expect("open store")
    }
}

pub fn run_with<D: Directory>(
    config: &Config,
    directory: D,
    options: RunOptions,
    at: &str,
) -> Result<RunReport, SyncError> {
    let mut store = Store::open(&config.store.path, &config.store.table_prefix)?;
    let mut reader = DirectoryReader::new(directory, &config.directory);
    run_at(config, &mut reader, &mut store, &options, ts(at))
}

pub fn config_at(home: &Path, units: &[&str], extra: &str) -> Config {
    let units = units
        .iter()
        .map(|u| format!("  - \"{u}\"\n"))
        .collect::<String>();
    let yaml = format!(
        "store:\n  path: {store}\n\
         directory:\n  url: ldap://unused\n  people_base: \"{PEOPLE}\"\n  structures_base: \"{STRUCTURES}\"\n\
         watermarks:\n  path: {marks}\n\
         units:\n{units}{extra}",
        store = home.join("store.db").display(),
        marks = home.join("state").join("watermarks.txt").display(),
    );
    let config: Config = serde_yaml::from_str(&yaml).expect("config yaml");
    config.validate().expect("valid config");
    config
}

// ---------------------------------------------------------------------------
// Directory entries
// ---------------------------------------------------------------------------

pub fn siren(key: &str) -> String {
    format!("1929{key}")
}

pub fn structure(key: &str, name: &str, kind: &str) -> RawEntry {
    RawEntry::new(format!("ENTStructureSIREN={},{STRUCTURES}", siren(key)))
        .with(attr::OBJECT_CLASS, ["ENTEtablissement"])
        .with(attr::STRUCTURE_KEY, [key])
        .with(attr::STRUCTURE_NAME, [name])
        .with(attr::STRUCTURE_REGISTRATION, [siren(key)])
        .with(attr::POSTAL_CODE, ["29200"])
        .with(attr::STRUCTURE_TYPE, [kind])
}

pub fn class_ref(unit: &str, label: &str) -> String {
    format!("ENTStructureSIREN={},{STRUCTURES}${label}", siren(unit))
}

fn person(login: &str, object_class: &str, units: &[&str], modified: &str) -> RawEntry {
    let mut entry = RawEntry::new(format!("uid={login},{PEOPLE}"))
        .with(attr::OBJECT_CLASS, ["ENTPerson", object_class])
        .with(attr::LOGIN, [login])
        .with(attr::GIVEN_NAME, ["Given"])
        .with(attr::FAMILY_NAME, [login.to_uppercase()])
        .with(attr::MAIL, [format!("{login}@example.org")])
        .with(attr::AFFILIATIONS, units.iter().copied())
        .with(attr::MODIFIED, [modified]);
    if let Some(first) = units.first() {
        entry = entry.with(attr::CURRENT_UNIT, [*first]);
    }
    entry
}

pub fn student(login: &str, unit: &str, class: &str, level: &str, modified: &str) -> RawEntry {
    person(login, "ENTEleve", &[unit], modified)
        .with(attr::STUDENT_CLASSES, [class_ref(unit, class)])
        .with(attr::STUDENT_LEVEL, [level])
}

pub fn teacher(login: &str, units: &[&str], classes: &[String], modified: &str) -> RawEntry {
    person(login, "ENTAuxEnseignant", units, modified)
        .with(attr::TEACHER_CLASSES, classes.iter().cloned())
}

pub fn staff(login: &str, unit: &str, groups: &[&str], profiles: &[&str], modified: &str) -> RawEntry {
    person(login, "ENTAuxNonEnsEtab", &[unit], modified)
        .with(attr::GROUPS, groups.iter().copied())
        .with(attr::PROFILES, profiles.iter().copied())
}

/// Wraps a directory and fails every search whose filter mentions `needle`.
pub struct FailOn<'d> {
    pub inner: &'d mut MemoryDirectory,
    pub needle: String,
}

impl Directory for FailOn<'_> {
    fn search(
        &mut self,
        base: &str,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Vec<RawEntry>, DirectoryError> {
        if filter.to_ldap().contains(&self.needle) {
            return Err(DirectoryError::Unavailable(format!(
                "connection reset while searching {base}"
            )));
        }
        self.inner.search(base, filter, attrs)
    }
}

// ---------------------------------------------------------------------------
// Store inspection
// ---------------------------------------------------------------------------

pub fn user(tx: &StoreTx<'_>, login: &str) -> UserId {
    tx.find_user(&Login::from(login))
        .expect("query")
        .unwrap_or_else(|| panic!("{login} should exist"))
        .id
}

pub fn unit_scope(tx: &StoreTx<'_>, key: &str) -> ScopeId {
    tx.find_unit(&UnitKey::from(key))
        .expect("query")
        .unwrap_or_else(|| panic!("unit {key} should exist"))
        .scope
}

pub fn zone_scope(tx: &StoreTx<'_>, key: &str) -> ScopeId {
    tx.find_private_zone(&format!("ZONE-PRIVEE-{key}"))
        .expect("query")
        .unwrap_or_else(|| panic!("zone {key} should exist"))
}

pub fn role(tx: &StoreTx<'_>, config: &Config, kind: RoleKind) -> roster_core::RoleId {
    tx.role_id(config.roles.shortname(kind))
        .expect("query")
        .expect("seeded role")
}

pub fn holders(tx: &StoreTx<'_>, config: &Config, kind: RoleKind, scope: ScopeId) -> Vec<UserId> {
    tx.holders(role(tx, config, kind), scope)
        .expect("query")
        .into_iter()
        .map(|g| g.user)
        .collect()
}

pub fn category_grants(
    tx: &StoreTx<'_>,
    config: &Config,
    kind: RoleKind,
    user: UserId,
) -> Vec<ScopeId> {
    tx.grants_in_family(role(tx, config, kind), user, ScopeFamily::UnitCategories)
        .expect("query")
        .into_iter()
        .map(|g| g.scope)
        .collect()
}

pub fn cohort_members(tx: &StoreTx<'_>, scope: ScopeId, name: &str) -> Vec<UserId> {
    let id = tx
        .find_cohort(scope, name)
        .expect("query")
        .unwrap_or_else(|| panic!("cohort '{name}' should exist"));
    tx.members(id).expect("query")
}
