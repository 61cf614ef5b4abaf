//! Connection ownership and the single run transaction.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use roster_core::{DirectoryTimestamp, FieldId, RoleId};

use crate::error::{sql_err, StoreError};
use crate::schema;
use crate::tables::Tables;

/// An open relational store.
pub struct Store {
    conn: Connection,
    tables: Tables,
}

impl Store {
    /// Open (or create) a SQLite store file. The schema is not touched; use
    /// [`Store::init_schema`] to bootstrap a fresh file.
    pub fn open(path: &Path, table_prefix: &str) -> Result<Self, StoreError> {
        let tables = Tables::new(table_prefix)?;
        info!(path = %path.display(), prefix = table_prefix, "opening store");
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(std::time::Duration::from_secs(30))
            .map_err(|e| sql_err("set busy timeout", e))?;
        Ok(Self { conn, tables })
    }

    /// In-memory store with the schema already created.
    pub fn open_in_memory(table_prefix: &str) -> Result<Self, StoreError> {
        let tables = Tables::new(table_prefix)?;
        debug!("opening in-memory store");
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".into(),
            source,
        })?;
        let store = Self { conn, tables };
        store.init_schema()?;
        Ok(store)
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn init_schema(&self) -> Result<(), StoreError> {
        schema::init_schema(&self.conn, &self.tables)
    }

    /// Make sure a role with this short name exists, returning its id.
    pub fn ensure_role(&self, shortname: &str) -> Result<RoleId, StoreError> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (shortname, name) VALUES (?1, ?1)",
                    self.tables.role
                ),
                params![shortname],
            )
            .map_err(|e| sql_err("ensure role", e))?;
        self.conn
            .query_row(
                &format!("SELECT id FROM {} WHERE shortname = ?1", self.tables.role),
                params![shortname],
                |row| row.get(0).map(RoleId),
            )
            .map_err(|e| sql_err("ensure role", e))
    }

    /// Make sure a per-person attribute field exists, returning its id.
    pub fn ensure_profile_field(&self, shortname: &str) -> Result<FieldId, StoreError> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (shortname, name) VALUES (?1, ?1)",
                    self.tables.user_info_field
                ),
                params![shortname],
            )
            .map_err(|e| sql_err("ensure profile field", e))?;
        self.conn
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE shortname = ?1",
                    self.tables.user_info_field
                ),
                params![shortname],
                |row| row.get(0).map(FieldId),
            )
            .map_err(|e| sql_err("ensure profile field", e))
    }

    /// Begin a transaction stamped with the current time.
    pub fn transaction(&mut self) -> Result<StoreTx<'_>, StoreError> {
        self.begin(Utc::now().timestamp())
    }

    /// Begin the run transaction. Rows it writes carry `started` as their
    /// modification time. Dropping the returned handle without calling
    /// [`StoreTx::commit`] rolls everything back.
    pub fn transaction_at(
        &mut self,
        started: DirectoryTimestamp,
    ) -> Result<StoreTx<'_>, StoreError> {
        self.begin(started.as_naive().and_utc().timestamp())
    }

    fn begin(&mut self, now: i64) -> Result<StoreTx<'_>, StoreError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| sql_err("begin transaction", e))?;
        Ok(StoreTx {
            tx,
            tables: &self.tables,
            now,
        })
    }

    /// Row count of a table, for diagnostics and tests.
    pub fn count(&self, table: &str) -> Result<i64, StoreError> {
        let table = self.table_name(table)?;
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .map_err(|e| sql_err("count rows", e))
    }

    fn table_name(&self, bare: &str) -> Result<&str, StoreError> {
        let t = &self.tables;
        let name = match bare {
            "user" => &t.user,
            "role" => &t.role,
            "role_assignments" => &t.role_assignments,
            "context" => &t.context,
            "course_categories" => &t.course_categories,
            "course" => &t.course,
            "cohort" => &t.cohort,
            "cohort_members" => &t.cohort_members,
            "user_info_field" => &t.user_info_field,
            "user_info_data" => &t.user_info_data,
            other => {
                return Err(sql_err(
                    "count rows",
                    rusqlite::Error::InvalidParameterName(other.to_string()),
                ))
            }
        };
        Ok(name)
    }
}

/// The single transaction a run works in.
pub struct StoreTx<'s> {
    pub(crate) tx: Transaction<'s>,
    pub(crate) tables: &'s Tables,
    pub(crate) now: i64,
}

impl<'s> StoreTx<'s> {
    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().map_err(|e| sql_err("commit", e))
    }

    pub fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().map_err(|e| sql_err("rollback", e))
    }

    /// Role id by short name, if the role exists.
    pub fn role_id(&self, shortname: &str) -> Result<Option<RoleId>, StoreError> {
        self.tx
            .query_row(
                &format!("SELECT id FROM {} WHERE shortname = ?1", self.tables.role),
                params![shortname],
                |row| row.get(0).map(RoleId),
            )
            .optional()
            .map_err(|e| sql_err("look up role", e))
    }

    /// Attribute field id by short name, if the field exists.
    pub fn profile_field(&self, shortname: &str) -> Result<Option<FieldId>, StoreError> {
        self.tx
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE shortname = ?1",
                    self.tables.user_info_field
                ),
                params![shortname],
                |row| row.get(0).map(FieldId),
            )
            .optional()
            .map_err(|e| sql_err("look up profile field", e))
    }
}
