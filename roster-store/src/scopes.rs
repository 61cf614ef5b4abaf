//! Unit categories, private zones and their authorization scopes.
//!
//! A unit is a category row keyed by its canonical unit key (`idnumber`)
//! with a category-level scope. Its private zone is a course row under the
//! category, with a course-level scope.

use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use roster_core::{CategoryId, ScopeId, UnitKey};

use crate::error::{sql_err, StoreError};
use crate::store::StoreTx;
use crate::tables::level;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRecord {
    pub category: CategoryId,
    pub scope: ScopeId,
    pub key: UnitKey,
    pub name: String,
    pub description: String,
    pub theme: String,
}

impl UnitRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            category: CategoryId(row.get(0)?),
            scope: ScopeId(row.get(1)?),
            key: UnitKey(row.get(2)?),
            name: row.get(3)?,
            description: row.get(4)?,
            theme: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUnit<'a> {
    pub key: &'a UnitKey,
    pub name: &'a str,
    pub description: &'a str,
    pub theme: &'a str,
}

impl StoreTx<'_> {
    /// The root (system) scope.
    pub fn system_scope(&self) -> Result<Option<ScopeId>, StoreError> {
        self.tx
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE contextlevel = ?1 ORDER BY id LIMIT 1",
                    self.tables.context
                ),
                params![level::SYSTEM],
                |row| row.get(0).map(ScopeId),
            )
            .optional()
            .map_err(|e| sql_err("find system scope", e))
    }

    pub fn find_unit(&self, key: &UnitKey) -> Result<Option<UnitRecord>, StoreError> {
        self.tx
            .query_row(
                &format!(
                    "SELECT cc.id, ctx.id, cc.idnumber, cc.name, cc.description, cc.theme
                     FROM {cat} cc
                     JOIN {ctx} ctx ON ctx.contextlevel = ?1 AND ctx.instanceid = cc.id
                     WHERE cc.idnumber = ?2
                     ORDER BY cc.id LIMIT 1",
                    cat = self.tables.course_categories,
                    ctx = self.tables.context,
                ),
                params![level::CATEGORY, key.as_str()],
                UnitRecord::from_row,
            )
            .optional()
            .map_err(|e| sql_err("find unit", e))
    }

    /// Create a top-level unit category together with its scope.
    pub fn insert_unit(&self, unit: &NewUnit<'_>) -> Result<UnitRecord, StoreError> {
        self.tx
            .execute(
                &format!(
                    "INSERT INTO {} (name, idnumber, description, parent, depth, theme, timemodified)
                     VALUES (?1, ?2, ?3, 0, 1, ?4, ?5)",
                    self.tables.course_categories
                ),
                params![unit.name, unit.key.as_str(), unit.description, unit.theme, self.now],
            )
            .map_err(|e| sql_err("insert unit", e))?;
        let category = CategoryId(self.tx.last_insert_rowid());
        self.tx
            .execute(
                &format!("UPDATE {} SET path = '/' || id WHERE id = ?1", self.tables.course_categories),
                params![category.0],
            )
            .map_err(|e| sql_err("insert unit", e))?;

        let system = self.system_scope()?.unwrap_or(ScopeId(1));
        let scope = self.insert_scope(level::CATEGORY, category.0, system, 2)?;
        debug!(unit = %unit.key, category = %category, scope = %scope, "unit category created");

        Ok(UnitRecord {
            category,
            scope,
            key: unit.key.clone(),
            name: unit.name.to_string(),
            description: unit.description.to_string(),
            theme: unit.theme.to_string(),
        })
    }

    pub fn update_unit(
        &self,
        category: CategoryId,
        name: &str,
        description: &str,
    ) -> Result<(), StoreError> {
        self.tx
            .execute(
                &format!(
                    "UPDATE {} SET name = ?2, description = ?3, timemodified = ?4 WHERE id = ?1",
                    self.tables.course_categories
                ),
                params![category.0, name, description, self.now],
            )
            .map_err(|e| sql_err("update unit", e))?;
        Ok(())
    }

    /// Scope of the private zone with this short name.
    pub fn find_private_zone(&self, shortname: &str) -> Result<Option<ScopeId>, StoreError> {
        self.tx
            .query_row(
                &format!(
                    "SELECT ctx.id FROM {course} c
                     JOIN {ctx} ctx ON ctx.contextlevel = ?1 AND ctx.instanceid = c.id
                     WHERE c.shortname = ?2",
                    course = self.tables.course,
                    ctx = self.tables.context,
                ),
                params![level::COURSE, shortname],
                |row| row.get(0).map(ScopeId),
            )
            .optional()
            .map_err(|e| sql_err("find private zone", e))
    }

    /// Create a private zone under a unit category.
    pub fn insert_private_zone(
        &self,
        unit: &UnitRecord,
        shortname: &str,
        fullname: &str,
    ) -> Result<ScopeId, StoreError> {
        self.tx
            .execute(
                &format!(
                    "INSERT INTO {} (category, fullname, shortname, timecreated, timemodified)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    self.tables.course
                ),
                params![unit.category.0, fullname, shortname, self.now],
            )
            .map_err(|e| sql_err("insert private zone", e))?;
        let course = self.tx.last_insert_rowid();
        let scope = self.insert_scope(level::COURSE, course, unit.scope, 3)?;
        debug!(unit = %unit.key, shortname, scope = %scope, "private zone created");
        Ok(scope)
    }

    fn insert_scope(
        &self,
        contextlevel: i64,
        instance: i64,
        parent: ScopeId,
        depth: i64,
    ) -> Result<ScopeId, StoreError> {
        self.tx
            .execute(
                &format!(
                    "INSERT INTO {} (contextlevel, instanceid, depth) VALUES (?1, ?2, ?3)",
                    self.tables.context
                ),
                params![contextlevel, instance, depth],
            )
            .map_err(|e| sql_err("insert scope", e))?;
        let id = self.tx.last_insert_rowid();
        self.tx
            .execute(
                &format!(
                    "UPDATE {ctx} SET path = (SELECT path FROM {ctx} WHERE id = ?2) || '/' || id
                     WHERE id = ?1",
                    ctx = self.tables.context
                ),
                params![id, parent.0],
            )
            .map_err(|e| sql_err("insert scope", e))?;
        Ok(ScopeId(id))
    }
}
