//! Cohorts (named person groups attached to a scope) and their members.

use rusqlite::{params, params_from_iter, OptionalExtension};

use roster_core::{CohortId, ScopeId, UserId};

use crate::error::{sql_err, StoreError};
use crate::store::StoreTx;
use crate::tables::placeholders;

const CHUNK: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortRef {
    pub id: CohortId,
    pub name: String,
    pub idnumber: String,
}

impl StoreTx<'_> {
    pub fn find_cohort(&self, scope: ScopeId, name: &str) -> Result<Option<CohortId>, StoreError> {
        self.tx
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE contextid = ?1 AND name = ?2",
                    self.tables.cohort
                ),
                params![scope.0, name],
                |row| row.get(0).map(CohortId),
            )
            .optional()
            .map_err(|e| sql_err("find cohort", e))
    }

    pub fn insert_cohort(
        &self,
        scope: ScopeId,
        name: &str,
        idnumber: &str,
        description: &str,
    ) -> Result<CohortId, StoreError> {
        self.tx
            .execute(
                &format!(
                    "INSERT INTO {} (contextid, name, idnumber, description, timecreated, timemodified)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    self.tables.cohort
                ),
                params![scope.0, name, idnumber, description, self.now],
            )
            .map_err(|e| sql_err("insert cohort", e))?;
        Ok(CohortId(self.tx.last_insert_rowid()))
    }

    /// Add a member. Returns `false` if the person was already a member.
    pub fn add_member(&self, cohort: CohortId, user: UserId) -> Result<bool, StoreError> {
        let inserted = self
            .tx
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (cohortid, userid, timeadded) VALUES (?1, ?2, ?3)",
                    self.tables.cohort_members
                ),
                params![cohort.0, user.0, self.now],
            )
            .map_err(|e| sql_err("add cohort member", e))?;
        Ok(inserted > 0)
    }

    /// Cohorts in `scope` whose identifier starts with `idnumber_prefix` and
    /// that have `user` as a member.
    pub fn memberships_in_family(
        &self,
        user: UserId,
        scope: ScopeId,
        idnumber_prefix: &str,
    ) -> Result<Vec<CohortRef>, StoreError> {
        let mut stmt = self
            .tx
            .prepare(&format!(
                "SELECT c.id, c.name, c.idnumber
                 FROM {cohort} c
                 JOIN {members} m ON m.cohortid = c.id
                 WHERE m.userid = ?1 AND c.contextid = ?2
                   AND substr(c.idnumber, 1, length(?3)) = ?3
                 ORDER BY c.id",
                cohort = self.tables.cohort,
                members = self.tables.cohort_members,
            ))
            .map_err(|e| sql_err("list cohort memberships", e))?;
        let rows = stmt
            .query_map(params![user.0, scope.0, idnumber_prefix], |row| {
                Ok(CohortRef {
                    id: CohortId(row.get(0)?),
                    name: row.get(1)?,
                    idnumber: row.get(2)?,
                })
            })
            .map_err(|e| sql_err("list cohort memberships", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| sql_err("list cohort memberships", e))
    }

    pub fn members(&self, cohort: CohortId) -> Result<Vec<UserId>, StoreError> {
        let mut stmt = self
            .tx
            .prepare(&format!(
                "SELECT userid FROM {} WHERE cohortid = ?1 ORDER BY userid",
                self.tables.cohort_members
            ))
            .map_err(|e| sql_err("list cohort members", e))?;
        let rows = stmt
            .query_map(params![cohort.0], |row| row.get(0).map(UserId))
            .map_err(|e| sql_err("list cohort members", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| sql_err("list cohort members", e))
    }

    /// Remove the given persons from a cohort. Returns rows removed.
    pub fn remove_members(&self, cohort: CohortId, users: &[UserId]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for chunk in users.chunks(CHUNK) {
            let args = std::iter::once(cohort.0).chain(chunk.iter().map(|u| u.0));
            removed += self
                .tx
                .execute(
                    &format!(
                        "DELETE FROM {} WHERE cohortid = ? AND userid IN ({})",
                        self.tables.cohort_members,
                        placeholders(chunk.len())
                    ),
                    params_from_iter(args),
                )
                .map_err(|e| sql_err("remove cohort members", e))?;
        }
        Ok(removed)
    }
}
