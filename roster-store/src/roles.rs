//! Role grants (person × role × scope).

use rusqlite::{params, params_from_iter, Row};

use roster_core::{GrantId, RoleId, ScopeId, UserId};

use crate::error::{sql_err, StoreError};
use crate::store::StoreTx;
use crate::tables::{level, placeholders};

/// Maximum ids bound in one `IN (...)` list.
const CHUNK: usize = 500;

/// The set of scopes a reconciliation is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeFamily<'a> {
    /// Category scopes of categories that carry a unit key.
    UnitCategories,
    /// Course scopes of courses whose short name starts with the prefix.
    PrivateZones { shortname_prefix: &'a str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub id: GrantId,
    pub role: RoleId,
    pub scope: ScopeId,
    pub user: UserId,
}

impl Grant {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: GrantId(row.get(0)?),
            role: RoleId(row.get(1)?),
            scope: ScopeId(row.get(2)?),
            user: UserId(row.get(3)?),
        })
    }
}

impl StoreTx<'_> {
    /// Grant a role. Returns `false` if the grant already existed.
    pub fn grant(&self, role: RoleId, scope: ScopeId, user: UserId) -> Result<bool, StoreError> {
        let inserted = self
            .tx
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (roleid, contextid, userid, timemodified)
                     VALUES (?1, ?2, ?3, ?4)",
                    self.tables.role_assignments
                ),
                params![role.0, scope.0, user.0, self.now],
            )
            .map_err(|e| sql_err("grant role", e))?;
        Ok(inserted > 0)
    }

    /// Every grant of `role` held by `user` inside `family`.
    pub fn grants_in_family(
        &self,
        role: RoleId,
        user: UserId,
        family: ScopeFamily<'_>,
    ) -> Result<Vec<Grant>, StoreError> {
        let ra = &self.tables.role_assignments;
        let ctx = &self.tables.context;
        match family {
            ScopeFamily::UnitCategories => self.query_grants(
                &format!(
                    "SELECT ra.id, ra.roleid, ra.contextid, ra.userid
                     FROM {ra} ra
                     JOIN {ctx} ctx ON ctx.id = ra.contextid AND ctx.contextlevel = ?3
                     JOIN {cat} cc ON cc.id = ctx.instanceid
                     WHERE ra.roleid = ?1 AND ra.userid = ?2 AND cc.idnumber <> ''
                     ORDER BY ra.id",
                    cat = self.tables.course_categories,
                ),
                params![role.0, user.0, level::CATEGORY],
            ),
            ScopeFamily::PrivateZones { shortname_prefix } => self.query_grants(
                &format!(
                    "SELECT ra.id, ra.roleid, ra.contextid, ra.userid
                     FROM {ra} ra
                     JOIN {ctx} ctx ON ctx.id = ra.contextid AND ctx.contextlevel = ?3
                     JOIN {course} c ON c.id = ctx.instanceid
                     WHERE ra.roleid = ?1 AND ra.userid = ?2
                       AND substr(c.shortname, 1, length(?4)) = ?4
                     ORDER BY ra.id",
                    course = self.tables.course,
                ),
                params![role.0, user.0, level::COURSE, shortname_prefix],
            ),
        }
    }

    /// Every holder of `role` in exactly `scope`.
    pub fn holders(&self, role: RoleId, scope: ScopeId) -> Result<Vec<Grant>, StoreError> {
        self.query_grants(
            &format!(
                "SELECT id, roleid, contextid, userid FROM {}
                 WHERE roleid = ?1 AND contextid = ?2 ORDER BY id",
                self.tables.role_assignments
            ),
            params![role.0, scope.0],
        )
    }

    fn query_grants(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Grant>, StoreError> {
        let mut stmt = self.tx.prepare(sql).map_err(|e| sql_err("list grants", e))?;
        let rows = stmt
            .query_map(args, Grant::from_row)
            .map_err(|e| sql_err("list grants", e))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| sql_err("list grants", e))
    }

    /// Delete grants by id. Returns the number of rows removed.
    pub fn revoke(&self, grants: &[GrantId]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for chunk in grants.chunks(CHUNK) {
            removed += self
                .tx
                .execute(
                    &format!(
                        "DELETE FROM {} WHERE id IN ({})",
                        self.tables.role_assignments,
                        placeholders(chunk.len())
                    ),
                    params_from_iter(chunk.iter().map(|g| g.0)),
                )
                .map_err(|e| sql_err("revoke grants", e))?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use roster_core::{Login, UnitKey};

    use crate::scopes::NewUnit;
    use crate::users::PersonFields;
    use crate::Store;

    use super::*;

    fn person() -> PersonFields {
        PersonFields {
            given_name: "G".into(),
            family_name: "F".into(),
            email: String::new(),
            mail_display: 2,
            theme: None,
        }
    }

    #[test]
    fn family_queries_only_see_their_scopes() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let role = store.ensure_role("coursecreator").unwrap();
        let tx = store.transaction().unwrap();
        let user = tx.insert_user(&Login::from("t1"), &person()).unwrap();

        let key = UnitKey::from("A");
        let unit = tx
            .insert_unit(&NewUnit { key: &key, name: "A", description: "", theme: "" })
            .unwrap();
        let zone = tx.insert_private_zone(&unit, "ZP-A", "Zone A").unwrap();
        let other = tx.insert_private_zone(&unit, "COURSE-1", "Course").unwrap();

        assert!(tx.grant(role, unit.scope, user).unwrap());
        assert!(!tx.grant(role, unit.scope, user).unwrap());
        assert!(tx.grant(role, zone, user).unwrap());
        assert!(tx.grant(role, other, user).unwrap());
        assert!(tx.grant(role, ScopeId(1), user).unwrap());

        let cats = tx.grants_in_family(role, user, ScopeFamily::UnitCategories).unwrap();
        assert_eq!(cats.iter().map(|g| g.scope).collect::<Vec<_>>(), vec![unit.scope]);

        let zones = tx
            .grants_in_family(role, user, ScopeFamily::PrivateZones { shortname_prefix: "ZP-" })
            .unwrap();
        assert_eq!(zones.iter().map(|g| g.scope).collect::<Vec<_>>(), vec![zone]);
    }

    #[test]
    fn revoke_by_id() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let role = store.ensure_role("director").unwrap();
        let tx = store.transaction().unwrap();
        let a = tx.insert_user(&Login::from("a"), &person()).unwrap();
        let b = tx.insert_user(&Login::from("b"), &person()).unwrap();
        tx.grant(role, ScopeId(1), a).unwrap();
        tx.grant(role, ScopeId(1), b).unwrap();

        let holders = tx.holders(role, ScopeId(1)).unwrap();
        assert_eq!(holders.len(), 2);
        assert_eq!(tx.revoke(&[holders[0].id]).unwrap(), 1);
        assert_eq!(tx.revoke(&[]).unwrap(), 0);
        let left = tx.holders(role, ScopeId(1)).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user, b);
    }
}
