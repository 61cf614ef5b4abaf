//! Person records and their extensible attributes.

use rusqlite::{params, OptionalExtension, Row};

use roster_core::{FieldId, Login, UserId};

use crate::error::{sql_err, StoreError};
use crate::store::StoreTx;

/// Directory-sourced values of a person record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonFields {
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    pub mail_display: i64,
    /// Display theme; `None` leaves the stored value alone.
    pub theme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    pub login: Login,
    pub given_name: String,
    pub family_name: String,
    pub email: String,
    pub mail_display: i64,
    pub theme: String,
}

impl UserRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: UserId(row.get(0)?),
            login: Login(row.get(1)?),
            given_name: row.get(2)?,
            family_name: row.get(3)?,
            email: row.get(4)?,
            mail_display: row.get(5)?,
            theme: row.get(6)?,
        })
    }

    /// Whether writing `fields` would change this record.
    pub fn differs_from(&self, fields: &PersonFields) -> bool {
        self.given_name != fields.given_name
            || self.family_name != fields.family_name
            || self.email != fields.email
            || self.mail_display != fields.mail_display
            || fields.theme.as_deref().is_some_and(|t| t != self.theme)
    }
}

impl StoreTx<'_> {
    pub fn find_user(&self, login: &Login) -> Result<Option<UserRecord>, StoreError> {
        self.tx
            .query_row(
                &format!(
                    "SELECT id, username, firstname, lastname, email, maildisplay, theme
                     FROM {} WHERE username = ?1",
                    self.tables.user
                ),
                params![login.as_str()],
                UserRecord::from_row,
            )
            .optional()
            .map_err(|e| sql_err("find user", e))
    }

    pub fn insert_user(&self, login: &Login, fields: &PersonFields) -> Result<UserId, StoreError> {
        self.tx
            .execute(
                &format!(
                    "INSERT INTO {} (username, firstname, lastname, email, maildisplay, theme,
                                     timecreated, timemodified)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    self.tables.user
                ),
                params![
                    login.as_str(),
                    fields.given_name,
                    fields.family_name,
                    fields.email,
                    fields.mail_display,
                    fields.theme.as_deref().unwrap_or(""),
                    self.now,
                ],
            )
            .map_err(|e| sql_err("insert user", e))?;
        Ok(UserId(self.tx.last_insert_rowid()))
    }

    pub fn update_user(&self, id: UserId, fields: &PersonFields) -> Result<(), StoreError> {
        self.tx
            .execute(
                &format!(
                    "UPDATE {} SET firstname = ?2, lastname = ?3, email = ?4, maildisplay = ?5,
                                   theme = COALESCE(?6, theme), timemodified = ?7
                     WHERE id = ?1",
                    self.tables.user
                ),
                params![
                    id.0,
                    fields.given_name,
                    fields.family_name,
                    fields.email,
                    fields.mail_display,
                    fields.theme,
                    self.now,
                ],
            )
            .map_err(|e| sql_err("update user", e))?;
        Ok(())
    }

    pub fn profile_value(&self, user: UserId, field: FieldId) -> Result<Option<String>, StoreError> {
        self.tx
            .query_row(
                &format!(
                    "SELECT data FROM {} WHERE userid = ?1 AND fieldid = ?2",
                    self.tables.user_info_data
                ),
                params![user.0, field.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| sql_err("read profile value", e))
    }

    /// Write an attribute value. Returns `false` when the stored value was
    /// already equal.
    pub fn set_profile_value(
        &self,
        user: UserId,
        field: FieldId,
        value: &str,
    ) -> Result<bool, StoreError> {
        if self.profile_value(user, field)?.as_deref() == Some(value) {
            return Ok(false);
        }
        self.tx
            .execute(
                &format!(
                    "INSERT INTO {} (userid, fieldid, data) VALUES (?1, ?2, ?3)
                     ON CONFLICT (userid, fieldid) DO UPDATE SET data = excluded.data",
                    self.tables.user_info_data
                ),
                params![user.0, field.0, value],
            )
            .map_err(|e| sql_err("write profile value", e))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::Store;

    use super::*;

    fn fields(email: &str) -> PersonFields {
        PersonFields {
            given_name: "Ada".into(),
            family_name: "Lovelace".into(),
            email: email.into(),
            mail_display: 2,
            theme: None,
        }
    }

    #[test]
    fn insert_then_find() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let tx = store.transaction().unwrap();
        let login = Login::from("f0001");
        let id = tx.insert_user(&login, &fields("ada@example.org")).unwrap();
        let found = tx.find_user(&login).unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.email, "ada@example.org");
        assert!(!found.differs_from(&fields("ada@example.org")));
        assert!(found.differs_from(&fields("other@example.org")));
    }

    #[test]
    fn update_keeps_theme_when_absent() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let tx = store.transaction().unwrap();
        let login = Login::from("f0002");
        let mut f = fields("a@example.org");
        f.theme = Some("cfa".into());
        let id = tx.insert_user(&login, &f).unwrap();
        tx.update_user(id, &fields("b@example.org")).unwrap();
        let found = tx.find_user(&login).unwrap().unwrap();
        assert_eq!(found.theme, "cfa");
        assert_eq!(found.email, "b@example.org");
    }

    #[test]
    fn profile_value_upserts() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let field = store.ensure_profile_field("classe").unwrap();
        let tx = store.transaction().unwrap();
        let id = tx.insert_user(&Login::from("s1"), &fields("")).unwrap();
        assert!(tx.set_profile_value(id, field, "2NDE A").unwrap());
        assert!(!tx.set_profile_value(id, field, "2NDE A").unwrap());
        assert!(tx.set_profile_value(id, field, "1ERE B").unwrap());
        assert_eq!(tx.profile_value(id, field).unwrap().as_deref(), Some("1ERE B"));
    }
}
