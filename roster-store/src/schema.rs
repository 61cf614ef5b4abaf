//! Store schema for a local SQLite deployment.
//!
//! Production stores are provisioned by the application that owns them; this
//! schema only bootstraps local stores and test databases. No migrations.

use rusqlite::{params, Connection};

use crate::error::{sql_err, StoreError};
use crate::tables::{level, Tables};

/// Create every table (idempotent) and the system scope row.
pub fn init_schema(conn: &Connection, t: &Tables) -> Result<(), StoreError> {
    let ddl = format!(
        "
        CREATE TABLE IF NOT EXISTS {user} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            firstname TEXT NOT NULL DEFAULT '',
            lastname TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            maildisplay INTEGER NOT NULL DEFAULT 2,
            theme TEXT NOT NULL DEFAULT '',
            timecreated INTEGER NOT NULL DEFAULT 0,
            timemodified INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS {role} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            shortname TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS {context} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contextlevel INTEGER NOT NULL,
            instanceid INTEGER NOT NULL,
            depth INTEGER NOT NULL DEFAULT 0,
            path TEXT NOT NULL DEFAULT '',
            UNIQUE (contextlevel, instanceid)
        );

        CREATE TABLE IF NOT EXISTS {course_categories} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            idnumber TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            parent INTEGER NOT NULL DEFAULT 0,
            depth INTEGER NOT NULL DEFAULT 1,
            path TEXT NOT NULL DEFAULT '',
            theme TEXT NOT NULL DEFAULT '',
            timemodified INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS {course_categories}_idnumber ON {course_categories} (idnumber);

        CREATE TABLE IF NOT EXISTS {course} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category INTEGER NOT NULL,
            fullname TEXT NOT NULL,
            shortname TEXT NOT NULL UNIQUE,
            timecreated INTEGER NOT NULL DEFAULT 0,
            timemodified INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS {role_assignments} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            roleid INTEGER NOT NULL,
            contextid INTEGER NOT NULL,
            userid INTEGER NOT NULL,
            timemodified INTEGER NOT NULL DEFAULT 0,
            UNIQUE (roleid, contextid, userid)
        );

        CREATE TABLE IF NOT EXISTS {cohort} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            contextid INTEGER NOT NULL,
            name TEXT NOT NULL,
            idnumber TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            timecreated INTEGER NOT NULL DEFAULT 0,
            timemodified INTEGER NOT NULL DEFAULT 0,
            UNIQUE (contextid, name)
        );

        CREATE TABLE IF NOT EXISTS {cohort_members} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cohortid INTEGER NOT NULL,
            userid INTEGER NOT NULL,
            timeadded INTEGER NOT NULL DEFAULT 0,
            UNIQUE (cohortid, userid)
        );

        CREATE TABLE IF NOT EXISTS {user_info_field} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            shortname TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS {user_info_data} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            userid INTEGER NOT NULL,
            fieldid INTEGER NOT NULL,
            data TEXT NOT NULL DEFAULT '',
            UNIQUE (userid, fieldid)
        );
        ",
        user = t.user,
        role = t.role,
        context = t.context,
        course_categories = t.course_categories,
        course = t.course,
        role_assignments = t.role_assignments,
        cohort = t.cohort,
        cohort_members = t.cohort_members,
        user_info_field = t.user_info_field,
        user_info_data = t.user_info_data,
    );
    conn.execute_batch(&ddl)
        .map_err(|e| sql_err("create schema", e))?;

    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {} (id, contextlevel, instanceid, depth, path)
             VALUES (1, ?1, 0, 1, '/1')",
            t.context
        ),
        params![level::SYSTEM],
    )
    .map_err(|e| sql_err("create system scope", e))?;

    Ok(())
}
