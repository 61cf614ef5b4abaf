//! Table names for one deployment.
//!
//! The prefix is validated once here and is the only deployment-specific
//! text that ever reaches a statement; every value travels as a bound
//! parameter.

use crate::error::StoreError;

/// Context levels of the authorization-scope table.
pub mod level {
    pub const SYSTEM: i64 = 10;
    pub const CATEGORY: i64 = 40;
    pub const COURSE: i64 = 50;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub user: String,
    pub role: String,
    pub role_assignments: String,
    pub context: String,
    pub course_categories: String,
    pub course: String,
    pub cohort: String,
    pub cohort_members: String,
    pub user_info_field: String,
    pub user_info_data: String,
}

impl Tables {
    pub fn new(prefix: &str) -> Result<Self, StoreError> {
        if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StoreError::InvalidPrefix(prefix.to_string()));
        }
        let t = |name: &str| format!("{prefix}{name}");
        Ok(Self {
            user: t("user"),
            role: t("role"),
            role_assignments: t("role_assignments"),
            context: t("context"),
            course_categories: t("course_categories"),
            course: t("course"),
            cohort: t("cohort"),
            cohort_members: t("cohort_members"),
            user_info_field: t("user_info_field"),
            user_info_data: t("user_info_data"),
        })
    }
}

/// `?,?,?` for `n` bound values.
pub(crate) fn placeholders(n: usize) -> String {
    let mut s = "?,".repeat(n);
    s.pop();
    s
}
