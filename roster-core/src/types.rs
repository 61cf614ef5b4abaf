//! Domain types shared by the directory reader, the store and the engine.
//!
//! Natural keys (unit keys, logins) are newtypes over `String`; local row ids
//! are newtypes over `i64` so a context id can never be passed where a user id
//! is expected.

use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Natural keys
// ---------------------------------------------------------------------------

/// Natural key of a directory unit (establishment code, e.g. `0290009C`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitKey(pub String);

impl UnitKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for UnitKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UnitKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Natural key of a person (directory login id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Login(pub String);

impl Login {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Login {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Login {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Directory timestamp
// ---------------------------------------------------------------------------

/// `YYYYMMDDHHMMSS` followed by the `Z` marker.
pub const DIRECTORY_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%SZ";

/// A second-precision UTC instant in directory generalized-time form.
///
/// Ordering is chronological, which is also the lexical order of the
/// rendered form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirectoryTimestamp(NaiveDateTime);

impl DirectoryTimestamp {
    pub fn now() -> Self {
        Self::from_naive(Utc::now().naive_utc())
    }

    /// Sub-second precision is dropped so that render/parse is lossless.
    pub fn from_naive(value: NaiveDateTime) -> Self {
        Self(value.with_nanosecond(0).unwrap_or(value))
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.0
    }
}

impl fmt::Display for DirectoryTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DIRECTORY_TIMESTAMP_FORMAT))
    }
}

/// Error returned when a string is not a valid directory timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid directory timestamp '{0}'")]
pub struct TimestampParseError(pub String);

impl FromStr for DirectoryTimestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // Directories may return fractional seconds (`...SS.0Z`); keep the
        // 14 leading digits plus the marker.
        let digits: String = trimmed.chars().take(14).collect();
        if digits.len() != 14
            || !digits.chars().all(|c| c.is_ascii_digit())
            || !trimmed.ends_with('Z')
        {
            return Err(TimestampParseError(s.to_owned()));
        }
        NaiveDateTime::parse_from_str(&format!("{digits}Z"), DIRECTORY_TIMESTAMP_FORMAT)
            .map(Self)
            .map_err(|_| TimestampParseError(s.to_owned()))
    }
}

impl Serialize for DirectoryTimestamp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DirectoryTimestamp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Structure type of a unit as published by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StructureType {
    #[default]
    Standard,
    VocationalCenter,
    Agricultural,
}

impl StructureType {
    /// Classify a raw directory structure-type label.
    pub fn from_directory(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        if upper == "CFA" || upper.starts_with("CFA ") || upper.contains("APPRENTIS") {
            StructureType::VocationalCenter
        } else if upper.contains("AGRICOLE") || upper.starts_with("LEGTA") {
            StructureType::Agricultural
        } else {
            StructureType::Standard
        }
    }
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructureType::Standard => write!(f, "standard"),
            StructureType::VocationalCenter => write!(f, "vocational-center"),
            StructureType::Agricultural => write!(f, "agricultural"),
        }
    }
}

/// Kinds of role grant managed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    CourseCreator,
    LimitedUser,
    TeacherExtension,
    Director,
    LocalAdmin,
    DirectoryGrant,
}

impl RoleKind {
    pub fn all() -> &'static [RoleKind] {
        &[
            RoleKind::CourseCreator,
            RoleKind::LimitedUser,
            RoleKind::TeacherExtension,
            RoleKind::Director,
            RoleKind::LocalAdmin,
            RoleKind::DirectoryGrant,
        ]
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoleKind::CourseCreator => "course_creator",
            RoleKind::LimitedUser => "limited_user",
            RoleKind::TeacherExtension => "teacher_extension",
            RoleKind::Director => "director",
            RoleKind::LocalAdmin => "local_admin",
            RoleKind::DirectoryGrant => "directory_grant",
        };
        f.write_str(s)
    }
}

/// Directory population a person entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonKind {
    Student,
    Teacher,
    Staff,
    Other,
}

// ---------------------------------------------------------------------------
// Local row ids
// ---------------------------------------------------------------------------

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

row_id!(
    /// Local person id (internal identifier owned by the store).
    UserId
);
row_id!(
    /// Authorization scope (context) id.
    ScopeId
);
row_id!(RoleId);
row_id!(CohortId);
row_id!(
    /// Unit category id.
    CategoryId
);
row_id!(
    /// Role grant row id.
    GrantId
);
row_id!(
    /// Extensible per-person attribute field id.
    FieldId
);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_render_parse_is_lossless() {
        let ts: DirectoryTimestamp = "20240115083000Z".parse().expect("parse");
        assert_eq!(ts.to_string(), "20240115083000Z");
    }

    #[test]
    fn timestamp_accepts_fractional_seconds() {
        let ts: DirectoryTimestamp = "20240115083000.0Z".parse().expect("parse");
        assert_eq!(ts.to_string(), "20240115083000Z");
    }

    #[test]
    fn timestamp_rejects_garbage() {
        assert!("2024-01-15".parse::<DirectoryTimestamp>().is_err());
        assert!("20240115083000".parse::<DirectoryTimestamp>().is_err());
        assert!("20241315083000Z".parse::<DirectoryTimestamp>().is_err());
    }

    #[test]
    fn timestamp_error_names_the_input() {
        let err = "yesterday".parse::<DirectoryTimestamp>().unwrap_err();
        assert_eq!(err, TimestampParseError("yesterday".to_string()));
        assert_eq!(err.to_string(), "invalid directory timestamp 'yesterday'");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn timestamp_order_is_chronological() {
        let a: DirectoryTimestamp = "20231231235959Z".parse().unwrap();
        let b: DirectoryTimestamp = "20240101000000Z".parse().unwrap();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn now_has_no_subsecond_part() {
        let now = DirectoryTimestamp::now();
        let reparsed: DirectoryTimestamp = now.to_string().parse().unwrap();
        assert_eq!(now, reparsed);
    }

    #[test]
    fn structure_type_classification() {
        assert_eq!(StructureType::from_directory("CFA"), StructureType::VocationalCenter);
        assert_eq!(
            StructureType::from_directory("CFA agricole"),
            StructureType::VocationalCenter
        );
        assert_eq!(
            StructureType::from_directory("LYCEE AGRICOLE"),
            StructureType::Agricultural
        );
        assert_eq!(StructureType::from_directory("LYCEE"), StructureType::Standard);
        assert_eq!(StructureType::from_directory(""), StructureType::Standard);
    }

    #[test]
    fn newtype_display() {
        assert_eq!(UnitKey::from("0290009C").to_string(), "0290009C");
        assert_eq!(Login::from("f1234abc").to_string(), "f1234abc");
        assert_eq!(UserId(42).to_string(), "42");
        assert_eq!(RoleKind::LocalAdmin.to_string(), "local_admin");
    }
}
