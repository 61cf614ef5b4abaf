//! Roster core library: domain types, run configuration, errors.
//!
//! - [`types`]: natural keys, directory timestamps, role kinds, row ids
//! - [`config`]: YAML configuration model, load and validation
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{
    CategoryId, CohortId, DirectoryTimestamp, FieldId, GrantId, Login, PersonKind, RoleId,
    RoleKind, ScopeId, StructureType, UnitKey, UserId,
};
