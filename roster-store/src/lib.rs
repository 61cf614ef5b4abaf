//! Relational store access for the reconciliation engine.
//!
//! All writes of a run happen inside one [`StoreTx`]; table names carry the
//! deployment prefix and every value is a bound parameter.

pub mod cohorts;
pub mod error;
pub mod roles;
pub mod schema;
pub mod scopes;
pub mod store;
pub mod tables;
pub mod users;

pub use cohorts::CohortRef;
pub use error::StoreError;
pub use roles::{Grant, ScopeFamily};
pub use scopes::{NewUnit, UnitRecord};
pub use store::{Store, StoreTx};
pub use tables::Tables;
pub use users::{PersonFields, UserRecord};
