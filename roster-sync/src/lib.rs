//! # roster-sync
//!
//! The reconciliation engine. Given a directory reader and a store, a run
//! brings persons, role grants and cohort memberships in line with the
//! directory, one transaction for the whole batch.
//!
//! - [`watermark`]: per-unit "last processed" instants
//! - [`resolver`]: unit groups and unit scopes
//! - [`upsert`]: person records
//! - [`roles`]: role families and the local-admin purge
//! - [`cohorts`]: cohort families and the opt-in purge
//! - [`orchestrator`]: the run state machine

pub mod cohorts;
pub mod error;
pub mod naming;
pub mod orchestrator;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod roles;
pub mod upsert;
pub mod watermark;

pub use error::SyncError;
pub use orchestrator::{run, run_at, select_units, RunOptions};
pub use report::{ChangeCounts, DataQualityWarning, PassReport, RunReport, UnitReport};
pub use watermark::{WatermarkFile, Watermarks};
