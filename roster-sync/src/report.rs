//! Run report and data-quality warnings.

use std::fmt;
use std::ops::AddAssign;

use serde::Serialize;
use tracing::warn;

use roster_core::{DirectoryTimestamp, Login, UnitKey};

use crate::cohorts::CohortChange;
use crate::roles::RoleChange;
use crate::upsert::UpsertOutcome;

/// Non-fatal findings: logged, collected, and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    UnitNotInDirectory { unit: UnitKey },
    EntryMissingLogin { dn: String, reason: String },
    UnknownAffiliation { login: Login, unit: UnitKey },
    MalformedWatermark { line: usize, content: String },
}

impl fmt::Display for DataQualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnitNotInDirectory { unit } => {
                write!(f, "unit {unit} not found in the directory; skipped")
            }
            Self::EntryMissingLogin { dn, reason } => write!(f, "entry {dn} ignored: {reason}"),
            Self::UnknownAffiliation { login, unit } => {
                write!(f, "{login} is affiliated with {unit}, which is not known locally")
            }
            Self::MalformedWatermark { line, content } => {
                write!(f, "watermark line {line} is malformed: '{content}'")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub seen: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub grants_added: usize,
    pub grants_revoked: usize,
    pub memberships_added: usize,
    pub memberships_removed: usize,
}

impl ChangeCounts {
    pub fn person(&mut self, outcome: UpsertOutcome) {
        self.seen += 1;
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn roles(&mut self, change: RoleChange) {
        self.grants_added += change.granted;
        self.grants_revoked += change.revoked;
    }

    pub fn cohorts(&mut self, change: CohortChange) {
        self.memberships_added += change.added;
        self.memberships_removed += change.removed;
    }

    /// Store writes this pass caused (unit and cohort creation excluded).
    pub fn writes(&self) -> usize {
        self.created
            + self.updated
            + self.grants_added
            + self.grants_revoked
            + self.memberships_added
            + self.memberships_removed
    }
}

impl AddAssign for ChangeCounts {
    fn add_assign(&mut self, other: Self) {
        self.seen += other.seen;
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.grants_added += other.grants_added;
        self.grants_revoked += other.grants_revoked;
        self.memberships_added += other.memberships_added;
        self.memberships_removed += other.memberships_removed;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub key: UnitKey,
    pub canonical_key: Option<UnitKey>,
    /// `None` for a full scan.
    pub since: Option<DirectoryTimestamp>,
    pub skipped: bool,
    pub students: ChangeCounts,
    pub staff: ChangeCounts,
}

impl UnitReport {
    pub fn new(key: UnitKey, since: Option<DirectoryTimestamp>) -> Self {
        Self {
            key,
            canonical_key: None,
            since,
            skipped: false,
            students: ChangeCounts::default(),
            staff: ChangeCounts::default(),
        }
    }

    /// Students and staff together.
    pub fn persons(&self) -> ChangeCounts {
        let mut counts = self.students;
        counts += self.staff;
        counts
    }
}

/// Counts for one cross-unit pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub key: UnitKey,
    pub since: Option<DirectoryTimestamp>,
    pub persons: ChangeCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub started_at: DirectoryTimestamp,
    pub full_scan: bool,
    pub dry_run: bool,
    pub units: Vec<UnitReport>,
    pub cross_unit: Vec<PassReport>,
    pub admin_grants_revoked: usize,
    pub memberships_purged: usize,
    pub warnings: Vec<DataQualityWarning>,
    pub committed: bool,
    pub watermarks_written: bool,
}

impl RunReport {
    pub fn new(started_at: DirectoryTimestamp, full_scan: bool, dry_run: bool) -> Self {
        Self {
            started_at,
            full_scan,
            dry_run,
            units: Vec::new(),
            cross_unit: Vec::new(),
            admin_grants_revoked: 0,
            memberships_purged: 0,
            warnings: Vec::new(),
            committed: false,
            watermarks_written: false,
        }
    }

    /// Log a warning and keep it for the report; repeats are collapsed.
    pub fn warn(&mut self, warning: DataQualityWarning) {
        if self.warnings.contains(&warning) {
            return;
        }
        warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn totals(&self) -> ChangeCounts {
        let mut total = ChangeCounts::default();
        for unit in &self.units {
            total += unit.persons();
        }
        for pass in &self.cross_unit {
            total += pass.persons;
        }
        total
    }
}
