//! Cohort Reconciler.
//!
//! A cohort's family and semantic label live in its id number,
//! `<family>:<scope key>:<label>`. Exclusive families hold exactly the
//! directory-declared set for every person processed; the cross-unit family is
//! only ever shrunk by the opt-in purge.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use roster_core::{CohortId, ScopeId, UnitKey, UserId};
use roster_store::StoreTx;

use crate::error::SyncError;
use crate::resolver::Coverage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CohortFamily {
    StudentClass,
    StudentLevel,
    TeacherClass,
    CrossUnit,
}

impl CohortFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            CohortFamily::StudentClass => "student-class",
            CohortFamily::StudentLevel => "student-level",
            CohortFamily::TeacherClass => "teacher-class",
            CohortFamily::CrossUnit => "cross-unit",
        }
    }

    pub fn is_exclusive(&self) -> bool {
        !matches!(self, CohortFamily::CrossUnit)
    }

    pub fn idnumber(&self, scope_key: &UnitKey, label: &str) -> String {
        format!("{}:{scope_key}:{label}", self.as_str())
    }

    fn idnumber_prefix(&self) -> String {
        format!("{}:", self.as_str())
    }
}

impl fmt::Display for CohortFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cohort a person should belong to this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredCohort {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CohortChange {
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug)]
struct Placement {
    scope: ScopeId,
    users: BTreeSet<UserId>,
}

/// Persons placed in each cohort during this run.
#[derive(Debug, Default)]
pub struct PurgeTracker {
    placed: BTreeMap<CohortId, Placement>,
}

impl PurgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, cohort: CohortId, scope: ScopeId, user: UserId) {
        let entry = self.placed.entry(cohort).or_insert_with(|| Placement {
            scope,
            users: BTreeSet::new(),
        });
        entry.users.insert(user);
    }

    pub fn touched(&self) -> usize {
        self.placed.len()
    }

    /// Remove every member of a touched cohort that was not placed in it
    /// this run. Cohorts of scopes not completely covered are left alone.
    pub fn apply(self, tx: &StoreTx<'_>, coverage: &Coverage) -> Result<usize, SyncError> {
        let mut removed = 0;
        for (cohort, placement) in self.placed {
            if !coverage.is_complete(placement.scope) {
                warn!(cohort = %cohort, scope = %placement.scope, "cohort purge skipped: scope only partly processed");
                continue;
            }
            let stale: Vec<UserId> = tx
                .members(cohort)?
                .into_iter()
                .filter(|u| !placement.users.contains(u))
                .collect();
            if stale.is_empty() {
                continue;
            }
            let n = tx.remove_members(cohort, &stale)?;
            info!(cohort = %cohort, removed = n, "cohort purged");
            removed += n;
        }
        Ok(removed)
    }
}

/// Look a cohort up by name within its scope, creating it if needed.
pub fn ensure_cohort(
    tx: &StoreTx<'_>,
    scope: ScopeId,
    name: &str,
    idnumber: &str,
) -> Result<CohortId, SyncError> {
    if let Some(id) = tx.find_cohort(scope, name)? {
        return Ok(id);
    }
    let id = tx.insert_cohort(scope, name, idnumber, "")?;
    info!(cohort = %id, name, idnumber, "cohort created");
    Ok(id)
}

/// Place `user` in every desired cohort of `family` and, for exclusive
/// families, withdraw them from the family's other cohorts in `scope`.
pub fn reconcile_person(
    tx: &StoreTx<'_>,
    user: UserId,
    scope: ScopeId,
    scope_key: &UnitKey,
    family: CohortFamily,
    desired: &[DesiredCohort],
    tracker: &mut PurgeTracker,
) -> Result<CohortChange, SyncError> {
    let mut change = CohortChange::default();
    let mut wanted = BTreeSet::new();
    for cohort in desired {
        let id = ensure_cohort(tx, scope, &cohort.name, &family.idnumber(scope_key, &cohort.label))?;
        if tx.add_member(id, user)? {
            change.added += 1;
        }
        tracker.record(id, scope, user);
        wanted.insert(id);
    }

    if family.is_exclusive() {
        for held in tx.memberships_in_family(user, scope, &family.idnumber_prefix())? {
            if wanted.contains(&held.id) {
                continue;
            }
            change.removed += tx.remove_members(held.id, &[user])?;
            debug!(user = %user, cohort = %held.name, family = %family, "withdrawn from cohort");
        }
    }
    Ok(change)
}

#[cfg(test)]
mod tests {
    use roster_core::Login;
    use roster_store::{PersonFields, Store};

    use super::*;

    fn person(tx: &StoreTx<'_>, login: &str) -> UserId {
        tx.insert_user(
            &Login::from(login),
            &PersonFields {
                given_name: String::new(),
                family_name: String::new(),
                email: String::new(),
                mail_display: 0,
                theme: None,
            },
        )
        .unwrap()
    }

    fn want(label: &str) -> DesiredCohort {
        DesiredCohort {
            name: format!("Class {label}"),
            label: label.to_string(),
        }
    }

    #[test]
    fn idnumber_layout() {
        assert_eq!(
            CohortFamily::StudentLevel.idnumber(&UnitKey::from("0290009C"), "TERMINALE"),
            "student-level:0290009C:TERMINALE"
        );
    }

    #[test]
    fn exclusive_family_moves_person() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let tx = store.transaction().unwrap();
        let s = person(&tx, "s");
        let key = UnitKey::from("U");
        let mut tracker = PurgeTracker::new();

        let first = reconcile_person(&tx, s, ScopeId(1), &key, CohortFamily::StudentClass, &[want("2A")], &mut tracker).unwrap();
        assert_eq!(first, CohortChange { added: 1, removed: 0 });

        let moved = reconcile_person(&tx, s, ScopeId(1), &key, CohortFamily::StudentClass, &[want("2B")], &mut tracker).unwrap();
        assert_eq!(moved, CohortChange { added: 1, removed: 1 });

        let old = tx.find_cohort(ScopeId(1), "Class 2A").unwrap().unwrap();
        let new = tx.find_cohort(ScopeId(1), "Class 2B").unwrap().unwrap();
        assert!(tx.members(old).unwrap().is_empty());
        assert_eq!(tx.members(new).unwrap(), vec![s]);
    }

    #[test]
    fn other_families_are_left_alone() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let tx = store.transaction().unwrap();
        let s = person(&tx, "s");
        let key = UnitKey::from("U");
        let mut tracker = PurgeTracker::new();

        reconcile_person(&tx, s, ScopeId(1), &key, CohortFamily::StudentLevel, &[want("TERM")], &mut tracker).unwrap();
        reconcile_person(&tx, s, ScopeId(1), &key, CohortFamily::StudentClass, &[], &mut tracker).unwrap();
        let level = tx.find_cohort(ScopeId(1), "Class TERM").unwrap().unwrap();
        assert_eq!(tx.members(level).unwrap(), vec![s]);
    }

    #[test]
    fn cross_unit_family_is_not_retracted() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let tx = store.transaction().unwrap();
        let s = person(&tx, "s");
        let key = UnitKey::from("INTER");
        let mut tracker = PurgeTracker::new();

        reconcile_person(&tx, s, ScopeId(1), &key, CohortFamily::CrossUnit, &[want("X")], &mut tracker).unwrap();
        let change = reconcile_person(&tx, s, ScopeId(1), &key, CohortFamily::CrossUnit, &[want("Y")], &mut tracker).unwrap();
        assert_eq!(change.removed, 0);
        let x = tx.find_cohort(ScopeId(1), "Class X").unwrap().unwrap();
        assert_eq!(tx.members(x).unwrap(), vec![s]);
    }

    #[test]
    fn purge_keeps_only_persons_placed_this_run() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let tx = store.transaction().unwrap();
        let (x, y, z) = (person(&tx, "x"), person(&tx, "y"), person(&tx, "z"));
        let level = tx.insert_cohort(ScopeId(1), "Level-Terminale", "student-level:U:T", "").unwrap();
        for u in [x, y, z] {
            tx.add_member(level, u).unwrap();
        }

        let mut tracker = PurgeTracker::new();
        tracker.record(level, ScopeId(1), x);
        tracker.record(level, ScopeId(1), y);
        assert_eq!(tracker.touched(), 1);
        let unit = UnitKey::from("U");
        let mut coverage = Coverage::new();
        coverage.observe(ScopeId(1), &unit, vec![unit.clone()], true);
        assert_eq!(tracker.apply(&tx, &coverage).unwrap(), 1);
        assert_eq!(tx.members(level).unwrap(), vec![x, y]);
    }

    #[test]
    fn purge_skips_scopes_with_unread_members() {
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let tx = store.transaction().unwrap();
        let (x, y) = (person(&tx, "x"), person(&tx, "y"));
        let level = tx.insert_cohort(ScopeId(1), "Level-Terminale", "student-level:GRP:T", "").unwrap();
        tx.add_member(level, x).unwrap();
        tx.add_member(level, y).unwrap();

        let mut tracker = PurgeTracker::new();
        tracker.record(level, ScopeId(1), x);
        let a = UnitKey::from("A");
        let mut coverage = Coverage::new();
        coverage.observe(ScopeId(1), &a, vec![a.clone(), UnitKey::from("B")], true);
        assert_eq!(tracker.apply(&tx, &coverage).unwrap(), 0);
        assert_eq!(tx.members(level).unwrap(), vec![x, y]);
    }
}
