//! Role Reconciler.
//!
//! Grants inside a family are diffed, not blindly re-inserted: everything the
//! person holds in the family outside the kept set is revoked in one bulk
//! deletion, and every wanted scope is granted insert-if-absent.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use roster_core::config::RoleConfig;
use roster_core::{GrantId, RoleId, RoleKind, ScopeId, UserId};
use roster_store::{ScopeFamily, StoreTx};

use crate::error::SyncError;
use crate::resolver::Coverage;

/// Store ids of every configured role kind, resolved once per run.
#[derive(Debug, Clone)]
pub struct RoleIds {
    ids: BTreeMap<RoleKind, RoleId>,
}

impl RoleIds {
    pub fn lookup(tx: &StoreTx<'_>, config: &RoleConfig) -> Result<Self, SyncError> {
        let mut ids = BTreeMap::new();
        for &kind in RoleKind::all() {
            let shortname = config.shortname(kind);
            let id = tx.role_id(shortname)?.ok_or_else(|| SyncError::MissingRole {
                kind,
                shortname: shortname.to_string(),
            })?;
            ids.insert(kind, id);
        }
        Ok(Self { ids })
    }

    pub fn get(&self, kind: RoleKind) -> RoleId {
        // Populated for every kind by `lookup`.
        self.ids[&kind]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleChange {
    pub granted: usize,
    pub revoked: usize,
}

/// Reconcile one role family for one person.
///
/// `grant` scopes are granted; held grants whose scope is in neither `grant`
/// nor `keep` are revoked. Passing two empty sets retracts the whole family.
pub fn reconcile_family(
    tx: &StoreTx<'_>,
    role: RoleId,
    user: UserId,
    family: ScopeFamily<'_>,
    grant: &BTreeSet<ScopeId>,
    keep: &BTreeSet<ScopeId>,
) -> Result<RoleChange, SyncError> {
    let held = tx.grants_in_family(role, user, family)?;
    let stale: Vec<GrantId> = held
        .iter()
        .filter(|g| !grant.contains(&g.scope) && !keep.contains(&g.scope))
        .map(|g| g.id)
        .collect();

    let mut change = RoleChange {
        revoked: tx.revoke(&stale)?,
        granted: 0,
    };
    for &scope in grant {
        if tx.grant(role, scope, user)? {
            change.granted += 1;
        }
    }
    if change != RoleChange::default() {
        debug!(user = %user, role = %role, granted = change.granted, revoked = change.revoked, "role family reconciled");
    }
    Ok(change)
}

/// Grant or revoke one role in exactly one scope.
pub fn set_in_scope(
    tx: &StoreTx<'_>,
    role: RoleId,
    scope: ScopeId,
    user: UserId,
    wanted: bool,
) -> Result<RoleChange, SyncError> {
    if wanted {
        let granted = usize::from(tx.grant(role, scope, user)?);
        return Ok(RoleChange { granted, revoked: 0 });
    }
    let stale: Vec<GrantId> = tx
        .holders(role, scope)?
        .into_iter()
        .filter(|g| g.user == user)
        .map(|g| g.id)
        .collect();
    Ok(RoleChange {
        granted: 0,
        revoked: tx.revoke(&stale)?,
    })
}

#[derive(Debug, Clone, Default)]
struct AdminScope {
    qualified: BTreeSet<UserId>,
    seen: BTreeSet<UserId>,
}

/// Local-admin eligibility accumulated over the unit loop.
///
/// Eligibility is only known once every staff entry feeding a scope has been
/// seen, so revocations wait for [`AdminCandidates::purge`].
#[derive(Debug, Default)]
pub struct AdminCandidates {
    scopes: BTreeMap<ScopeId, AdminScope>,
}

impl AdminCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a staff pass feeding `scope`, even one that saw nobody.
    pub fn observe_pass(&mut self, scope: ScopeId) {
        self.scopes.entry(scope).or_default();
    }

    pub fn record(&mut self, scope: ScopeId, user: UserId, qualifies: bool) {
        let entry = self.scopes.entry(scope).or_default();
        entry.seen.insert(user);
        if qualifies {
            entry.qualified.insert(user);
        }
    }

    /// Revoke local-admin grants that no longer qualify.
    ///
    /// Complete scopes lose every holder outside the qualified set; other
    /// scopes lose only seen persons that did not qualify.
    pub fn purge(
        self,
        tx: &StoreTx<'_>,
        role: RoleId,
        coverage: &Coverage,
    ) -> Result<usize, SyncError> {
        let mut revoked = 0;
        for (scope, acc) in self.scopes {
            let complete = coverage.is_complete(scope);
            let stale: Vec<GrantId> = tx
                .holders(role, scope)?
                .into_iter()
                .filter(|g| !acc.qualified.contains(&g.user))
                .filter(|g| complete || acc.seen.contains(&g.user))
                .map(|g| g.id)
                .collect();
            if stale.is_empty() {
                continue;
            }
            let n = tx.revoke(&stale)?;
            info!(scope = %scope, revoked = n, complete, "local admin grants revoked");
            revoked += n;
        }
        Ok(revoked)
    }
}
