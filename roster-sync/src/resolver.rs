//! Unit Resolver: maps directory unit keys onto canonical units and makes
//! sure each canonical unit has its category scope and private zone.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use roster_core::config::UnitGroup;
use roster_core::{ScopeId, UnitKey};
use roster_directory::StructureEntry;
use roster_store::{NewUnit, StoreTx, UnitRecord};

use crate::error::SyncError;
use crate::naming::Naming;

/// A unit key after group resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUnit {
    pub key: UnitKey,
    pub canonical_key: UnitKey,
    pub display_name: String,
    pub grouped: bool,
}

/// The local scopes of a canonical unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitScopes {
    pub unit: UnitRecord,
    pub private_scope: ScopeId,
}

impl UnitScopes {
    pub fn category_scope(&self) -> ScopeId {
        self.unit.scope
    }
}

#[derive(Debug, Clone)]
struct GroupTarget {
    canonical_key: UnitKey,
    name: String,
    members: Vec<UnitKey>,
}

#[derive(Debug, Clone, Default)]
pub struct UnitResolver {
    groups: HashMap<UnitKey, GroupTarget>,
}

impl UnitResolver {
    pub fn new(groups: &[UnitGroup]) -> Self {
        let mut map = HashMap::new();
        for group in groups {
            for member in &group.members {
                map.insert(
                    member.clone(),
                    GroupTarget {
                        canonical_key: group.canonical_key.clone(),
                        name: group.name.clone(),
                        members: group.members.clone(),
                    },
                );
            }
        }
        Self { groups: map }
    }

    pub fn canonical(&self, key: &UnitKey) -> UnitKey {
        self.groups
            .get(key)
            .map(|g| g.canonical_key.clone())
            .unwrap_or_else(|| key.clone())
    }

    /// Every unit key feeding the same canonical scope as `key`.
    pub fn members(&self, key: &UnitKey) -> Vec<UnitKey> {
        self.groups
            .get(key)
            .map(|g| g.members.clone())
            .unwrap_or_else(|| vec![key.clone()])
    }

    pub fn resolve(
        &self,
        structure: &StructureEntry,
        naming: &Naming,
    ) -> Result<ResolvedUnit, SyncError> {
        let key = structure.key.clone();
        Ok(match self.groups.get(&key) {
            Some(group) => ResolvedUnit {
                canonical_key: group.canonical_key.clone(),
                display_name: group.name.clone(),
                grouped: true,
                key,
            },
            None => ResolvedUnit {
                canonical_key: key.clone(),
                display_name: naming.unit_name(structure)?,
                grouped: false,
                key,
            },
        })
    }
}

/// Which member units of each canonical scope were read in full this run.
///
/// Purges that infer absence from "not seen" are only sound for a complete
/// scope: every member unit of its group had a full pass.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    scopes: BTreeMap<ScopeId, ScopeCoverage>,
}

#[derive(Debug, Clone, Default)]
struct ScopeCoverage {
    members: BTreeSet<UnitKey>,
    full: BTreeSet<UnitKey>,
}

impl Coverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pass of `key` over `scope`, whose group is `members`.
    pub fn observe(&mut self, scope: ScopeId, key: &UnitKey, members: Vec<UnitKey>, full_scan: bool) {
        let entry = self.scopes.entry(scope).or_default();
        entry.members.extend(members);
        entry.members.insert(key.clone());
        if full_scan {
            entry.full.insert(key.clone());
        }
    }

    pub fn is_complete(&self, scope: ScopeId) -> bool {
        self.scopes
            .get(&scope)
            .is_some_and(|s| s.members.is_subset(&s.full))
    }
}

/// Description marker recording that a member key feeds a grouped unit.
pub fn member_marker(key: &UnitKey) -> String {
    format!("[member:{key}]")
}

/// Find or create the unit category. Grouped units gain a member marker the
/// first time each member is seen; markers are never removed.
pub fn ensure_category(
    tx: &StoreTx<'_>,
    unit: &ResolvedUnit,
    theme: &str,
) -> Result<UnitRecord, SyncError> {
    let marker = unit.grouped.then(|| member_marker(&unit.key));

    let Some(existing) = tx.find_unit(&unit.canonical_key)? else {
        let description = marker.unwrap_or_default();
        let record = tx.insert_unit(&NewUnit {
            key: &unit.canonical_key,
            name: &unit.display_name,
            description: &description,
            theme,
        })?;
        info!(unit = %unit.key, canonical = %unit.canonical_key, "unit created");
        return Ok(record);
    };

    let description = match &marker {
        Some(m) if !existing.description.contains(m.as_str()) => {
            if existing.description.is_empty() {
                m.clone()
            } else {
                format!("{} {m}", existing.description)
            }
        }
        _ => existing.description.clone(),
    };
    if description == existing.description && unit.display_name == existing.name {
        debug!(unit = %unit.key, "unit unchanged");
        return Ok(existing);
    }

    tx.update_unit(existing.category, &unit.display_name, &description)?;
    info!(unit = %unit.key, canonical = %unit.canonical_key, "unit updated");
    Ok(UnitRecord {
        name: unit.display_name.clone(),
        description,
        ..existing
    })
}

/// Find or create the unit's category and its private zone.
pub fn ensure_unit(
    tx: &StoreTx<'_>,
    unit: &ResolvedUnit,
    naming: &Naming,
) -> Result<UnitScopes, SyncError> {
    let record = ensure_category(tx, unit, unit.canonical_key.as_str())?;
    let shortname = naming.private_zone_shortname(unit.canonical_key.as_str());
    let private_scope = match tx.find_private_zone(&shortname)? {
        Some(scope) => scope,
        None => {
            let fullname =
                naming.private_zone_name(&unit.display_name, unit.canonical_key.as_str())?;
            tx.insert_private_zone(&record, &shortname, &fullname)?
        }
    };
    Ok(UnitScopes {
        unit: record,
        private_scope,
    })
}

/// Category and private-zone scopes of a unit already known locally.
pub fn known_scopes(
    tx: &StoreTx<'_>,
    canonical_key: &UnitKey,
    naming: &Naming,
) -> Result<Option<(ScopeId, Option<ScopeId>)>, SyncError> {
    let Some(unit) = tx.find_unit(canonical_key)? else {
        return Ok(None);
    };
    let zone = tx.find_private_zone(&naming.private_zone_shortname(canonical_key.as_str()))?;
    Ok(Some((unit.scope, zone)))
}
