//! Batch Orchestrator.
//!
//! One run walks `START → PER_UNIT_LOOP → FINAL_ADMIN_PURGE → COMMIT →
//! WATERMARK_WRITE`. Every store write of the run shares one transaction;
//! any error returned from here drops it uncommitted and leaves the
//! watermark file as it was.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use tracing::{info, warn};

use roster_core::config::{CrossUnitPass, MatchSource};
use roster_core::{
    Config, DirectoryTimestamp, FieldId, PersonKind, RoleKind, ScopeId, UnitKey, UserId,
};
use roster_directory::{Directory, DirectoryReader, PersonEntry, RejectedEntry, StructureEntry};
use roster_store::{ScopeFamily, Store, StoreTx};

use crate::cohorts::{self, CohortFamily, DesiredCohort, PurgeTracker};
use crate::error::SyncError;
use crate::naming::Naming;
use crate::report::{
    ChangeCounts, DataQualityWarning, PassReport, RunReport, UnitReport,
};
use crate::resolver::{self, Coverage, ResolvedUnit, UnitResolver, UnitScopes};
use crate::roles::{self, AdminCandidates, RoleIds};
use crate::upsert::{person_fields, resolve_or_create};
use crate::watermark;

/// Caller choices for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Ignore stored watermarks (they are still advanced).
    pub full: bool,
    /// Purge cohort members not seen this run. Forces a full scan.
    pub purge_cohorts: bool,
    /// Roll the transaction back and leave the watermarks alone.
    pub dry_run: bool,
    /// Restrict the run to these configured units; empty means all.
    pub units: Vec<UnitKey>,
}

impl RunOptions {
    pub fn full_scan(&self) -> bool {
        self.full || self.purge_cohorts
    }
}

/// Configured units to process, in configuration order.
pub fn select_units(config: &Config, requested: &[UnitKey]) -> Result<Vec<UnitKey>, SyncError> {
    if let Some(unknown) = requested.iter().find(|k| !config.units.contains(k)) {
        return Err(SyncError::UnknownUnit(unknown.clone()));
    }
    Ok(config
        .units
        .iter()
        .filter(|k| requested.is_empty() || requested.contains(k))
        .cloned()
        .collect())
}

/// Everything resolved once per run and shared by every unit.
struct RunContext<'a> {
    config: &'a Config,
    naming: &'a Naming,
    resolver: &'a UnitResolver,
    roles: RoleIds,
    class_field: FieldId,
    cross_unit_scopes: BTreeMap<UnitKey, ScopeId>,
}

impl<'a> RunContext<'a> {
    fn prepare(
        tx: &StoreTx<'_>,
        config: &'a Config,
        naming: &'a Naming,
        resolver: &'a UnitResolver,
    ) -> Result<Self, SyncError> {
        tx.system_scope()?.ok_or(SyncError::MissingSystemScope)?;
        let roles = RoleIds::lookup(tx, &config.roles)?;
        let class_field = tx.profile_field(&config.defaults.class_field)?.ok_or_else(|| {
            SyncError::MissingProfileField {
                shortname: config.defaults.class_field.clone(),
            }
        })?;

        // Cross-unit scopes come from the unit-creation path like any unit.
        let mut cross_unit_scopes = BTreeMap::new();
        for pass in &config.cross_unit {
            let unit = ResolvedUnit {
                key: pass.key.clone(),
                canonical_key: pass.key.clone(),
                display_name: pass.name.clone(),
                grouped: false,
            };
            let record = resolver::ensure_category(tx, &unit, "")?;
            cross_unit_scopes.insert(pass.key.clone(), record.scope);
        }

        Ok(Self {
            config,
            naming,
            resolver,
            roles,
            class_field,
            cross_unit_scopes,
        })
    }

    fn cross_unit_scope_set(&self) -> BTreeSet<ScopeId> {
        self.cross_unit_scopes.values().copied().collect()
    }
}

/// Run-wide accumulators, consumed after the unit loop.
#[derive(Default)]
struct RunState {
    admins: AdminCandidates,
    tracker: PurgeTracker,
    coverage: Coverage,
    advanced: Vec<UnitKey>,
}

/// The unit currently being processed.
struct UnitPass {
    key: UnitKey,
    resolved: ResolvedUnit,
    scopes: UnitScopes,
    structure: StructureEntry,
    limited: bool,
    admin_pattern: Regex,
}

impl UnitPass {
    fn scope(&self) -> ScopeId {
        self.scopes.category_scope()
    }
}

/// Reconcile every selected unit and cross-unit pass, stamped with the
/// current time.
pub fn run<D: Directory>(
    config: &Config,
    reader: &mut DirectoryReader<D>,
    store: &mut Store,
    options: &RunOptions,
) -> Result<RunReport, SyncError> {
    run_at(config, reader, store, options, DirectoryTimestamp::now())
}

/// [`run`] with an explicit run-start instant, which becomes the new
/// watermark of every unit processed.
pub fn run_at<D: Directory>(
    config: &Config,
    reader: &mut DirectoryReader<D>,
    store: &mut Store,
    options: &RunOptions,
    started: DirectoryTimestamp,
) -> Result<RunReport, SyncError> {
    // START
    let units = select_units(config, &options.units)?;
    let full = options.full_scan();
    if options.purge_cohorts && !options.full {
        warn!("cohort purge requested: ignoring watermarks for this run");
    }
    let mut report = RunReport::new(started, full, options.dry_run);

    let loaded = watermark::load_at(&config.watermarks.path, &config.watermarks.separator)?;
    for bad in loaded.malformed {
        report.warn(DataQualityWarning::MalformedWatermark {
            line: bad.line,
            content: bad.content,
        });
    }
    let mut watermarks = loaded.entries;

    let naming = Naming::new(&config.naming, &config.cross_unit)?;
    let resolver = UnitResolver::new(&config.unit_groups);

    let tx = store.transaction_at(started)?;
    let ctx = RunContext::prepare(&tx, config, &naming, &resolver)?;
    let mut state = RunState::default();
    info!(units = units.len(), full_scan = full, dry_run = options.dry_run, "run started");

    // PER_UNIT_LOOP
    for key in &units {
        let since = if full { None } else { watermarks.get(key).copied() };
        let unit_report = process_unit(&tx, reader, &ctx, &mut state, &mut report, key, since)?;
        report.units.push(unit_report);
    }
    for pass in &config.cross_unit {
        let since = if full { None } else { watermarks.get(&pass.key).copied() };
        let pass_report = process_cross_unit(&tx, reader, &ctx, &mut state, &mut report, pass, since)?;
        report.cross_unit.push(pass_report);
    }

    // FINAL_ADMIN_PURGE
    let RunState {
        admins,
        tracker,
        coverage,
        advanced,
    } = state;
    report.admin_grants_revoked =
        admins.purge(&tx, ctx.roles.get(RoleKind::LocalAdmin), &coverage)?;
    if options.purge_cohorts {
        info!(cohorts = tracker.touched(), "purging cohorts");
        report.memberships_purged = tracker.apply(&tx, &coverage)?;
    }

    // COMMIT
    if options.dry_run {
        tx.rollback()?;
        info!("dry run: transaction rolled back, watermarks unchanged");
        return Ok(report);
    }
    tx.commit()?;
    report.committed = true;

    // WATERMARK_WRITE
    for key in advanced {
        watermark::advance(&mut watermarks, key, started);
    }
    watermark::save_at(
        &config.watermarks.path,
        &config.watermarks.separator,
        &watermarks,
    )?;
    report.watermarks_written = true;

    let totals = report.totals();
    info!(
        seen = totals.seen,
        created = totals.created,
        updated = totals.updated,
        grants_added = totals.grants_added,
        grants_revoked = totals.grants_revoked + report.admin_grants_revoked,
        warnings = report.warnings.len(),
        "run committed"
    );
    Ok(report)
}

fn note_rejects(report: &mut RunReport, rejected: Vec<RejectedEntry>) {
    for entry in rejected {
        report.warn(DataQualityWarning::EntryMissingLogin {
            dn: entry.dn,
            reason: entry.reason,
        });
    }
}

fn process_unit<D: Directory>(
    tx: &StoreTx<'_>,
    reader: &mut DirectoryReader<D>,
    ctx: &RunContext<'_>,
    state: &mut RunState,
    report: &mut RunReport,
    key: &UnitKey,
    since: Option<DirectoryTimestamp>,
) -> Result<UnitReport, SyncError> {
    let mut out = UnitReport::new(key.clone(), since);

    let Some(structure) = reader.structure(key)? else {
        report.warn(DataQualityWarning::UnitNotInDirectory { unit: key.clone() });
        out.skipped = true;
        return Ok(out);
    };
    let resolved = ctx.resolver.resolve(&structure, ctx.naming)?;
    let scopes = resolver::ensure_unit(tx, &resolved, ctx.naming)?;
    out.canonical_key = Some(resolved.canonical_key.clone());

    let unit = UnitPass {
        key: key.clone(),
        limited: ctx
            .config
            .profiles
            .limited_structure_types
            .contains(&structure.structure_type),
        admin_pattern: Regex::new(&ctx.config.profiles.local_admin_pattern(key))?,
        resolved,
        scopes,
        structure,
    };

    let students = reader.students(key, since)?;
    note_rejects(report, students.rejected);
    for person in &students.entries {
        process_student(tx, ctx, state, report, &unit, person, &mut out.students)?;
    }

    let staff = reader.staff(key, since)?;
    note_rejects(report, staff.rejected);
    state.admins.observe_pass(unit.scope());
    state
        .coverage
        .observe(unit.scope(), key, ctx.resolver.members(key), since.is_none());
    for person in &staff.entries {
        process_staff(tx, ctx, state, report, &unit, person, &mut out.staff)?;
    }

    state.advanced.push(key.clone());
    info!(
        unit = %unit.key,
        canonical = %unit.resolved.canonical_key,
        incremental = since.is_some(),
        students = out.students.seen,
        staff = out.staff.seen,
        "unit reconciled"
    );
    Ok(out)
}

/// Category and private-zone scopes of every affiliation known locally.
fn affiliated_scopes(
    tx: &StoreTx<'_>,
    ctx: &RunContext<'_>,
    report: &mut RunReport,
    person: &PersonEntry,
) -> Result<(BTreeSet<ScopeId>, BTreeSet<ScopeId>), SyncError> {
    let mut categories = BTreeSet::new();
    let mut zones = BTreeSet::new();
    for affiliation in &person.affiliations {
        let canonical = ctx.resolver.canonical(affiliation);
        match resolver::known_scopes(tx, &canonical, ctx.naming)? {
            Some((category, zone)) => {
                categories.insert(category);
                zones.extend(zone);
            }
            None => report.warn(DataQualityWarning::UnknownAffiliation {
                login: person.login.clone(),
                unit: affiliation.clone(),
            }),
        }
    }
    Ok((categories, zones))
}

fn desired(
    naming: &Naming,
    family: CohortFamily,
    labels: &[String],
) -> Result<Vec<DesiredCohort>, SyncError> {
    labels
        .iter()
        .map(|label| {
            Ok(DesiredCohort {
                name: naming.cohort_name(family, label)?,
                label: label.clone(),
            })
        })
        .collect()
}

fn upsert_person(
    tx: &StoreTx<'_>,
    ctx: &RunContext<'_>,
    person: &PersonEntry,
    counts: &mut ChangeCounts,
) -> Result<UserId, SyncError> {
    let fields = person_fields(
        person,
        ctx.naming,
        ctx.resolver,
        ctx.config.defaults.mail_display,
    )?;
    let (user, outcome) = resolve_or_create(tx, person, &fields)?;
    counts.person(outcome);
    Ok(user)
}

fn process_student(
    tx: &StoreTx<'_>,
    ctx: &RunContext<'_>,
    state: &mut RunState,
    report: &mut RunReport,
    unit: &UnitPass,
    person: &PersonEntry,
    counts: &mut ChangeCounts,
) -> Result<(), SyncError> {
    let user = upsert_person(tx, ctx, person, counts)?;
    let scope = unit.scope();

    let classes = person.class_labels_for(unit.structure.registration_number.as_deref());
    tx.set_profile_value(user, ctx.class_field, &classes.join(", "))?;

    // Other affiliated units decide their own limited grant when processed.
    let (mut keep, _) = affiliated_scopes(tx, ctx, report, person)?;
    keep.remove(&scope);
    keep.extend(ctx.cross_unit_scope_set());
    let grant = if unit.limited {
        BTreeSet::from([scope])
    } else {
        BTreeSet::new()
    };
    counts.roles(roles::reconcile_family(
        tx,
        ctx.roles.get(RoleKind::LimitedUser),
        user,
        ScopeFamily::UnitCategories,
        &grant,
        &keep,
    )?);

    let canonical = &unit.resolved.canonical_key;
    let class_cohorts = desired(ctx.naming, CohortFamily::StudentClass, &classes)?;
    counts.cohorts(cohorts::reconcile_person(
        tx,
        user,
        scope,
        canonical,
        CohortFamily::StudentClass,
        &class_cohorts,
        &mut state.tracker,
    )?);
    let levels: Vec<String> = person.level.iter().cloned().collect();
    let level_cohorts = desired(ctx.naming, CohortFamily::StudentLevel, &levels)?;
    counts.cohorts(cohorts::reconcile_person(
        tx,
        user,
        scope,
        canonical,
        CohortFamily::StudentLevel,
        &level_cohorts,
        &mut state.tracker,
    )?);
    Ok(())
}

fn process_staff(
    tx: &StoreTx<'_>,
    ctx: &RunContext<'_>,
    state: &mut RunState,
    report: &mut RunReport,
    unit: &UnitPass,
    person: &PersonEntry,
    counts: &mut ChangeCounts,
) -> Result<(), SyncError> {
    let user = upsert_person(tx, ctx, person, counts)?;
    let scope = unit.scope();
    let teacher = person.kind == PersonKind::Teacher;

    let (categories, zones) = if teacher {
        affiliated_scopes(tx, ctx, report, person)?
    } else {
        (BTreeSet::new(), BTreeSet::new())
    };
    counts.roles(roles::reconcile_family(
        tx,
        ctx.roles.get(RoleKind::CourseCreator),
        user,
        ScopeFamily::UnitCategories,
        &categories,
        &ctx.cross_unit_scope_set(),
    )?);
    counts.roles(roles::reconcile_family(
        tx,
        ctx.roles.get(RoleKind::TeacherExtension),
        user,
        ScopeFamily::PrivateZones {
            shortname_prefix: ctx.naming.private_zone_prefix(),
        },
        &zones,
        &zones,
    )?);

    let director = person.has_profile(&ctx.config.profiles.director);
    counts.roles(roles::set_in_scope(
        tx,
        ctx.roles.get(RoleKind::Director),
        scope,
        user,
        director,
    )?);

    let admin = person.groups.iter().any(|g| unit.admin_pattern.is_match(g));
    state.admins.record(scope, user, admin);
    if admin {
        counts.roles(roles::set_in_scope(
            tx,
            ctx.roles.get(RoleKind::LocalAdmin),
            scope,
            user,
            true,
        )?);
    }

    let classes = if teacher {
        person.class_labels_for(unit.structure.registration_number.as_deref())
    } else {
        Vec::new()
    };
    let class_cohorts = desired(ctx.naming, CohortFamily::TeacherClass, &classes)?;
    counts.cohorts(cohorts::reconcile_person(
        tx,
        user,
        scope,
        &unit.resolved.canonical_key,
        CohortFamily::TeacherClass,
        &class_cohorts,
        &mut state.tracker,
    )?);
    Ok(())
}

/// Declared labels matched by the person, with the directory value that
/// matched each.
fn matched_labels<'p>(pass: &'p CrossUnitPass, person: &'p PersonEntry) -> Vec<(&'p str, &'p str)> {
    let candidates = match pass.match_on {
        MatchSource::Groups => &person.groups,
        MatchSource::Profiles => &person.profiles,
    };
    pass.labels
        .iter()
        .filter_map(|label| {
            candidates
                .iter()
                .find(|value| label.matches(value))
                .map(|value| (label.label.as_str(), value.as_str()))
        })
        .collect()
}

fn process_cross_unit<D: Directory>(
    tx: &StoreTx<'_>,
    reader: &mut DirectoryReader<D>,
    ctx: &RunContext<'_>,
    state: &mut RunState,
    report: &mut RunReport,
    pass: &CrossUnitPass,
    since: Option<DirectoryTimestamp>,
) -> Result<PassReport, SyncError> {
    let mut out = PassReport {
        key: pass.key.clone(),
        since,
        persons: ChangeCounts::default(),
    };
    let scope = ctx
        .cross_unit_scopes
        .get(&pass.key)
        .copied()
        .ok_or_else(|| SyncError::UnknownUnit(pass.key.clone()))?;
    let role = ctx.roles.get(pass.role);

    let batch = reader.cross_unit(pass, since)?;
    note_rejects(report, batch.rejected);
    for person in &batch.entries {
        let user = upsert_person(tx, ctx, person, &mut out.persons)?;
        out.persons
            .roles(roles::set_in_scope(tx, role, scope, user, true)?);

        let wanted = matched_labels(pass, person)
            .into_iter()
            .map(|(label, value)| {
                Ok(DesiredCohort {
                    name: ctx.naming.cross_unit_cohort_name(pass, label, value)?,
                    label: label.to_string(),
                })
            })
            .collect::<Result<Vec<_>, SyncError>>()?;
        out.persons.cohorts(cohorts::reconcile_person(
            tx,
            user,
            scope,
            &pass.key,
            CohortFamily::CrossUnit,
            &wanted,
            &mut state.tracker,
        )?);
    }

    state
        .coverage
        .observe(scope, &pass.key, vec![pass.key.clone()], since.is_none());
    state.advanced.push(pass.key.clone());
    info!(pass = %pass.key, incremental = since.is_some(), persons = out.persons.seen, "cross-unit pass reconciled");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(units: &[&str]) -> Config {
        let mut config: Config = serde_yaml::from_str(
            "store: { path: /tmp/roster.db }\n\
             directory: { url: 'ldap://localhost', people_base: 'ou=people', structures_base: 'ou=structures' }\n\
             watermarks: { path: /tmp/watermarks.txt }\n\
             units: []\n",
        )
        .unwrap();
        config.units = units.iter().map(|u| UnitKey::from(*u)).collect();
        config
    }

    #[test]
    fn selection_keeps_configuration_order() {
        let config = config(&["A", "B", "C"]);
        let picked = select_units(&config, &[UnitKey::from("C"), UnitKey::from("A")]).unwrap();
        assert_eq!(picked, vec![UnitKey::from("A"), UnitKey::from("C")]);
        assert_eq!(select_units(&config, &[]).unwrap().len(), 3);
    }

    #[test]
    fn selecting_unknown_unit_fails() {
        let config = config(&["A"]);
        assert!(matches!(
            select_units(&config, &[UnitKey::from("Z")]),
            Err(SyncError::UnknownUnit(k)) if k == UnitKey::from("Z")
        ));
    }

    #[test]
    fn purge_forces_full_scan() {
        let options = RunOptions {
            purge_cohorts: true,
            ..RunOptions::default()
        };
        assert!(options.full_scan());
        assert!(!RunOptions::default().full_scan());
    }
}
