//! The directory capability and the typed queries built on top of it.
//!
//! Every person query combines a selection clause with an optional
//! `modifyTimestamp>=<watermark>` clause; without a watermark the clause is
//! omitted and the query is a full scan.

use tracing::{debug, warn};

use roster_core::config::{CrossUnitPass, DirectoryConfig, DirectorySchema, MatchSource};
use roster_core::{DirectoryTimestamp, UnitKey};

use crate::entry::{attr, PersonEntry, RawEntry, RejectedEntry, StructureEntry, PERSON_ATTRS, STRUCTURE_ATTRS};
use crate::error::DirectoryError;
use crate::filter::Filter;

/// Search-by-filter capability. Result sets are returned whole.
pub trait Directory {
    fn search(
        &mut self,
        base: &str,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Vec<RawEntry>, DirectoryError>;
}

impl<D: Directory + ?Sized> Directory for &mut D {
    fn search(
        &mut self,
        base: &str,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Vec<RawEntry>, DirectoryError> {
        (**self).search(base, filter, attrs)
    }
}

/// Typed person entries plus the entries that could not be typed.
#[derive(Debug, Default)]
pub struct PersonBatch {
    pub entries: Vec<PersonEntry>,
    pub rejected: Vec<RejectedEntry>,
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

fn since_clause(since: Option<DirectoryTimestamp>) -> Option<Filter> {
    since.map(|ts| Filter::ge(attr::MODIFIED, ts.to_string()))
}

fn any_object_class(classes: &[String]) -> Filter {
    Filter::or(
        classes
            .iter()
            .map(|c| Filter::eq(attr::OBJECT_CLASS, c.clone()))
            .collect(),
    )
}

fn with_since(mut clauses: Vec<Filter>, since: Option<DirectoryTimestamp>) -> Filter {
    clauses.extend(since_clause(since));
    Filter::and(clauses)
}

pub fn structure_filter(schema: &DirectorySchema, key: &UnitKey) -> Filter {
    Filter::and(vec![
        Filter::eq(attr::OBJECT_CLASS, schema.structure_class.clone()),
        Filter::eq(attr::STRUCTURE_KEY, key.as_str()),
    ])
}

pub fn students_filter(
    schema: &DirectorySchema,
    key: &UnitKey,
    since: Option<DirectoryTimestamp>,
) -> Filter {
    with_since(
        vec![
            any_object_class(&schema.student_classes),
            Filter::eq(attr::AFFILIATIONS, key.as_str()),
        ],
        since,
    )
}

pub fn staff_filter(
    schema: &DirectorySchema,
    key: &UnitKey,
    since: Option<DirectoryTimestamp>,
) -> Filter {
    let classes: Vec<String> = schema
        .teacher_classes
        .iter()
        .chain(&schema.staff_classes)
        .cloned()
        .collect();
    with_since(
        vec![
            any_object_class(&classes),
            Filter::eq(attr::AFFILIATIONS, key.as_str()),
        ],
        since,
    )
}

pub fn cross_unit_filter(
    schema: &DirectorySchema,
    pass: &CrossUnitPass,
    since: Option<DirectoryTimestamp>,
) -> Filter {
    let attribute = match pass.match_on {
        MatchSource::Groups => attr::GROUPS,
        MatchSource::Profiles => attr::PROFILES,
    };
    let labels = pass
        .labels
        .iter()
        .map(|label| match label.value.strip_suffix('*') {
            Some(prefix) => Filter::starts_with(attribute, prefix),
            None => Filter::eq(attribute, label.value.clone()),
        })
        .collect();
    with_since(
        vec![
            Filter::eq(attr::OBJECT_CLASS, schema.person_class.clone()),
            Filter::or(labels),
        ],
        since,
    )
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Typed queries against a [`Directory`].
pub struct DirectoryReader<D> {
    directory: D,
    people_base: String,
    structures_base: String,
    schema: DirectorySchema,
}

impl<D: Directory> DirectoryReader<D> {
    pub fn new(directory: D, config: &DirectoryConfig) -> Self {
        Self {
            directory,
            people_base: config.people_base.clone(),
            structures_base: config.structures_base.clone(),
            schema: config.schema.clone(),
        }
    }

    pub fn into_inner(self) -> D {
        self.directory
    }

    /// The unit's structure entry, if the directory knows it.
    pub fn structure(&mut self, key: &UnitKey) -> Result<Option<StructureEntry>, DirectoryError> {
        let filter = structure_filter(&self.schema, key);
        let raw = self
            .directory
            .search(&self.structures_base, &filter, STRUCTURE_ATTRS)?;
        if raw.len() > 1 {
            warn!(unit = %key, count = raw.len(), "several structure entries; using the first");
        }
        Ok(raw
            .first()
            .and_then(|entry| match StructureEntry::from_raw(entry) {
                Ok(s) => Some(s),
                Err(rejected) => {
                    warn!(dn = %rejected.dn, reason = %rejected.reason, "unusable structure entry");
                    None
                }
            }))
    }

    pub fn students(
        &mut self,
        key: &UnitKey,
        since: Option<DirectoryTimestamp>,
    ) -> Result<PersonBatch, DirectoryError> {
        let filter = students_filter(&self.schema, key, since);
        self.people(&filter)
    }

    /// Teachers and non-teaching staff affiliated with the unit.
    pub fn staff(
        &mut self,
        key: &UnitKey,
        since: Option<DirectoryTimestamp>,
    ) -> Result<PersonBatch, DirectoryError> {
        let filter = staff_filter(&self.schema, key, since);
        self.people(&filter)
    }

    pub fn cross_unit(
        &mut self,
        pass: &CrossUnitPass,
        since: Option<DirectoryTimestamp>,
    ) -> Result<PersonBatch, DirectoryError> {
        let filter = cross_unit_filter(&self.schema, pass, since);
        self.people(&filter)
    }

    fn people(&mut self, filter: &Filter) -> Result<PersonBatch, DirectoryError> {
        let raw = self.directory.search(&self.people_base, filter, PERSON_ATTRS)?;
        let mut batch = PersonBatch::default();
        for entry in &raw {
            match PersonEntry::from_raw(entry, &self.schema) {
                Ok(person) => batch.entries.push(person),
                Err(rejected) => batch.rejected.push(rejected),
            }
        }
        // Deterministic processing order regardless of server ordering.
        batch.entries.sort_by(|a, b| a.login.cmp(&b.login));
        debug!(
            filter = %filter,
            found = batch.entries.len(),
            rejected = batch.rejected.len(),
            "directory people query"
        );
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::config::CrossUnitLabel;
    use roster_core::RoleKind;

    fn ts(s: &str) -> DirectoryTimestamp {
        s.parse().unwrap()
    }

    #[test]
    fn structure_query() {
        let f = structure_filter(&DirectorySchema::default(), &UnitKey::from("0290009C"));
        assert_eq!(
            f.to_ldap(),
            "(&(objectClass=ENTEtablissement)(ENTStructureUAI=0290009C))"
        );
    }

    #[test]
    fn students_without_watermark_is_full_scan() {
        let f = students_filter(&DirectorySchema::default(), &UnitKey::from("0290009C"), None);
        assert_eq!(f.to_ldap(), "(&(objectClass=ENTEleve)(ESCOUAI=0290009C))");
    }

    #[test]
    fn students_with_watermark_adds_modified_since() {
        let f = students_filter(
            &DirectorySchema::default(),
            &UnitKey::from("0290009C"),
            Some(ts("20240101000000Z")),
        );
        assert_eq!(
            f.to_ldap(),
            "(&(objectClass=ENTEleve)(ESCOUAI=0290009C)(modifyTimestamp>=20240101000000Z))"
        );
    }

    #[test]
    fn staff_query_covers_teachers_and_staff() {
        let f = staff_filter(&DirectorySchema::default(), &UnitKey::from("0290009C"), None);
        assert_eq!(
            f.to_ldap(),
            "(&(|(objectClass=ENTAuxEnseignant)(objectClass=ENTAuxNonEnsEtab)(objectClass=ENTAuxNonEnsCollLoc))(ESCOUAI=0290009C))"
        );
    }

    #[test]
    fn cross_unit_query_mixes_exact_and_prefix_labels() {
        let pass = CrossUnitPass {
            key: UnitKey::from("INTER_ETAB"),
            name: "Inter".to_string(),
            role: RoleKind::DirectoryGrant,
            match_on: MatchSource::Groups,
            labels: vec![
                CrossUnitLabel {
                    value: "cfa:Moodle:inter-etab:*".to_string(),
                    label: "A".to_string(),
                },
                CrossUnitLabel {
                    value: "esco:Formateurs".to_string(),
                    label: "B".to_string(),
                },
            ],
            cohort_name: "{{ label }}".to_string(),
        };
        let f = cross_unit_filter(&DirectorySchema::default(), &pass, Some(ts("20240101000000Z")));
        assert_eq!(
            f.to_ldap(),
            "(&(objectClass=ENTPerson)(|(isMemberOf=cfa:Moodle:inter-etab:*)(isMemberOf=esco:Formateurs))(modifyTimestamp>=20240101000000Z))"
        );
    }
}
