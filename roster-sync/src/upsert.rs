//! Entity Upsert: directory person entry → local person id.

use serde::Serialize;
use tracing::{debug, info};

use roster_core::UserId;
use roster_directory::PersonEntry;
use roster_store::{PersonFields, StoreTx};

use crate::error::SyncError;
use crate::naming::Naming;
use crate::resolver::UnitResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Store values derived from a directory entry.
///
/// Email falls back to the configured template; visibility is the configured
/// value only when the directory provides an email. The theme follows the
/// canonical key of the person's current unit.
pub fn person_fields(
    person: &PersonEntry,
    naming: &Naming,
    resolver: &UnitResolver,
    mail_display: i64,
) -> Result<PersonFields, SyncError> {
    let (email, mail_display) = match person.email.as_deref().map(str::trim) {
        Some(email) if !email.is_empty() => (email.to_string(), mail_display),
        _ => (naming.default_email(&person.login)?, 0),
    };
    Ok(PersonFields {
        given_name: person.given_name.clone().unwrap_or_default(),
        family_name: person.family_name.clone().unwrap_or_default(),
        email,
        mail_display,
        theme: person
            .current_unit
            .as_ref()
            .map(|unit| resolver.canonical(unit).to_string()),
    })
}

/// Look the person up by login; insert if absent, otherwise overwrite the
/// directory-owned attributes when they differ.
pub fn resolve_or_create(
    tx: &StoreTx<'_>,
    person: &PersonEntry,
    fields: &PersonFields,
) -> Result<(UserId, UpsertOutcome), SyncError> {
    match tx.find_user(&person.login)? {
        None => {
            let id = tx.insert_user(&person.login, fields)?;
            info!(
                login = %person.login,
                id = %id,
                given_name = %fields.given_name,
                family_name = %fields.family_name,
                "person created"
            );
            Ok((id, UpsertOutcome::Created))
        }
        Some(existing) if existing.differs_from(fields) => {
            tx.update_user(existing.id, fields)?;
            info!(login = %person.login, id = %existing.id, "person updated");
            Ok((existing.id, UpsertOutcome::Updated))
        }
        Some(existing) => {
            debug!(login = %person.login, id = %existing.id, "person unchanged");
            Ok((existing.id, UpsertOutcome::Unchanged))
        }
    }
}

#[cfg(test)]
mod tests {
    use roster_core::config::{NamingConfig, UnitGroup};
    use roster_core::{Login, PersonKind, UnitKey};
    use roster_store::Store;

    use super::*;

    fn entry(email: Option<&str>) -> PersonEntry {
        PersonEntry {
            dn: "uid=s1,ou=people,dc=example,dc=org".to_string(),
            login: Login::from("s1"),
            kind: PersonKind::Student,
            given_name: Some("Ada".to_string()),
            family_name: Some("Lovelace".to_string()),
            email: email.map(str::to_string),
            affiliations: vec![UnitKey::from("B")],
            current_unit: Some(UnitKey::from("B")),
            classes: vec![],
            level: None,
            groups: vec![],
            profiles: vec![],
            modified: None,
        }
    }

    fn resolver() -> UnitResolver {
        UnitResolver::new(&[UnitGroup {
            canonical_key: UnitKey::from("GRP"),
            name: "Group".to_string(),
            members: vec![UnitKey::from("A"), UnitKey::from("B")],
        }])
    }

    #[test]
    fn missing_email_gets_default_and_is_hidden() {
        let naming = Naming::new(&NamingConfig::default(), &[]).unwrap();
        let f = person_fields(&entry(None), &naming, &resolver(), 2).unwrap();
        assert_eq!(f.email, "s1@noreply.invalid");
        assert_eq!(f.mail_display, 0);

        let f = person_fields(&entry(Some("ada@example.org")), &naming, &resolver(), 2).unwrap();
        assert_eq!(f.email, "ada@example.org");
        assert_eq!(f.mail_display, 2);
    }

    #[test]
    fn theme_uses_canonical_key() {
        let naming = Naming::new(&NamingConfig::default(), &[]).unwrap();
        let f = person_fields(&entry(None), &naming, &resolver(), 2).unwrap();
        assert_eq!(f.theme.as_deref(), Some("GRP"));
    }

    #[test]
    fn created_then_unchanged_then_updated() {
        let naming = Naming::new(&NamingConfig::default(), &[]).unwrap();
        let mut store = Store::open_in_memory("mdl_").unwrap();
        let tx = store.transaction().unwrap();

        let person = entry(Some("ada@example.org"));
        let fields = person_fields(&person, &naming, &resolver(), 2).unwrap();
        let (id, outcome) = resolve_or_create(&tx, &person, &fields).unwrap();
        assert_eq!(outcome, UpsertOutcome::Created);

        let (again, outcome) = resolve_or_create(&tx, &person, &fields).unwrap();
        assert_eq!((again, outcome), (id, UpsertOutcome::Unchanged));

        let moved = entry(Some("ada@school.example.org"));
        let fields = person_fields(&moved, &naming, &resolver(), 2).unwrap();
        let (again, outcome) = resolve_or_create(&tx, &moved, &fields).unwrap();
        assert_eq!((again, outcome), (id, UpsertOutcome::Updated));
        assert_eq!(
            tx.find_user(&Login::from("s1")).unwrap().unwrap().email,
            "ada@school.example.org"
        );
    }
}
