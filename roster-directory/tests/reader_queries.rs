//! Typed reader queries answered by the in-memory directory.

use roster_core::config::DirectoryConfig;
use roster_core::{Login, PersonKind, StructureType, UnitKey};
use roster_directory::entry::attr;
use roster_directory::{DirectoryReader, MemoryDirectory, RawEntry};

fn config() -> DirectoryConfig {
    DirectoryConfig {
        url: "ldap://unused".to_string(),
        bind_dn: None,
        bind_password: None,
        bind_password_env: None,
        people_base: "ou=people,dc=example,dc=org".to_string(),
        structures_base: "ou=structures,dc=example,dc=org".to_string(),
        timeout_secs: 5,
        page_size: 100,
        schema: Default::default(),
    }
}

fn person(login: &str, class: &str, unit: &str, modified: &str) -> RawEntry {
    RawEntry::new(format!("uid={login},ou=people,dc=example,dc=org"))
        .with(attr::OBJECT_CLASS, ["ENTPerson", class])
        .with(attr::LOGIN, [login])
        .with(attr::AFFILIATIONS, [unit])
        .with(attr::MODIFIED, [modified])
}

fn directory() -> MemoryDirectory {
    let mut dir = MemoryDirectory::new();
    dir.upsert(
        RawEntry::new("ENTStructureSIREN=19290009000012,ou=structures,dc=example,dc=org")
            .with(attr::OBJECT_CLASS, ["ENTEtablissement"])
            .with(attr::STRUCTURE_KEY, ["0290009C"])
            .with(attr::STRUCTURE_NAME, ["LYC-PRO JEAN MOULIN"])
            .with(attr::STRUCTURE_REGISTRATION, ["19290009000012"])
            .with(attr::POSTAL_CODE, ["29000"])
            .with(attr::STRUCTURE_TYPE, ["LYCEE PROFESSIONNEL"]),
    );
    dir.upsert(person("s2", "ENTEleve", "0290009C", "20240110000000Z"));
    dir.upsert(person("s1", "ENTEleve", "0290009C", "20230110000000Z"));
    dir.upsert(person("s3", "ENTEleve", "0290010D", "20240110000000Z"));
    dir.upsert(person("t1", "ENTAuxEnseignant", "0290009C", "20240110000000Z"));
    dir.upsert(person("a1", "ENTAuxNonEnsEtab", "0290009C", "20240110000000Z"));
    dir.upsert(
        RawEntry::new("cn=broken,ou=people,dc=example,dc=org")
            .with(attr::OBJECT_CLASS, ["ENTEleve"])
            .with(attr::AFFILIATIONS, ["0290009C"]),
    );
    dir
}

#[test]
fn structure_lookup() {
    let mut reader = DirectoryReader::new(directory(), &config());
    let s = reader
        .structure(&UnitKey::from("0290009C"))
        .unwrap()
        .expect("known unit");
    assert_eq!(s.name, "LYC-PRO JEAN MOULIN");
    assert_eq!(s.registration_number.as_deref(), Some("19290009000012"));
    assert_eq!(s.structure_type, StructureType::Standard);

    assert!(reader.structure(&UnitKey::from("9999999Z")).unwrap().is_none());
}

#[test]
fn students_full_scan_is_sorted_and_reports_rejects() {
    let mut reader = DirectoryReader::new(directory(), &config());
    let batch = reader.students(&UnitKey::from("0290009C"), None).unwrap();
    let logins: Vec<&Login> = batch.entries.iter().map(|e| &e.login).collect();
    assert_eq!(logins, vec![&Login::from("s1"), &Login::from("s2")]);
    assert_eq!(batch.rejected.len(), 1);
    assert_eq!(batch.rejected[0].dn, "cn=broken,ou=people,dc=example,dc=org");
}

#[test]
fn students_incremental_only_returns_changed() {
    let mut reader = DirectoryReader::new(directory(), &config());
    let since = "20240101000000Z".parse().unwrap();
    let batch = reader
        .students(&UnitKey::from("0290009C"), Some(since))
        .unwrap();
    assert_eq!(batch.entries.len(), 1);
    assert_eq!(batch.entries[0].login, Login::from("s2"));
    // The rejected entry has no timestamp and is filtered out.
    assert!(batch.rejected.is_empty());
}

#[test]
fn staff_includes_teachers_and_non_teaching() {
    let mut reader = DirectoryReader::new(directory(), &config());
    let batch = reader.staff(&UnitKey::from("0290009C"), None).unwrap();
    let kinds: Vec<PersonKind> = batch.entries.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![PersonKind::Staff, PersonKind::Teacher]);
}
