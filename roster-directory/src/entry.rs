//! Directory entries: the raw attribute form and the typed records the
//! engine works with.
//!
//! Attribute presence is resolved here, once, at the reader boundary. The
//! engine only ever sees [`StructureEntry`] and [`PersonEntry`] with named
//! optional fields.

use std::collections::BTreeMap;

use roster_core::config::DirectorySchema;
use roster_core::{DirectoryTimestamp, Login, PersonKind, StructureType, UnitKey};

/// Attribute names read from the directory.
pub mod attr {
    pub const OBJECT_CLASS: &str = "objectClass";
    pub const MODIFIED: &str = "modifyTimestamp";

    pub const STRUCTURE_KEY: &str = "ENTStructureUAI";
    pub const STRUCTURE_NAME: &str = "ENTStructureNomCourant";
    pub const STRUCTURE_REGISTRATION: &str = "ENTStructureSIREN";
    pub const STRUCTURE_TYPE: &str = "ENTStructureTypeStruct";
    pub const POSTAL_CODE: &str = "postalCode";

    pub const LOGIN: &str = "uid";
    pub const GIVEN_NAME: &str = "givenName";
    pub const FAMILY_NAME: &str = "sn";
    pub const MAIL: &str = "mail";
    pub const AFFILIATIONS: &str = "ESCOUAI";
    pub const CURRENT_UNIT: &str = "ESCOUAICourant";
    pub const STUDENT_CLASSES: &str = "ENTEleveClasses";
    pub const STUDENT_LEVEL: &str = "ENTEleveNivFormation";
    pub const TEACHER_CLASSES: &str = "ENTAuxEnsClasses";
    pub const GROUPS: &str = "isMemberOf";
    pub const PROFILES: &str = "ENTPersonProfils";
}

pub const STRUCTURE_ATTRS: &[&str] = &[
    attr::STRUCTURE_KEY,
    attr::STRUCTURE_NAME,
    attr::STRUCTURE_REGISTRATION,
    attr::STRUCTURE_TYPE,
    attr::POSTAL_CODE,
];

pub const PERSON_ATTRS: &[&str] = &[
    attr::OBJECT_CLASS,
    attr::MODIFIED,
    attr::LOGIN,
    attr::GIVEN_NAME,
    attr::FAMILY_NAME,
    attr::MAIL,
    attr::AFFILIATIONS,
    attr::CURRENT_UNIT,
    attr::STUDENT_CLASSES,
    attr::STUDENT_LEVEL,
    attr::TEACHER_CLASSES,
    attr::GROUPS,
    attr::PROFILES,
];

// ---------------------------------------------------------------------------
// Raw entry
// ---------------------------------------------------------------------------

/// A directory entry as returned by a search: DN plus multi-valued attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<String>>,
}

impl RawEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// Builder used by tests and the in-memory directory.
    pub fn with<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.attrs
            .entry(name.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// All values of `name` (case-insensitive attribute lookup).
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    /// First non-blank value of `name`, trimmed.
    pub fn first(&self, name: &str) -> Option<String> {
        self.values(name)
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .map(str::to_owned)
    }

    fn non_blank(&self, name: &str) -> Vec<String> {
        self.values(name)
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

impl From<ldap3::SearchEntry> for RawEntry {
    fn from(entry: ldap3::SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs.into_iter().collect(),
        }
    }
}

/// An entry the reader could not turn into a typed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntry {
    pub dn: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Structure entry
// ---------------------------------------------------------------------------

/// A unit (establishment) as described by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructureEntry {
    pub key: UnitKey,
    pub name: String,
    pub registration_number: Option<String>,
    pub postal_code: Option<String>,
    pub structure_type: StructureType,
}

impl StructureEntry {
    pub fn from_raw(raw: &RawEntry) -> Result<Self, RejectedEntry> {
        let key = raw.first(attr::STRUCTURE_KEY).ok_or_else(|| RejectedEntry {
            dn: raw.dn.clone(),
            reason: format!("missing {}", attr::STRUCTURE_KEY),
        })?;
        Ok(Self {
            name: raw.first(attr::STRUCTURE_NAME).unwrap_or_else(|| key.clone()),
            key: UnitKey::from(key),
            registration_number: raw.first(attr::STRUCTURE_REGISTRATION),
            postal_code: raw.first(attr::POSTAL_CODE),
            structure_type: raw
                .first(attr::STRUCTURE_TYPE)
                .map(|t| StructureType::from_directory(&t))
                .unwrap_or_default(),
        })
    }

    /// Leading two characters of the postal code (département), or empty.
    pub fn postal_prefix(&self) -> &str {
        match &self.postal_code {
            Some(code) => code.get(..2).unwrap_or(code.as_str()),
            None => "",
        }
    }
}

// ---------------------------------------------------------------------------
// Person entry
// ---------------------------------------------------------------------------

/// A class reference: `<structure dn>$<label>` in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRef {
    /// Value of the first RDN of the structure DN (its registration number).
    pub structure: Option<String>,
    pub label: String,
}

impl ClassRef {
    pub fn parse(raw: &str) -> Option<Self> {
        let (structure, label) = match raw.rsplit_once('$') {
            Some((dn, label)) => {
                let first_rdn = dn.split(',').next().unwrap_or_default();
                let value = first_rdn
                    .split_once('=')
                    .map(|(_, v)| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                (value, label)
            }
            None => (None, raw),
        };
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        Some(Self {
            structure,
            label: label.to_string(),
        })
    }
}

/// A person as described by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonEntry {
    pub dn: String,
    pub login: Login,
    pub kind: PersonKind,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
    pub affiliations: Vec<UnitKey>,
    pub current_unit: Option<UnitKey>,
    pub classes: Vec<ClassRef>,
    pub level: Option<String>,
    pub groups: Vec<String>,
    pub profiles: Vec<String>,
    pub modified: Option<DirectoryTimestamp>,
}

impl PersonEntry {
    pub fn from_raw(raw: &RawEntry, schema: &DirectorySchema) -> Result<Self, RejectedEntry> {
        let login = raw.first(attr::LOGIN).ok_or_else(|| RejectedEntry {
            dn: raw.dn.clone(),
            reason: format!("missing {}", attr::LOGIN),
        })?;
        let kind = classify(raw, schema);
        let class_attr = match kind {
            PersonKind::Student => attr::STUDENT_CLASSES,
            _ => attr::TEACHER_CLASSES,
        };

        Ok(Self {
            dn: raw.dn.clone(),
            login: Login::from(login),
            kind,
            given_name: raw.first(attr::GIVEN_NAME),
            family_name: raw.first(attr::FAMILY_NAME),
            email: raw.first(attr::MAIL),
            affiliations: dedup(raw.non_blank(attr::AFFILIATIONS))
                .into_iter()
                .map(UnitKey::from)
                .collect(),
            current_unit: raw.first(attr::CURRENT_UNIT).map(UnitKey::from),
            classes: raw
                .non_blank(class_attr)
                .iter()
                .filter_map(|v| ClassRef::parse(v))
                .collect(),
            level: raw.first(attr::STUDENT_LEVEL),
            groups: raw.non_blank(attr::GROUPS),
            profiles: raw.non_blank(attr::PROFILES),
            modified: raw.first(attr::MODIFIED).and_then(|v| v.parse().ok()),
        })
    }

    /// Class labels that belong to the unit with `registration_number`.
    ///
    /// References without a structure part are kept for every unit.
    pub fn class_labels_for(&self, registration_number: Option<&str>) -> Vec<String> {
        let mut labels: Vec<String> = self
            .classes
            .iter()
            .filter(|c| match (&c.structure, registration_number) {
                (Some(structure), Some(reg)) => structure.eq_ignore_ascii_case(reg),
                _ => true,
            })
            .map(|c| c.label.clone())
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }

    pub fn has_profile(&self, profile: &str) -> bool {
        self.profiles.iter().any(|p| p.eq_ignore_ascii_case(profile))
    }
}

fn classify(raw: &RawEntry, schema: &DirectorySchema) -> PersonKind {
    let classes = raw.values(attr::OBJECT_CLASS);
    let has_any = |wanted: &[String]| {
        classes
            .iter()
            .any(|c| wanted.iter().any(|w| w.eq_ignore_ascii_case(c)))
    };
    if has_any(&schema.student_classes) {
        PersonKind::Student
    } else if has_any(&schema.teacher_classes) {
        PersonKind::Teacher
    } else if has_any(&schema.staff_classes) {
        PersonKind::Staff
    } else {
        PersonKind::Other
    }
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for v in values {
        if !out.iter().any(|o| o.eq_ignore_ascii_case(&v)) {
            out.push(v);
        }
    }
    out
}
