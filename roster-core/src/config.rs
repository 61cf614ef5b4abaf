//! YAML run configuration.
//!
//! # Location
//!
//! ```text
//! ~/.roster/config.yaml      (default, overridable with --config / ROSTER_CONFIG)
//! ```
//!
//! # API pattern
//!
//! - `load_at(path)`: explicit path; used in tests with `TempDir`
//! - `default_path_at(home)`: pure path helper
//! - `default_path()`: derives home from `dirs::home_dir()`
//!
//! Every loaded configuration has been through [`Config::validate`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{RoleKind, StructureType, UnitKey};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub directory: DirectoryConfig,
    pub watermarks: WatermarkConfig,
    /// Units to process, in processing order.
    pub units: Vec<UnitKey>,
    #[serde(default)]
    pub unit_groups: Vec<UnitGroup>,
    #[serde(default)]
    pub roles: RoleConfig,
    #[serde(default)]
    pub profiles: ProfileConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub cross_unit: Vec<CrossUnitPass>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Per-deployment table name prefix. Only `[A-Za-z0-9_]`.
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub url: String,
    #[serde(default)]
    pub bind_dn: Option<String>,
    #[serde(default, skip_serializing)]
    pub bind_password: Option<String>,
    /// Name of an environment variable holding the bind password.
    #[serde(default)]
    pub bind_password_env: Option<String>,
    pub people_base: String,
    pub structures_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Entries requested per page of a paged search.
    #[serde(default = "default_page_size")]
    pub page_size: i32,
    #[serde(default)]
    pub schema: DirectorySchema,
}

impl DirectoryConfig {
    /// Bind password from the inline value or the named environment variable.
    pub fn resolve_password(&self) -> Option<String> {
        if let Some(pw) = &self.bind_password {
            return Some(pw.clone());
        }
        self.bind_password_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

/// Object class names used to select and classify directory entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySchema {
    #[serde(default = "default_structure_class")]
    pub structure_class: String,
    #[serde(default = "default_person_class")]
    pub person_class: String,
    #[serde(default = "default_student_classes")]
    pub student_classes: Vec<String>,
    #[serde(default = "default_teacher_classes")]
    pub teacher_classes: Vec<String>,
    #[serde(default = "default_staff_classes")]
    pub staff_classes: Vec<String>,
}

impl Default for DirectorySchema {
    fn default() -> Self {
        Self {
            structure_class: default_structure_class(),
            person_class: default_person_class(),
            student_classes: default_student_classes(),
            teacher_classes: default_teacher_classes(),
            staff_classes: default_staff_classes(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkConfig {
    pub path: PathBuf,
    #[serde(default = "default_separator")]
    pub separator: String,
}

/// Several directory units treated as one logical unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitGroup {
    pub canonical_key: UnitKey,
    pub name: String,
    pub members: Vec<UnitKey>,
}

/// Store role shortnames for each managed role kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub course_creator: String,
    pub limited_user: String,
    pub teacher_extension: String,
    pub director: String,
    pub local_admin: String,
    pub directory_grant: String,
}

impl RoleConfig {
    pub fn shortname(&self, kind: RoleKind) -> &str {
        match kind {
            RoleKind::CourseCreator => &self.course_creator,
            RoleKind::LimitedUser => &self.limited_user,
            RoleKind::TeacherExtension => &self.teacher_extension,
            RoleKind::Director => &self.director,
            RoleKind::LocalAdmin => &self.local_admin,
            RoleKind::DirectoryGrant => &self.directory_grant,
        }
    }
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            course_creator: "coursecreator".to_string(),
            limited_user: "userlimited".to_string(),
            teacher_extension: "extendedteacher".to_string(),
            director: "director".to_string(),
            local_admin: "localadmin".to_string(),
            directory_grant: "crossunit".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Directory profile value that marks a unit director.
    pub director: String,
    /// Regular expression matched against group memberships; `{key}` is
    /// replaced by the (escaped) unit key being processed.
    pub local_admin_group: String,
    /// Structure types whose students hold the limited-user role.
    pub limited_structure_types: Vec<StructureType>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            director: "National_DIR".to_string(),
            local_admin_group: r"^esco:admin:local:.*_{key}$".to_string(),
            limited_structure_types: vec![StructureType::VocationalCenter],
        }
    }
}

impl ProfileConfig {
    /// Admin pattern with the unit key substituted.
    pub fn local_admin_pattern(&self, key: &UnitKey) -> String {
        self.local_admin_group
            .replace("{key}", &regex::escape(key.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Mail visibility stored when the directory provides an email.
    pub mail_display: i64,
    /// Shortname of the extensible attribute receiving class labels.
    pub class_field: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            mail_display: 2,
            class_field: "classe".to_string(),
        }
    }
}

/// Tera templates used to name things created in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    /// Context: `name`, `key`, `postal_prefix`, `registration_number`.
    pub unit_name: String,
    /// Short-name prefix identifying private-discussion zones.
    pub private_zone_prefix: String,
    /// Context: same as `unit_name`.
    pub private_zone_name: String,
    /// Context: `label`.
    pub student_class_cohort: String,
    pub student_level_cohort: String,
    pub teacher_class_cohort: String,
    /// Context: `login`.
    pub default_email: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            unit_name: "{{ name }} ({{ postal_prefix }})".to_string(),
            private_zone_prefix: "ZONE-PRIVEE-".to_string(),
            private_zone_name: "Zone privée - {{ name }}".to_string(),
            student_class_cohort: "Élèves de la classe {{ label }}".to_string(),
            student_level_cohort: "Élèves du niveau de formation {{ label }}".to_string(),
            teacher_class_cohort: "Profs de la classe {{ label }}".to_string(),
            default_email: "{{ login }}@noreply.invalid".to_string(),
        }
    }
}

/// Which multi-valued directory attribute a cross-unit pass matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    #[default]
    Groups,
    Profiles,
}

/// A declared directory value and the cohort label it maps to.
///
/// A `value` ending with `*` matches by prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossUnitLabel {
    pub value: String,
    pub label: String,
}

impl CrossUnitLabel {
    pub fn is_prefix(&self) -> bool {
        self.value.ends_with('*')
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self.value.strip_suffix('*') {
            Some(prefix) => candidate
                .to_lowercase()
                .starts_with(&prefix.to_lowercase()),
            None => candidate.eq_ignore_ascii_case(&self.value),
        }
    }
}

/// A pass over persons that are not tied to one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossUnitPass {
    /// Watermark key and category id number of the cross-unit scope.
    pub key: UnitKey,
    /// Display name of the cross-unit scope.
    pub name: String,
    #[serde(default = "default_cross_unit_role")]
    pub role: RoleKind,
    #[serde(default, rename = "match")]
    pub match_on: MatchSource,
    pub labels: Vec<CrossUnitLabel>,
    /// Context: `label`, `value` (the matched directory value).
    #[serde(default = "default_cross_unit_cohort_name")]
    pub cohort_name: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_table_prefix() -> String {
    "mdl_".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_size() -> i32 {
    500
}
fn default_separator() -> String {
    "-".to_string()
}
fn default_structure_class() -> String {
    "ENTEtablissement".to_string()
}
fn default_person_class() -> String {
    "ENTPerson".to_string()
}
fn default_student_classes() -> Vec<String> {
    vec!["ENTEleve".to_string()]
}
fn default_teacher_classes() -> Vec<String> {
    vec!["ENTAuxEnseignant".to_string()]
}
fn default_staff_classes() -> Vec<String> {
    vec![
        "ENTAuxNonEnsEtab".to_string(),
        "ENTAuxNonEnsCollLoc".to_string(),
    ]
}
fn default_cross_unit_role() -> RoleKind {
    RoleKind::DirectoryGrant
}
fn default_cross_unit_cohort_name() -> String {
    "{{ label }}".to_string()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Reject configurations the engine cannot run safely.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_prefix(&self.store.table_prefix) {
            return Err(ConfigError::Invalid(format!(
                "table_prefix '{}' may only contain ASCII letters, digits and '_'",
                self.store.table_prefix
            )));
        }

        if self.directory.page_size <= 0 {
            return Err(ConfigError::Invalid(format!(
                "directory page_size must be positive, got {}",
                self.directory.page_size
            )));
        }

        let sep = &self.watermarks.separator;
        if sep.is_empty() || sep.chars().any(|c| c.is_ascii_digit() || c == 'Z' || c == '\n') {
            return Err(ConfigError::Invalid(format!(
                "watermark separator '{sep}' must be non-empty and contain no digit, 'Z' or newline"
            )));
        }

        let mut seen = BTreeSet::new();
        for key in &self.units {
            if !seen.insert(key) {
                return Err(ConfigError::Invalid(format!("unit '{key}' listed twice")));
            }
        }

        let mut grouped = BTreeSet::new();
        for group in &self.unit_groups {
            if group.members.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "unit group '{}' has no members",
                    group.canonical_key
                )));
            }
            for member in &group.members {
                if !grouped.insert(member) {
                    return Err(ConfigError::Invalid(format!(
                        "unit '{member}' belongs to more than one group"
                    )));
                }
            }
        }

        let sample = self.profiles.local_admin_pattern(&UnitKey::from("0000000A"));
        Regex::new(&sample).map_err(|e| {
            ConfigError::Invalid(format!(
                "local_admin_group '{}' is not a valid pattern: {e}",
                self.profiles.local_admin_group
            ))
        })?;

        let mut pass_keys = BTreeSet::new();
        for pass in &self.cross_unit {
            if !pass_keys.insert(&pass.key) || seen.contains(&pass.key) {
                return Err(ConfigError::Invalid(format!(
                    "cross-unit pass key '{}' collides with another unit or pass",
                    pass.key
                )));
            }
            if pass.labels.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "cross-unit pass '{}' declares no labels",
                    pass.key
                )));
            }
        }

        Ok(())
    }
}

fn is_valid_prefix(prefix: &str) -> bool {
    prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// `<home>/.roster/config.yaml`: pure, no I/O.
pub fn default_path_at(home: &Path) -> PathBuf {
    home.join(".roster").join("config.yaml")
}

/// `default_path_at` convenience wrapper.
pub fn default_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    Ok(default_path_at(&home))
}

/// Load and validate the configuration at `path`.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse`
/// (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
store:
  path: /tmp/roster.db
directory:
  url: ldap://localhost:389
  people_base: ou=people,dc=example,dc=org
  structures_base: ou=structures,dc=example,dc=org
watermarks:
  path: /tmp/watermarks.txt
units: ["0290009C", "0290010D"]
"#;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("parse")
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse(MINIMAL);
        cfg.validate().expect("valid");
        assert_eq!(cfg.store.table_prefix, "mdl_");
        assert_eq!(cfg.watermarks.separator, "-");
        assert_eq!(cfg.directory.timeout_secs, 30);
        assert_eq!(cfg.directory.page_size, 500);
        assert_eq!(cfg.roles.shortname(RoleKind::Director), "director");
        assert_eq!(cfg.defaults.class_field, "classe");
        assert_eq!(
            cfg.profiles.limited_structure_types,
            vec![StructureType::VocationalCenter]
        );
        assert!(cfg.cross_unit.is_empty());
    }

    #[test]
    fn admin_pattern_escapes_key() {
        let profiles = ProfileConfig {
            local_admin_group: "^admin:{key}$".to_string(),
            ..ProfileConfig::default()
        };
        assert_eq!(
            profiles.local_admin_pattern(&UnitKey::from("A.B")),
            r"^admin:A\.B$"
        );
    }

    #[rstest]
    #[case("mdl_", true)]
    #[case("", true)]
    #[case("moodle2_", true)]
    #[case("mdl;drop", false)]
    #[case("mdl-", false)]
    fn table_prefix_validation(#[case] prefix: &str, #[case] ok: bool) {
        let mut cfg = parse(MINIMAL);
        cfg.store.table_prefix = prefix.to_string();
        assert_eq!(cfg.validate().is_ok(), ok);
    }

    #[rstest]
    #[case("-", true)]
    #[case(";", true)]
    #[case("", false)]
    #[case("1", false)]
    #[case("Z", false)]
    fn separator_validation(#[case] sep: &str, #[case] ok: bool) {
        let mut cfg = parse(MINIMAL);
        cfg.watermarks.separator = sep.to_string();
        assert_eq!(cfg.validate().is_ok(), ok);
    }

    #[test]
    fn duplicate_unit_is_rejected() {
        let mut cfg = parse(MINIMAL);
        cfg.units.push(UnitKey::from("0290009C"));
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn unit_in_two_groups_is_rejected() {
        let mut cfg = parse(MINIMAL);
        let group = |key: &str| UnitGroup {
            canonical_key: UnitKey::from(key),
            name: key.to_string(),
            members: vec![UnitKey::from("0290009C")],
        };
        cfg.unit_groups = vec![group("G1"), group("G2")];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_positive_page_size_is_rejected() {
        let mut cfg = parse(MINIMAL);
        cfg.directory.page_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_admin_pattern_is_rejected() {
        let mut cfg = parse(MINIMAL);
        cfg.profiles.local_admin_group = "([unclosed".to_string();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn cross_unit_key_may_not_shadow_unit() {
        let mut cfg = parse(MINIMAL);
        cfg.cross_unit.push(CrossUnitPass {
            key: UnitKey::from("0290009C"),
            name: "x".to_string(),
            role: RoleKind::DirectoryGrant,
            match_on: MatchSource::Groups,
            labels: vec![CrossUnitLabel {
                value: "g".to_string(),
                label: "G".to_string(),
            }],
            cohort_name: "{{ label }}".to_string(),
        });
        assert!(cfg.validate().is_err());
    }

    #[rstest]
    #[case("cfa:Applications:Moodle:*", "cfa:applications:moodle:inter-etab", true)]
    #[case("cfa:Applications:Moodle:*", "cfa:Applications:Other", false)]
    #[case("National_3", "national_3", true)]
    #[case("National_3", "National_30", false)]
    fn cross_unit_label_matching(#[case] value: &str, #[case] candidate: &str, #[case] hit: bool) {
        let label = CrossUnitLabel {
            value: value.to_string(),
            label: "L".to_string(),
        };
        assert_eq!(label.matches(candidate), hit);
    }

    #[test]
    fn load_missing_returns_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = load_at(&tmp.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn load_malformed_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "store: [unterminated").unwrap();
        let err = load_at(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn default_path_is_under_dot_roster() {
        let tmp = TempDir::new().unwrap();
        assert!(default_path_at(tmp.path()).ends_with(".roster/config.yaml"));
    }

    #[test]
    fn password_env_fallback() {
        let mut cfg = parse(MINIMAL);
        cfg.directory.bind_password_env = Some("ROSTER_TEST_UNSET_PASSWORD_VAR".to_string());
        assert_eq!(cfg.directory.resolve_password(), None);
        cfg.directory.bind_password = Some("inline".to_string());
        assert_eq!(cfg.directory.resolve_password().as_deref(), Some("inline"));
    }
}
