//! Names of things the engine creates, rendered from configured templates.

use serde::Serialize;
use tera::{Context, Tera};

use roster_core::config::{CrossUnitPass, NamingConfig};
use roster_core::Login;
use roster_directory::StructureEntry;

use crate::cohorts::CohortFamily;
use crate::error::SyncError;

const UNIT_NAME: &str = "unit_name";
const PRIVATE_ZONE_NAME: &str = "private_zone_name";
const STUDENT_CLASS: &str = "student_class_cohort";
const STUDENT_LEVEL: &str = "student_level_cohort";
const TEACHER_CLASS: &str = "teacher_class_cohort";
const DEFAULT_EMAIL: &str = "default_email";

#[derive(Serialize)]
struct UnitVars<'a> {
    name: &'a str,
    key: &'a str,
    postal_prefix: &'a str,
    registration_number: &'a str,
}

pub struct Naming {
    tera: Tera,
    private_zone_prefix: String,
}

impl Naming {
    pub fn new(config: &NamingConfig, passes: &[CrossUnitPass]) -> Result<Self, SyncError> {
        let mut templates = vec![
            (UNIT_NAME.to_string(), config.unit_name.clone()),
            (PRIVATE_ZONE_NAME.to_string(), config.private_zone_name.clone()),
            (STUDENT_CLASS.to_string(), config.student_class_cohort.clone()),
            (STUDENT_LEVEL.to_string(), config.student_level_cohort.clone()),
            (TEACHER_CLASS.to_string(), config.teacher_class_cohort.clone()),
            (DEFAULT_EMAIL.to_string(), config.default_email.clone()),
        ];
        for pass in passes {
            templates.push((cross_unit_template(pass), pass.cohort_name.clone()));
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(templates).map_err(|source| SyncError::Template {
            name: "naming".to_string(),
            source,
        })?;
        Ok(Self {
            tera,
            private_zone_prefix: config.private_zone_prefix.clone(),
        })
    }

    pub fn private_zone_prefix(&self) -> &str {
        &self.private_zone_prefix
    }

    pub fn private_zone_shortname(&self, canonical_key: &str) -> String {
        format!("{}{canonical_key}", self.private_zone_prefix)
    }

    pub fn unit_name(&self, structure: &StructureEntry) -> Result<String, SyncError> {
        self.render(UNIT_NAME, &unit_context(structure)?)
    }

    pub fn private_zone_name(&self, display_name: &str, canonical_key: &str) -> Result<String, SyncError> {
        let mut ctx = Context::new();
        ctx.insert("name", display_name);
        ctx.insert("key", canonical_key);
        self.render(PRIVATE_ZONE_NAME, &ctx)
    }

    pub fn cohort_name(&self, family: CohortFamily, label: &str) -> Result<String, SyncError> {
        let template = match family {
            CohortFamily::StudentClass => STUDENT_CLASS,
            CohortFamily::StudentLevel => STUDENT_LEVEL,
            CohortFamily::TeacherClass => TEACHER_CLASS,
            CohortFamily::CrossUnit => return Ok(label.to_string()),
        };
        let mut ctx = Context::new();
        ctx.insert("label", label);
        self.render(template, &ctx)
    }

    pub fn cross_unit_cohort_name(
        &self,
        pass: &CrossUnitPass,
        label: &str,
        value: &str,
    ) -> Result<String, SyncError> {
        let mut ctx = Context::new();
        ctx.insert("label", label);
        ctx.insert("value", value);
        self.render(&cross_unit_template(pass), &ctx)
    }

    pub fn default_email(&self, login: &Login) -> Result<String, SyncError> {
        let mut ctx = Context::new();
        ctx.insert("login", login.as_str());
        self.render(DEFAULT_EMAIL, &ctx)
    }

    fn render(&self, name: &str, ctx: &Context) -> Result<String, SyncError> {
        self.tera
            .render(name, ctx)
            .map(|s| s.trim().to_string())
            .map_err(|source| SyncError::Template {
                name: name.to_string(),
                source,
            })
    }
}

fn cross_unit_template(pass: &CrossUnitPass) -> String {
    format!("cross_unit:{}", pass.key)
}

fn unit_context(structure: &StructureEntry) -> Result<Context, SyncError> {
    let vars = UnitVars {
        name: &structure.name,
        key: structure.key.as_str(),
        postal_prefix: structure.postal_prefix(),
        registration_number: structure.registration_number.as_deref().unwrap_or(""),
    };
    Context::from_serialize(vars).map_err(|source| SyncError::Template {
        name: UNIT_NAME.to_string(),
        source,
    })
}
