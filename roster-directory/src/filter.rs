//! Typed search filters.
//!
//! A [`Filter`] renders to RFC 4515 text for the LDAP directory and can also
//! be evaluated against a [`RawEntry`] by the in-memory directory, so both
//! implementations answer the same query the same way.

use std::fmt;

use crate::entry::RawEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equals { attribute: String, value: String },
    StartsWith { attribute: String, value: String },
    GreaterOrEqual { attribute: String, value: String },
    Present { attribute: String },
}

impl Filter {
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn starts_with(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::StartsWith {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn ge(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::GreaterOrEqual {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// `(&...)`, collapsing a single clause to itself.
    pub fn and(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        Filter::And(filters)
    }

    /// `(|...)`, collapsing a single clause to itself.
    pub fn or(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            return filters.remove(0);
        }
        Filter::Or(filters)
    }

    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Render as an LDAP filter string.
    pub fn to_ldap(&self) -> String {
        match self {
            Filter::And(filters) => {
                let inner: Vec<String> = filters.iter().map(Filter::to_ldap).collect();
                format!("(&{})", inner.join(""))
            }
            Filter::Or(filters) => {
                let inner: Vec<String> = filters.iter().map(Filter::to_ldap).collect();
                format!("(|{})", inner.join(""))
            }
            Filter::Not(filter) => format!("(!{})", filter.to_ldap()),
            Filter::Equals { attribute, value } => {
                format!("({}={})", attribute, escape_value(value))
            }
            Filter::StartsWith { attribute, value } => {
                format!("({}={}*)", attribute, escape_value(value))
            }
            Filter::GreaterOrEqual { attribute, value } => {
                format!("({}>={})", attribute, escape_value(value))
            }
            Filter::Present { attribute } => format!("({attribute}=*)"),
        }
    }

    /// Evaluate against an entry. Attribute names and values compare
    /// case-insensitively, ordering compares the raw strings.
    pub fn matches(&self, entry: &RawEntry) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Filter::Not(filter) => !filter.matches(entry),
            Filter::Equals { attribute, value } => entry
                .values(attribute)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value)),
            Filter::StartsWith { attribute, value } => {
                let prefix = value.to_lowercase();
                entry
                    .values(attribute)
                    .iter()
                    .any(|v| v.to_lowercase().starts_with(&prefix))
            }
            Filter::GreaterOrEqual { attribute, value } => entry
                .values(attribute)
                .iter()
                .any(|v| v.as_str() >= value.as_str()),
            Filter::Present { attribute } => !entry.values(attribute).is_empty(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ldap())
    }
}

/// Escape special characters in filter values (RFC 4515).
pub fn escape_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}
