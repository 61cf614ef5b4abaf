//! In-memory [`Directory`] evaluating filters against a fixed entry set.
//!
//! Used for dry local runs and as the directory collaborator in engine tests.

use crate::entry::RawEntry;
use crate::error::DirectoryError;
use crate::filter::Filter;
use crate::reader::Directory;

#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    entries: Vec<RawEntry>,
    queries: Vec<String>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace (by DN) an entry.
    pub fn upsert(&mut self, entry: RawEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.dn.eq_ignore_ascii_case(&entry.dn))
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, dn: &str) {
        self.entries.retain(|e| !e.dn.eq_ignore_ascii_case(dn));
    }

    /// Rendered filters of every search issued so far.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }
}

impl Directory for MemoryDirectory {
    fn search(
        &mut self,
        base: &str,
        filter: &Filter,
        _attrs: &[&str],
    ) -> Result<Vec<RawEntry>, DirectoryError> {
        self.queries.push(filter.to_ldap());
        let base = base.to_lowercase();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.dn.to_lowercase().ends_with(&base))
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }
}
