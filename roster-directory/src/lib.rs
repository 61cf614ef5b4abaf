//! # roster-directory
//!
//! Directory Reader: typed filters, typed entries, and two implementations
//! of the [`Directory`] search capability. [`LdapDirectory`] talks to a real
//! server; [`MemoryDirectory`] backs tests and offline runs.

pub mod entry;
pub mod error;
pub mod filter;
pub mod ldap;
pub mod memory;
pub mod reader;

pub use entry::{ClassRef, PersonEntry, RawEntry, RejectedEntry, StructureEntry};
pub use error::DirectoryError;
pub use filter::Filter;
pub use ldap::LdapDirectory;
pub use memory::MemoryDirectory;
pub use reader::{Directory, DirectoryReader, PersonBatch};
