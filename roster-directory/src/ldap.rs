//! LDAP implementation of [`Directory`] over a single blocking connection.

use std::time::Duration;

use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{LdapConn, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, info};

use roster_core::config::DirectoryConfig;

use crate::entry::RawEntry;
use crate::error::DirectoryError;
use crate::filter::Filter;
use crate::reader::Directory;

/// One process-wide directory connection for the duration of a run.
pub struct LdapDirectory {
    conn: LdapConn,
    url: String,
    page_size: i32,
}

impl LdapDirectory {
    /// Connect and, when a bind DN is configured, bind.
    pub fn connect(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let settings =
            LdapConnSettings::new().set_conn_timeout(Duration::from_secs(config.timeout_secs));
        let mut conn =
            LdapConn::with_settings(settings, &config.url).map_err(|source| {
                DirectoryError::Connect {
                    url: config.url.clone(),
                    source,
                }
            })?;

        if let Some((dn, password)) = bind_credentials(config)? {
            conn.simple_bind(dn, &password)
                .and_then(|result| result.success())
                .map_err(|source| DirectoryError::Bind {
                    dn: dn.to_string(),
                    source,
                })?;
        }

        info!(url = %config.url, "directory connection established");
        Ok(Self {
            conn,
            url: config.url.clone(),
            page_size: config.page_size,
        })
    }

    /// Unbind and drop the connection.
    pub fn close(mut self) {
        if let Err(e) = self.conn.unbind() {
            debug!(url = %self.url, error = %e, "directory unbind failed");
        }
    }
}

impl Directory for LdapDirectory {
    fn search(
        &mut self,
        base: &str,
        filter: &Filter,
        attrs: &[&str],
    ) -> Result<Vec<RawEntry>, DirectoryError> {
        let rendered = filter.to_ldap();
        debug!(filter = %rendered, base = %base, "searching directory");

        let search_err = |source| DirectoryError::Search {
            base: base.to_string(),
            filter: rendered.clone(),
            source,
        };
        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(self.page_size)),
        ];
        let mut stream = self
            .conn
            .streaming_search_with(adapters, base, Scope::Subtree, &rendered, attrs.to_vec())
            .map_err(search_err)?;

        let mut entries = Vec::new();
        while let Some(entry) = stream.next().map_err(search_err)? {
            entries.push(RawEntry::from(SearchEntry::construct(entry)));
        }
        stream.result().success().map_err(search_err)?;
        debug!(base = %base, entries = entries.len(), "search complete");
        Ok(entries)
    }
}

/// Bind DN and password, or `None` for an anonymous session. A bind DN
/// without a resolvable password is an error rather than an empty bind.
fn bind_credentials(config: &DirectoryConfig) -> Result<Option<(&str, String)>, DirectoryError> {
    let Some(dn) = config.bind_dn.as_deref() else {
        return Ok(None);
    };
    match config.resolve_password() {
        Some(password) => Ok(Some((dn, password))),
        None => Err(DirectoryError::MissingPassword { dn: dn.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DirectoryConfig {
        DirectoryConfig {
            url: "ldap://unused".to_string(),
            bind_dn: Some("cn=roster,dc=example,dc=org".to_string()),
            bind_password: None,
            bind_password_env: Some("ROSTER_TEST_UNSET_BIND_PASSWORD".to_string()),
            people_base: "ou=people,dc=example,dc=org".to_string(),
            structures_base: "ou=structures,dc=example,dc=org".to_string(),
            timeout_secs: 5,
            page_size: 500,
            schema: Default::default(),
        }
    }

    #[test]
    fn anonymous_without_bind_dn() {
        let mut cfg = config();
        cfg.bind_dn = None;
        assert!(bind_credentials(&cfg).unwrap().is_none());
    }

    #[test]
    fn bind_dn_without_password_is_refused() {
        let err = bind_credentials(&config()).unwrap_err();
        assert!(matches!(err, DirectoryError::MissingPassword { ref dn } if dn == "cn=roster,dc=example,dc=org"));
        assert!(err.to_string().contains("bind_password_env"));
    }

    #[test]
    fn inline_password_is_used() {
        let mut cfg = config();
        cfg.bind_password = Some("secret".to_string());
        let (dn, password) = bind_credentials(&cfg).unwrap().unwrap();
        assert_eq!(dn, "cn=roster,dc=example,dc=org");
        assert_eq!(password, "secret");
    }
}
