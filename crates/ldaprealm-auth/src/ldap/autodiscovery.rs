//! Directory autodiscovery from a DNS realm
//!
//! `example.org` resolves to the servers published under `_ldap._tcp.example.org`
//! and to the base DN `dc=example,dc=org`. Missing records are not an error:
//! callers fall back to explicit configuration.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

/// One DNS SRV answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

#[async_trait]
pub trait SrvResolver: Send + Sync {
    /// SRV records for `name`; lookup failures yield an empty list.
    async fn lookup_srv(&self, name: &str) -> Vec<SrvRecord>;
}

/// System resolver backed by `hickory-resolver`
pub struct HickorySrvResolver {
    resolver: TokioAsyncResolver,
}

impl HickorySrvResolver {
    /// Uses the system resolver configuration, or the library default when
    /// it cannot be read.
    pub fn from_system_conf() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!("Falling back to default resolver configuration: {}", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }
}

#[async_trait]
impl SrvResolver for HickorySrvResolver {
    async fn lookup_srv(&self, name: &str) -> Vec<SrvRecord> {
        match self.resolver.srv_lookup(name).await {
            Ok(lookup) => lookup
                .iter()
                .map(|srv| SrvRecord {
                    priority: srv.priority(),
                    weight: srv.weight(),
                    port: srv.port(),
                    target: srv.target().to_utf8(),
                })
                .collect(),
            Err(e) => {
                debug!("SRV lookup for {} returned nothing: {}", name, e);
                Vec::new()
            }
        }
    }
}

/// Resolves directory URLs and base DNs from a realm name
pub struct LdapAutodiscovery {
    resolver: Box<dyn SrvResolver>,
}

impl LdapAutodiscovery {
    pub fn new(resolver: impl SrvResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
        }
    }

    /// Autodiscovery through the system DNS configuration
    pub fn system() -> Self {
        Self::new(HickorySrvResolver::from_system_conf())
    }

    /// `ldap://host:port` URLs, lowest priority first, then highest weight.
    pub async fn ldap_servers(&self, realm: &str) -> Vec<String> {
        let realm = realm.trim().trim_end_matches('.');
        if realm.is_empty() {
            return Vec::new();
        }

        let name = format!("_ldap._tcp.{}.", realm);
        let mut records = self.resolver.lookup_srv(&name).await;
        records.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.weight.cmp(&a.weight)));

        let urls: Vec<String> = records
            .into_iter()
            .filter(|r| !r.target.trim_end_matches('.').is_empty())
            .map(|r| format!("ldap://{}:{}", r.target.trim_end_matches('.'), r.port))
            .collect();

        debug!(realm, servers = ?urls, "LDAP autodiscovery");
        urls
    }

    /// `dc=` components of the realm labels, in label order.
    pub fn dns_domain_dn(realm: &str) -> String {
        realm
            .split('.')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(|label| format!("dc={}", label))
            .collect::<Vec<_>>()
            .join(",")
    }
}
