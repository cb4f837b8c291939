//! Settings manager
//!
//! Reads the raw key-value settings once and builds one [`ServerBundle`] per
//! configured directory server.
//!
//! Single server:
//!
//! ```text
//! ldap.url=ldap://localhost:389
//! ldap.user.baseDn=ou=users,dc=example,dc=org
//! ```
//!
//! Several servers, tried in the listed order:
//!
//! ```text
//! ldap.servers=example,infosupport
//! ldap.example.url=ldap://localhost:389
//! ldap.infosupport.url=ldap://localhost:1389
//! ```

use ldaprealm_core::{Error, Result, Settings, DEFAULT_SETTINGS_PREFIX};
use std::sync::Arc;
use tracing::info;

use crate::ldap::autodiscovery::LdapAutodiscovery;
use crate::ldap::context::ContextFactory;
use crate::ldap::directory::DirectoryConnector;
use crate::ldap::group_mapping::LdapGroupMapping;
use crate::ldap::types::{
    Authentication, SaslMechanism, SearchLimits, Secret, ServerConfig, Timeouts,
};
use crate::ldap::user_mapping::LdapUserMapping;

const SERVERS_KEY: &str = "ldap.servers";
const DEFAULT_SERVER_KEY: &str = "default";

/// Everything needed to talk to one directory server
pub struct ServerBundle {
    pub config: Arc<ServerConfig>,
    pub context_factory: ContextFactory,
    pub user_mapping: LdapUserMapping,
    pub group_mapping: Option<LdapGroupMapping>,
}

impl ServerBundle {
    pub fn key(&self) -> &str {
        &self.config.key
    }
}

pub struct LdapSettingsManager {
    settings: Settings,
    connector: Arc<dyn DirectoryConnector>,
    autodiscovery: LdapAutodiscovery,
}

impl LdapSettingsManager {
    pub fn new(
        settings: Settings,
        connector: Arc<dyn DirectoryConnector>,
        autodiscovery: LdapAutodiscovery,
    ) -> Self {
        Self {
            settings,
            connector,
            autodiscovery,
        }
    }

    /// `(server key, settings prefix)` pairs in configured order
    pub fn server_prefixes(&self) -> Result<Vec<(String, String)>> {
        let servers = self.settings.get_list(SERVERS_KEY);
        if servers.is_empty() {
            return Ok(vec![(
                DEFAULT_SERVER_KEY.to_string(),
                DEFAULT_SETTINGS_PREFIX.to_string(),
            )]);
        }

        for legacy in ["url", "realm"] {
            let key = format!("{}.{}", DEFAULT_SETTINGS_PREFIX, legacy);
            if self.settings.contains_key(&key) {
                return Err(Error::config(format!(
                    "When defining multiple LDAP servers with the property '{}', all LDAP properties \
                     must be linked to one of those servers. Please remove properties like '{}'.",
                    SERVERS_KEY, key
                )));
            }
        }

        Ok(servers
            .into_iter()
            .map(|key| {
                let prefix = format!("{}.{}", DEFAULT_SETTINGS_PREFIX, key);
                (key, prefix)
            })
            .collect())
    }

    /// Builds every server bundle. Any invalid server fails the whole set.
    pub async fn server_bundles(&self) -> Result<Vec<ServerBundle>> {
        let mut bundles = Vec::new();
        for (key, prefix) in self.server_prefixes()? {
            let config = Arc::new(self.server_config(&key, &prefix).await?);
            let user_mapping = LdapUserMapping::from_settings(&self.settings, &prefix)?;
            let group_mapping = LdapGroupMapping::from_settings(&self.settings, &prefix)?;

            info!("User mapping for server {}: {}", key, user_mapping);
            match &group_mapping {
                Some(mapping) => info!("Group mapping for server {}: {}", key, mapping),
                None => info!(
                    "Groups will not be synchronized for server {}, because property '{}.group.baseDn' is empty.",
                    key, prefix
                ),
            }

            bundles.push(ServerBundle {
                context_factory: ContextFactory::new(config.clone(), self.connector.clone()),
                config,
                user_mapping,
                group_mapping,
            });
        }
        Ok(bundles)
    }

    async fn server_config(&self, key: &str, prefix: &str) -> Result<ServerConfig> {
        let settings = &self.settings;
        let property = |name: &str| format!("{}.{}", prefix, name);

        let realm = settings.get_string(&property("realm")).map(str::to_string);
        let urls = match settings.get_string(&property("url")) {
            Some(url) => vec![validate_url(&property("url"), url)?],
            None => match &realm {
                Some(realm) => {
                    let discovered = self.autodiscovery.ldap_servers(realm).await;
                    if discovered.is_empty() {
                        return Err(Error::config(format!(
                            "The property '{}' is empty and SRV resolution fails for realm '{}'",
                            property("url"),
                            realm
                        )));
                    }
                    info!("Discovered LDAP servers for realm {}: {:?}", realm, discovered);
                    discovered
                }
                None => {
                    return Err(Error::config(format!(
                        "The property '{}' is empty and no realm configured to try auto-discovery.",
                        property("url")
                    )))
                }
            },
        };

        let authentication = settings
            .get_string(&property("authentication"))
            .map(Authentication::parse)
            .unwrap_or_default();
        if authentication == Authentication::Sasl(SaslMechanism::External) {
            // EXTERNAL binds ignore the password, so they cannot verify users
            return Err(Error::config(format!(
                "Property '{}' does not support EXTERNAL",
                property("authentication")
            )));
        }

        let defaults = Timeouts::default();
        Ok(ServerConfig {
            key: key.to_string(),
            settings_prefix: prefix.to_string(),
            urls,
            authentication,
            bind_dn: settings.get_string(&property("bindDn")).map(str::to_string),
            bind_password: settings.get_string(&property("bindPassword")).map(Secret::from),
            start_tls: settings.get_bool(&property("StartTLS"))?,
            sasl_realm: settings.get_string(&property("saslRealm")).map(str::to_string),
            connection_pooling: settings.get_bool_or(&property("connectionPooling"), true)?,
            timeouts: Timeouts {
                connect: settings
                    .get_duration(&property("connectTimeout"))?
                    .unwrap_or(defaults.connect),
                read: settings
                    .get_duration(&property("readTimeout"))?
                    .unwrap_or(defaults.read),
            },
            limits: SearchLimits {
                size_limit: settings.get_u32(&property("sizeLimit"))?.unwrap_or(0),
                time_limit: settings.get_u32(&property("timeLimit"))?.unwrap_or(0),
            },
            realm,
        })
    }
}

fn validate_url(key: &str, value: &str) -> Result<String> {
    let parsed = url::Url::parse(value)
        .map_err(|e| Error::config(format!("Property '{}' is not a valid URL: {}", key, e)))?;
    match parsed.scheme() {
        "ldap" | "ldaps" => Ok(value.to_string()),
        other => Err(Error::config(format!(
            "Property '{}' must use the ldap or ldaps scheme, got '{}'",
            key, other
        ))),
    }
}
