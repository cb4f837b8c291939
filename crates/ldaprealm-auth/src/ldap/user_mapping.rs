//! User mapping: where users live and how a login becomes a search filter

use ldaprealm_core::{Error, Result, Settings};
use std::fmt;
use tracing::warn;

use crate::ldap::autodiscovery::LdapAutodiscovery;
use crate::ldap::search::LdapSearch;

const DEFAULT_OBJECT_CLASS: &str = "inetOrgPerson";
const DEFAULT_LOGIN_ATTRIBUTE: &str = "uid";
const DEFAULT_NAME_ATTRIBUTE: &str = "cn";
const DEFAULT_EMAIL_ATTRIBUTE: &str = "mail";
const DEFAULT_REQUEST: &str = "(&(objectClass=inetOrgPerson)(uid={login}))";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapUserMapping {
    base_dn: String,
    request: String,
    real_name_attribute: String,
    email_attribute: String,
}

impl LdapUserMapping {
    pub fn from_settings(settings: &Settings, prefix: &str) -> Result<Self> {
        let base_dn = match settings.get_string(&format!("{}.user.baseDn", prefix)) {
            Some(dn) => dn.to_string(),
            None => settings
                .get_string(&format!("{}.realm", prefix))
                .map(LdapAutodiscovery::dns_domain_dn)
                .filter(|dn| !dn.is_empty())
                .ok_or_else(|| {
                    Error::config(format!(
                        "{}.user.baseDn is not set and cannot be derived from {}.realm",
                        prefix, prefix
                    ))
                })?,
        };

        let object_class = settings.get_string(&format!("{}.user.objectClass", prefix));
        let login_attribute = settings.get_string(&format!("{}.user.loginAttribute", prefix));

        let request = if object_class.is_some() || login_attribute.is_some() {
            let request = format!(
                "(&(objectClass={})({}={{login}}))",
                object_class.unwrap_or(DEFAULT_OBJECT_CLASS),
                login_attribute.unwrap_or(DEFAULT_LOGIN_ATTRIBUTE)
            );
            warn!(
                "Properties '{prefix}.user.objectClass' and '{prefix}.user.loginAttribute' are deprecated and \
                 should be replaced by single property '{prefix}.user.request' with value: {request}"
            );
            request
        } else {
            settings
                .get_string_or(&format!("{}.user.request", prefix), DEFAULT_REQUEST)
                .to_string()
        };

        Ok(Self {
            base_dn,
            request: normalize_request(&request),
            real_name_attribute: settings
                .get_string_or(&format!("{}.user.realNameAttribute", prefix), DEFAULT_NAME_ATTRIBUTE)
                .to_string(),
            email_attribute: settings
                .get_string_or(&format!("{}.user.emailAttribute", prefix), DEFAULT_EMAIL_ATTRIBUTE)
                .to_string(),
        })
    }

    /// Search for the entry of `login`
    pub fn create_search(&self, login: &str) -> LdapSearch {
        LdapSearch::new(&self.base_dn)
            .request(&self.request)
            .parameters([login])
    }

    /// For example "ou=users,o=mycompany" or "cn=users" (Active Directory)
    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// For example `(&(objectClass=user)(sAMAccountName={0}))`
    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn real_name_attribute(&self) -> &str {
        &self.real_name_attribute
    }

    pub fn email_attribute(&self) -> &str {
        &self.email_attribute
    }
}

impl fmt::Display for LdapUserMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LdapUserMapping{{baseDn={}, request={}, realNameAttribute={}, emailAttribute={}}}",
            self.base_dn, self.request, self.real_name_attribute, self.email_attribute
        )
    }
}

fn normalize_request(request: &str) -> String {
    request.replace("{login}", "{0}").replace("{uid}", "{0}")
}
