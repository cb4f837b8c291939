//! Group mapping
//!
//! Two directory layouts are supported and may be combined:
//!
//! - groups list their members (`groupOfUniqueNames`, `posixGroup`): a search
//!   under `group.baseDn` with the user's login and DN as parameters;
//! - users list their groups (`memberOf` on Active Directory): group DNs are
//!   read off the user entry.
//!
//! With `group.nested` enabled, groups of groups are followed breadth-first.
//! A group DN is never expanded twice, so membership cycles terminate.

use ldaprealm_core::{Error, Result, Settings};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::debug;

use crate::ldap::context::DirContext;
use crate::ldap::directory::Scope;
use crate::ldap::search::LdapSearch;
use crate::ldap::types::{Entry, GroupSet, SearchLimits};

const DEFAULT_ID_ATTRIBUTE: &str = "cn";
const DEFAULT_REQUEST: &str = "(&(objectClass=groupOfUniqueNames)(uniqueMember={dn}))";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapGroupMapping {
    base_dn: Option<String>,
    request: String,
    id_attribute: String,
    member_of_attribute: Option<String>,
    nested: bool,
}

impl LdapGroupMapping {
    /// `None` when neither `group.baseDn` nor `group.memberOfAttribute` is set.
    pub fn from_settings(settings: &Settings, prefix: &str) -> Result<Option<Self>> {
        let base_dn = settings
            .get_string(&format!("{}.group.baseDn", prefix))
            .map(str::to_string);
        let member_of_attribute = settings
            .get_string(&format!("{}.group.memberOfAttribute", prefix))
            .map(str::to_string);
        if base_dn.is_none() && member_of_attribute.is_none() {
            return Ok(None);
        }

        let request = settings.get_string_or(&format!("{}.group.request", prefix), DEFAULT_REQUEST);

        Ok(Some(Self {
            base_dn,
            request: normalize_request(request),
            id_attribute: settings
                .get_string_or(&format!("{}.group.idAttribute", prefix), DEFAULT_ID_ATTRIBUTE)
                .to_string(),
            member_of_attribute,
            nested: settings.get_bool_or(&format!("{}.group.nested", prefix), false)?,
        }))
    }

    pub fn base_dn(&self) -> Option<&str> {
        self.base_dn.as_deref()
    }

    /// For example `(&(objectClass=posixGroup)(memberUid={0}))`, with `{0}`
    /// the login and `{1}` the user DN.
    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    pub fn member_of_attribute(&self) -> Option<&str> {
        self.member_of_attribute.as_deref()
    }

    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Groups listing `member_id` / `member_dn` as a member. `None` when the
    /// groups-list-members layout is not configured.
    pub fn create_search(&self, member_id: &str, member_dn: &str) -> Option<LdapSearch> {
        self.base_dn.as_ref().map(|base_dn| {
            LdapSearch::new(base_dn)
                .request(&self.request)
                .parameters([member_id, member_dn])
                .returning([self.id_attribute.as_str()])
        })
    }

    /// Groups of the already-resolved `user` entry.
    ///
    /// The context must be bound with an identity allowed to read groups.
    pub async fn resolve(
        &self,
        context: &mut DirContext,
        login: &str,
        user: &Entry,
        limits: SearchLimits,
    ) -> Result<GroupSet> {
        let mut resolution = Resolution::default();

        if let Some(search) = self.create_search(login, &user.dn) {
            let entries = search.limits(limits).execute(context).await?.collect_all().await?;
            for group in entries {
                let id = self.group_id(&group);
                resolution.add(id, group.dn);
            }
        }
        if let Some(attribute) = &self.member_of_attribute {
            for dn in user.attributes.get(attribute).unwrap_or_default() {
                if let Some(id) = rdn_value(dn) {
                    resolution.add(id, dn.clone());
                }
            }
        }

        if self.nested {
            while let Some(dn) = resolution.pending.pop_front() {
                self.expand(context, &dn, limits, &mut resolution).await?;
            }
        }

        debug!(login, groups = resolution.groups.len(), "Resolved groups");
        Ok(resolution.groups)
    }

    /// Adds the parents of one group.
    ///
    /// Only DN-parameterized requests are followed: the group's DN takes the
    /// place of the user's, and a group name is never matched against logins.
    async fn expand(
        &self,
        context: &mut DirContext,
        dn: &str,
        limits: SearchLimits,
        resolution: &mut Resolution,
    ) -> Result<()> {
        if self.request.contains("{1}") {
            if let Some(search) = self.create_search(dn, dn) {
                let entries = search.limits(limits).execute(context).await?.collect_all().await?;
                for group in entries {
                    let parent = self.group_id(&group);
                    resolution.add(parent, group.dn);
                }
            }
        }

        if let Some(attribute) = &self.member_of_attribute {
            let lookup = LdapSearch::new(dn)
                .scope(Scope::Base)
                .returning([attribute.as_str()])
                .limits(limits)
                .find_unique(context)
                .await;
            let entry = match lookup {
                Ok(entry) => entry,
                Err(Error::NoSuchObject(reason)) => {
                    debug!(group = dn, "Group is not held by this server: {}", reason);
                    None
                }
                Err(e) => return Err(e),
            };
            if let Some(entry) = entry {
                for parent_dn in entry.attributes.get(attribute).unwrap_or_default() {
                    if let Some(parent) = rdn_value(parent_dn) {
                        resolution.add(parent, parent_dn.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn group_id(&self, group: &Entry) -> String {
        group
            .first(&self.id_attribute)
            .map(str::to_string)
            .or_else(|| rdn_value(&group.dn))
            .unwrap_or_else(|| group.dn.clone())
    }
}

impl fmt::Display for LdapGroupMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LdapGroupMapping{{baseDn={}, idAttribute={}, request={}, memberOfAttribute={}, nested={}}}",
            self.base_dn.as_deref().unwrap_or("null"),
            self.id_attribute,
            self.request,
            self.member_of_attribute.as_deref().unwrap_or("null"),
            self.nested
        )
    }
}

#[derive(Default)]
struct Resolution {
    groups: GroupSet,
    // lower-cased DNs already added
    visited: HashSet<String>,
    pending: VecDeque<String>,
}

impl Resolution {
    fn add(&mut self, id: String, dn: String) {
        if self.visited.insert(dn.to_lowercase()) {
            self.groups.insert(id);
            self.pending.push_back(dn);
        }
    }
}

fn normalize_request(request: &str) -> String {
    request
        .replace("{uid}", "{0}")
        .replace("{login}", "{0}")
        .replace("{dn}", "{1}")
}

/// Value of the first RDN: `cn=sonar-users,ou=groups` -> `sonar-users`
pub fn rdn_value(dn: &str) -> Option<String> {
    let mut rdn = String::new();
    let mut chars = dn.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                rdn.push(c);
                rdn.extend(chars.next());
            }
            ',' | '+' => break,
            c => rdn.push(c),
        }
    }

    let (_, value) = rdn.split_once('=')?;
    let value = unescape_dn_value(value.trim());
    (!value.is_empty()).then_some(value)
}

fn unescape_dn_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            unescaped.extend(chars.next());
        } else {
            unescaped.push(c);
        }
    }
    unescaped
}
