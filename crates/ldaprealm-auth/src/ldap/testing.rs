//! In-memory directory used by the unit tests

use async_trait::async_trait;
use ldaprealm_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ldap::autodiscovery::{SrvRecord, SrvResolver};
use crate::ldap::directory::{
    ConnectParams, DirectoryConnection, DirectoryConnector, EntryCursor, Scope, SearchRequest,
};
use crate::ldap::types::{AttributeMap, Entry};

#[derive(Default)]
struct State {
    entries: Mutex<Vec<Entry>>,
    // lower-cased principal -> password
    passwords: Mutex<HashMap<String, String>>,
    unreachable: AtomicBool,
    failing_tls: AtomicBool,
    unreachable_urls: Mutex<HashSet<String>>,
    connect_log: Mutex<Vec<ConnectParams>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Directory seam implementation backed by a list of entries
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<State>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, dn: &str, attributes: &[(&str, &[&str])]) -> Self {
        let attributes: AttributeMap = attributes
            .iter()
            .map(|(name, values)| (*name, values.iter().map(|v| v.to_string()).collect::<Vec<_>>()))
            .collect();
        self.state.entries.lock().push(Entry::new(dn, attributes));
        self
    }

    /// Registers a password for a bind principal (a DN, or a login for SASL).
    pub fn with_password(self, principal: &str, password: &str) -> Self {
        self.state
            .passwords
            .lock()
            .insert(principal.to_lowercase(), password.to_string());
        self
    }

    pub fn unreachable(self) -> Self {
        self.set_unreachable(true);
        self
    }

    pub fn failing_tls(self) -> Self {
        self.state.failing_tls.store(true, Ordering::SeqCst);
        self
    }

    pub fn unreachable_url(self, url: &str) -> Self {
        self.state.unreachable_urls.lock().insert(url.to_string());
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn connect_log(&self) -> Vec<ConnectParams> {
        self.state.connect_log.lock().clone()
    }
}

#[async_trait]
impl DirectoryConnector for MemoryDirectory {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DirectoryConnection>> {
        self.state.connect_log.lock().push(params.clone());

        if self.state.unreachable.load(Ordering::SeqCst)
            || self.state.unreachable_urls.lock().contains(&params.url)
        {
            return Err(Error::connectivity(format!("{}: connection refused", params.url)));
        }
        if params.start_tls && self.state.failing_tls.load(Ordering::SeqCst) {
            return Err(Error::tls(format!("{}: handshake failure", params.url)));
        }

        if let Some(principal) = &params.principal {
            let passwords = self.state.passwords.lock();
            let supplied = params.credentials.as_ref().map(|c| c.expose());
            match passwords.get(&principal.to_lowercase()) {
                Some(expected) if Some(expected.as_str()) == supplied => {}
                _ => return Err(Error::Authentication("invalid credentials".to_string())),
            }
        }

        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
        }))
    }
}

struct MemoryConnection {
    state: Arc<State>,
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
    async fn search<'a>(
        &'a mut self,
        request: &SearchRequest,
    ) -> Result<Box<dyn EntryCursor + 'a>> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(Error::connectivity("connection closed"));
        }
        let filter = Filter::parse(&request.filter)
            .ok_or_else(|| Error::Search(format!("Bad search filter {}", request.filter)))?;

        let base = request.base_dn.to_lowercase();
        let entries = self.state.entries.lock();
        if request.scope == Scope::Base && !entries.iter().any(|e| e.dn.to_lowercase() == base) {
            return Err(Error::NoSuchObject(format!("search failed with result code 32: {}", request.base_dn)));
        }
        let mut matches: VecDeque<Entry> = entries
            .iter()
            .filter(|entry| in_scope(&entry.dn.to_lowercase(), &base, request.scope))
            .filter(|entry| filter.matches(entry))
            .map(|entry| project(entry, &request.attributes))
            .collect();
        drop(entries);
        if request.limits.size_limit > 0 {
            matches.truncate(request.limits.size_limit as usize);
        }

        Ok(Box::new(MemoryCursor { entries: matches }))
    }

    async fn close(self: Box<Self>) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemoryCursor {
    entries: VecDeque<Entry>,
}

#[async_trait]
impl EntryCursor for MemoryCursor {
    async fn next_entry(&mut self) -> Result<Option<Entry>> {
        Ok(self.entries.pop_front())
    }

    async fn abandon(&mut self) {
        self.entries.clear();
    }
}

fn in_scope(dn: &str, base: &str, scope: Scope) -> bool {
    match scope {
        Scope::Base => dn == base,
        Scope::OneLevel => dn
            .split_once(',')
            .map(|(_, parent)| parent == base)
            .unwrap_or(false),
        Scope::Subtree => dn == base || dn.ends_with(&format!(",{}", base)),
    }
}

fn project(entry: &Entry, attributes: &[String]) -> Entry {
    if attributes.is_empty() {
        return entry.clone();
    }
    let projected = entry
        .attributes
        .iter()
        .filter(|(name, _)| attributes.iter().any(|a| a.eq_ignore_ascii_case(name)))
        .map(|(name, values)| (name, values.to_vec()))
        .collect();
    Entry::new(entry.dn.clone(), projected)
}

/// Subset of RFC 4515 filters: `&`, `|`, `!`, equality and presence
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, String),
}

impl Filter {
    fn parse(input: &str) -> Option<Filter> {
        let (filter, rest) = Self::parse_one(input.trim())?;
        rest.is_empty().then_some(filter)
    }

    fn parse_one(input: &str) -> Option<(Filter, &str)> {
        let body = input.strip_prefix('(')?;
        match body.chars().next()? {
            '&' | '|' => {
                let mut rest = &body[1..];
                let mut children = Vec::new();
                while !rest.starts_with(')') {
                    let (child, remaining) = Self::parse_one(rest)?;
                    children.push(child);
                    rest = remaining;
                }
                let filter = if body.starts_with('&') {
                    Filter::And(children)
                } else {
                    Filter::Or(children)
                };
                Some((filter, &rest[1..]))
            }
            '!' => {
                let (child, rest) = Self::parse_one(&body[1..])?;
                Some((Filter::Not(Box::new(child)), rest.strip_prefix(')')?))
            }
            _ => {
                let end = body.find(')')?;
                let (attribute, value) = body[..end].split_once('=')?;
                let filter = if value == "*" {
                    Filter::Present(attribute.to_string())
                } else {
                    Filter::Equal(attribute.to_string(), unescape(value)?)
                };
                Some((filter, &body[end + 1..]))
            }
        }
    }

    fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|f| f.matches(entry)),
            Filter::Or(children) => children.iter().any(|f| f.matches(entry)),
            Filter::Not(child) => !child.matches(entry),
            Filter::Present(attribute) => entry.attributes.contains(attribute),
            Filter::Equal(attribute, value) => entry
                .attributes
                .get(attribute)
                .map(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value)))
                .unwrap_or(false),
        }
    }
}

fn unescape(value: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(value.len());
    let raw = value.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            let hex = value.get(i + 1..i + 3)?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }
    String::from_utf8(bytes).ok()
}

/// SRV resolver answering from a fixed table
#[derive(Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<SrvRecord>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, records: Vec<SrvRecord>) -> Self {
        self.records.insert(name.to_string(), records);
        self
    }
}

#[async_trait]
impl SrvResolver for StaticResolver {
    async fn lookup_srv(&self, name: &str) -> Vec<SrvRecord> {
        self.records.get(name).cloned().unwrap_or_default()
    }
}

/// `dc=example,dc=org` with three users and two groups
///
/// | login  | password | groups                         |
/// |--------|----------|--------------------------------|
/// | tester | secret   | sonar-users                    |
/// | godin  | secret1  | sonar-users, sonar-developers  |
/// | robby  | secret2  | (none)                         |
///
/// The service account is `cn=bind,ou=users,dc=example,dc=org` / `bindpassword`.
pub fn sample_directory() -> MemoryDirectory {
    MemoryDirectory::new()
        .with_entry("dc=example,dc=org", &[("objectClass", &["domain"]), ("dc", &["example"])])
        .with_entry("ou=users,dc=example,dc=org", &[("objectClass", &["organizationalUnit"])])
        .with_entry("ou=groups,dc=example,dc=org", &[("objectClass", &["organizationalUnit"])])
        .with_entry("cn=bind,ou=users,dc=example,dc=org", &[("objectClass", &["person"]), ("cn", &["bind"])])
        .with_password("cn=bind,ou=users,dc=example,dc=org", "bindpassword")
        .with_entry(
            "uid=tester,ou=users,dc=example,dc=org",
            &[
                ("objectClass", &["inetOrgPerson"]),
                ("uid", &["tester"]),
                ("cn", &["Tester Testerovich"]),
                ("mail", &["tester@example.org"]),
                ("memberOf", &["cn=sonar-users,ou=groups,dc=example,dc=org"]),
            ],
        )
        .with_password("uid=tester,ou=users,dc=example,dc=org", "secret")
        .with_password("tester", "secret")
        .with_entry(
            "uid=godin,ou=users,dc=example,dc=org",
            &[
                ("objectClass", &["inetOrgPerson"]),
                ("uid", &["godin"]),
                ("cn", &["Evgeny Mandrikov"]),
                ("mail", &["godin@example.org"]),
                (
                    "memberOf",
                    &[
                        "cn=sonar-users,ou=groups,dc=example,dc=org",
                        "cn=sonar-developers,ou=groups,dc=example,dc=org",
                    ],
                ),
            ],
        )
        .with_password("uid=godin,ou=users,dc=example,dc=org", "secret1")
        .with_entry(
            "uid=robby,ou=users,dc=example,dc=org",
            &[
                ("objectClass", &["inetOrgPerson"]),
                ("uid", &["robby"]),
                ("cn", &["Robby Developer"]),
            ],
        )
        .with_password("uid=robby,ou=users,dc=example,dc=org", "secret2")
        .with_entry(
            "cn=sonar-users,ou=groups,dc=example,dc=org",
            &[
                ("objectClass", &["groupOfUniqueNames"]),
                ("cn", &["sonar-users"]),
                (
                    "uniqueMember",
                    &[
                        "uid=tester,ou=users,dc=example,dc=org",
                        "uid=godin,ou=users,dc=example,dc=org",
                    ],
                ),
            ],
        )
        .with_entry(
            "cn=sonar-developers,ou=groups,dc=example,dc=org",
            &[
                ("objectClass", &["groupOfUniqueNames"]),
                ("cn", &["sonar-developers"]),
                ("uniqueMember", &["uid=godin,ou=users,dc=example,dc=org"]),
            ],
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_evaluation() {
        let entry = Entry::new(
            "uid=tester,ou=users,dc=example,dc=org",
            [("objectClass", vec!["inetOrgPerson".to_string()]), ("uid", vec!["tester".to_string()])]
                .into_iter()
                .collect(),
        );
        let eval = |f: &str| Filter::parse(f).unwrap().matches(&entry);

        assert!(eval("(&(objectClass=inetOrgPerson)(uid=tester))"));
        assert!(eval("(|(uid=nobody)(uid=TESTER))"));
        assert!(eval("(!(mail=*))"));
        assert!(!eval("(uid=\\2a)"));
        assert!(Filter::parse("(uid=tester").is_none());
    }

    #[test]
    fn test_scopes() {
        let base = "ou=users,dc=example,dc=org";
        assert!(in_scope("ou=users,dc=example,dc=org", base, Scope::Base));
        assert!(in_scope("uid=a,ou=users,dc=example,dc=org", base, Scope::OneLevel));
        assert!(!in_scope("uid=a,ou=x,ou=users,dc=example,dc=org", base, Scope::OneLevel));
        assert!(in_scope("uid=a,ou=x,ou=users,dc=example,dc=org", base, Scope::Subtree));
        assert!(!in_scope("uid=a,ou=groups,dc=example,dc=org", base, Scope::Subtree));
    }
}
