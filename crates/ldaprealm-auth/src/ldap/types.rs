//! LDAP/Active Directory types and configuration
//!
//! Supports:
//! - Simple and SASL binds
//! - StartTLS upgrades
//! - Case-insensitive attribute maps
//! - Ordered, deduplicated group sets

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Secrets
// ============================================================================

/// A credential that never shows up in `Debug` or `Display` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// Authentication mode
// ============================================================================

/// SASL mechanisms known to the context factory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SaslMechanism {
    DigestMd5,
    CramMd5,
    Gssapi,
    External,
    Other(String),
}

impl SaslMechanism {
    pub fn as_str(&self) -> &str {
        match self {
            SaslMechanism::DigestMd5 => "DIGEST-MD5",
            SaslMechanism::CramMd5 => "CRAM-MD5",
            SaslMechanism::Gssapi => "GSSAPI",
            SaslMechanism::External => "EXTERNAL",
            SaslMechanism::Other(name) => name,
        }
    }
}

/// Value of the `authentication` setting
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Authentication {
    #[default]
    Simple,
    Sasl(SaslMechanism),
}

impl Authentication {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "" | "SIMPLE" => Authentication::Simple,
            "DIGEST-MD5" => Authentication::Sasl(SaslMechanism::DigestMd5),
            "CRAM-MD5" => Authentication::Sasl(SaslMechanism::CramMd5),
            "GSSAPI" => Authentication::Sasl(SaslMechanism::Gssapi),
            "EXTERNAL" => Authentication::Sasl(SaslMechanism::External),
            other => Authentication::Sasl(SaslMechanism::Other(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Authentication::Simple => "simple",
            Authentication::Sasl(m) => m.as_str(),
        }
    }

    /// DIGEST-MD5, CRAM-MD5 and GSSAPI. Connections using them are never pooled.
    pub fn is_sasl(&self) -> bool {
        matches!(
            self,
            Authentication::Sasl(
                SaslMechanism::DigestMd5 | SaslMechanism::CramMd5 | SaslMechanism::Gssapi
            )
        )
    }

    pub fn is_gssapi(&self) -> bool {
        matches!(self, Authentication::Sasl(SaslMechanism::Gssapi))
    }
}

// ============================================================================
// Server configuration
// ============================================================================

/// Connection timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(30),
        }
    }
}

/// Directory-side search limits. Zero means "server default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchLimits {
    pub size_limit: u32,
    /// Seconds
    pub time_limit: u32,
}

/// One configured directory backend
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server key, e.g. "default" or an entry of `ldap.servers`
    pub key: String,
    /// Settings prefix, e.g. "ldap" or "ldap.example"
    pub settings_prefix: String,
    /// Candidate URLs, tried in order
    pub urls: Vec<String>,
    pub realm: Option<String>,
    pub authentication: Authentication,
    pub bind_dn: Option<String>,
    pub bind_password: Option<Secret>,
    pub start_tls: bool,
    pub sasl_realm: Option<String>,
    pub connection_pooling: bool,
    pub timeouts: Timeouts,
    pub limits: SearchLimits,
}

impl ServerConfig {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            settings_prefix: format!("{}.{}", ldaprealm_core::DEFAULT_SETTINGS_PREFIX, key),
            key,
            urls: vec![url.into()],
            realm: None,
            authentication: Authentication::Simple,
            bind_dn: None,
            bind_password: None,
            start_tls: false,
            sasl_realm: None,
            connection_pooling: true,
            timeouts: Timeouts::default(),
            limits: SearchLimits::default(),
        }
    }

    pub fn primary_url(&self) -> &str {
        self.urls.first().map(String::as_str).unwrap_or("")
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Attribute values keyed by case-insensitive attribute name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMap {
    // lower-cased name -> (name as returned by the server, values)
    inner: BTreeMap<String, (String, Vec<String>)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<String>) {
        let name = name.into();
        let slot = self
            .inner
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| (name, Vec::new()));
        slot.1.extend(values);
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.inner
            .get(&name.to_ascii_lowercase())
            .map(|(_, values)| values.as_slice())
    }

    /// First value of an attribute
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.inner
            .values()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, Vec<String>)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (N, Vec<String>)>>(iter: I) -> Self {
        let mut map = AttributeMap::new();
        for (name, values) in iter {
            map.insert(name, values);
        }
        map
    }
}

/// One directory entry returned by a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: AttributeMap,
}

impl Entry {
    pub fn new(dn: impl Into<String>, attributes: AttributeMap) -> Self {
        Self {
            dn: dn.into(),
            attributes,
        }
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.attributes.first(name)
    }
}

// ============================================================================
// Results handed to the host application
// ============================================================================

/// Display name and email of a directory user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Group names in discovery order, deduplicated case-insensitively
#[derive(Debug, Clone, Default)]
pub struct GroupSet {
    names: Vec<String>,
    seen: HashSet<String>,
}

impl GroupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the group was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.seen.insert(name.to_lowercase()) {
            self.names.push(name);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(&name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.names
    }
}

impl PartialEq for GroupSet {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

impl Serialize for GroupSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names.serialize(serializer)
    }
}
