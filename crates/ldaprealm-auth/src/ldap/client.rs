//! LDAP Client implementation
//!
//! [`DirectoryConnector`] backed by `ldap3`. Supports LDAP, LDAPS and
//! STARTTLS connections, simple and GSSAPI binds, and an idle pool
//! for connections the context factory marks as poolable.

use crate::ldap::directory::{
    ConnectParams, DirectoryConnection, DirectoryConnector, EntryCursor, Scope, SearchRequest,
};
use crate::ldap::types::{AttributeMap, Authentication, Entry, SaslMechanism};
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, SearchEntry, SearchOptions, SearchStream};
use ldaprealm_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// LDAP result code for invalidCredentials
const RC_INVALID_CREDENTIALS: u32 = 49;
/// LDAP result code for sizeLimitExceeded
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;
/// LDAP result code for timeLimitExceeded
const RC_TIME_LIMIT_EXCEEDED: u32 = 3;
/// LDAP result code for referral
const RC_REFERRAL: u32 = 10;
/// LDAP result code for noSuchObject
const RC_NO_SUCH_OBJECT: u32 = 32;

const MAX_IDLE_PER_KEY: usize = 8;

/// Directory connector using `ldap3`
pub struct Ldap3Connector {
    pool: Arc<IdlePool>,
}

impl Ldap3Connector {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(IdlePool::default()),
        }
    }

    /// Number of idle pooled connections, across all bind identities
    pub fn idle_connections(&self) -> usize {
        self.pool.len()
    }

    async fn open(&self, params: &ConnectParams) -> Result<Ldap> {
        if params.start_tls {
            // Resolve first so an unknown host is not mistaken for a TLS failure.
            let (host, port) = host_and_port(&params.url)?;
            let lookup = tokio::net::lookup_host((host.as_str(), port));
            let mut addrs = tokio::time::timeout(params.timeouts.connect, lookup)
                .await
                .map_err(|_| Error::Timeout(format!("resolving {}", params.url)))?
                .map_err(|e| Error::connectivity(format!("{}: {}", params.url, e)))?;
            if addrs.next().is_none() {
                return Err(Error::connectivity(format!(
                    "{}: no address found for {}",
                    params.url, host
                )));
            }
        }

        let settings = LdapConnSettings::new()
            .set_conn_timeout(params.timeouts.connect)
            .set_starttls(params.start_tls);

        debug!("Connecting to LDAP server: {}", params.url);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &params.url)
            .await
            .map_err(|e| connect_error(e, params))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!("LDAP connection driver error: {}", e);
            }
        });

        Ok(ldap)
    }

    async fn bind(&self, ldap: &mut Ldap, params: &ConnectParams) -> Result<()> {
        let read_timeout = params.timeouts.read;

        let result = match &params.authentication {
            Authentication::Simple => {
                let Some(principal) = params.principal.as_deref() else {
                    // anonymous
                    return Ok(());
                };
                let password = params
                    .credentials
                    .as_ref()
                    .map(|c| c.expose())
                    .unwrap_or("");
                ldap.with_timeout(read_timeout)
                    .simple_bind(principal, password)
                    .await
            }
            Authentication::Sasl(SaslMechanism::Gssapi) => {
                return self.gssapi_bind(ldap, params).await;
            }
            Authentication::Sasl(mechanism) => {
                return Err(Error::config(format!(
                    "SASL mechanism {} is not supported by the ldap3 connector",
                    mechanism.as_str()
                )));
            }
        };

        let result = result.map_err(|e| op_error(e, "bind"))?;
        check_bind(result.rc, &result.text)
    }

    #[cfg(feature = "gssapi")]
    async fn gssapi_bind(&self, ldap: &mut Ldap, params: &ConnectParams) -> Result<()> {
        let (host, _) = host_and_port(&params.url)?;
        if let Some(realm) = &params.sasl_realm {
            debug!("GSSAPI bind uses the Kerberos credential cache; SASL realm {}", realm);
        }
        let result = ldap
            .with_timeout(params.timeouts.read)
            .sasl_gssapi_bind(&host)
            .await
            .map_err(|e| op_error(e, "GSSAPI bind"))?;
        check_bind(result.rc, &result.text)
    }

    #[cfg(not(feature = "gssapi"))]
    async fn gssapi_bind(&self, _ldap: &mut Ldap, _params: &ConnectParams) -> Result<()> {
        Err(Error::config(
            "GSSAPI authentication requires building with the 'gssapi' feature",
        ))
    }
}

impl Default for Ldap3Connector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DirectoryConnection>> {
        let key = PoolKey::from_params(params);

        if params.pooling {
            if let Some(ldap) = self.pool.take(&key) {
                debug!("Reusing pooled LDAP connection to {}", params.url);
                return Ok(Box::new(Ldap3Connection {
                    ldap,
                    read_timeout: params.timeouts.read,
                    pool: Some((self.pool.clone(), key)),
                }));
            }
        }

        let mut ldap = self.open(params).await?;

        if let Err(e) = self.bind(&mut ldap, params).await {
            let _ = ldap.unbind().await;
            return Err(e);
        }

        Ok(Box::new(Ldap3Connection {
            ldap,
            read_timeout: params.timeouts.read,
            pool: params.pooling.then(|| (self.pool.clone(), key)),
        }))
    }
}

// =========================================================================
// Connections and cursors
// =========================================================================

struct Ldap3Connection {
    ldap: Ldap,
    read_timeout: Duration,
    pool: Option<(Arc<IdlePool>, PoolKey)>,
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn search<'a>(
        &'a mut self,
        request: &SearchRequest,
    ) -> Result<Box<dyn EntryCursor + 'a>> {
        let scope = match request.scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::OneLevel => ldap3::Scope::OneLevel,
            Scope::Subtree => ldap3::Scope::Subtree,
        };
        let options = SearchOptions::new()
            .sizelimit(protocol_limit(request.limits.size_limit))
            .timelimit(protocol_limit(request.limits.time_limit));

        let stream = self
            .ldap
            .with_search_options(options)
            .with_timeout(self.read_timeout)
            .streaming_search(
                &request.base_dn,
                scope,
                &request.filter,
                request.attributes.clone(),
            )
            .await
            .map_err(|e| op_error(e, "search"))?;

        Ok(Box::new(Ldap3Cursor {
            stream,
            done: false,
        }))
    }

    async fn close(self: Box<Self>) {
        let mut this = *self;
        if let Some((pool, key)) = this.pool.take() {
            if !this.ldap.is_closed() {
                pool.put(key, this.ldap);
                return;
            }
        }
        if let Err(e) = this.ldap.unbind().await {
            debug!("LDAP unbind failed: {}", e);
        }
    }
}

struct Ldap3Cursor {
    stream: SearchStream<'static, String, Vec<String>>,
    done: bool,
}

#[async_trait]
impl EntryCursor for Ldap3Cursor {
    async fn next_entry(&mut self) -> Result<Option<Entry>> {
        while !self.done {
            match self.stream.next().await {
                Ok(Some(raw)) => {
                    if raw.is_ref() {
                        continue;
                    }
                    return Ok(Some(to_entry(SearchEntry::construct(raw))));
                }
                Ok(None) => {
                    self.done = true;
                    let result = self.stream.finish().await;
                    return match result.rc {
                        0 => Ok(None),
                        RC_SIZE_LIMIT_EXCEEDED | RC_TIME_LIMIT_EXCEEDED => {
                            warn!(rc = result.rc, "LDAP search truncated by server limits");
                            Ok(None)
                        }
                        rc => Err(search_error(rc, &result.text, "search")),
                    };
                }
                Err(e) => {
                    self.done = true;
                    return Err(op_error(e, "search"));
                }
            }
        }
        Ok(None)
    }

    async fn abandon(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let ldap = self.stream.ldap_handle();
        let msgid = ldap.last_id();
        if let Err(e) = ldap.abandon(msgid).await {
            debug!("Abandoning LDAP search failed: {}", e);
        }
    }
}

fn to_entry(entry: SearchEntry) -> Entry {
    let attributes: AttributeMap = entry.attrs.into_iter().collect();
    Entry::new(entry.dn, attributes)
}

// =========================================================================
// Idle pool
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    url: String,
    principal: Option<String>,
}

impl PoolKey {
    fn from_params(params: &ConnectParams) -> Self {
        Self {
            url: params.url.clone(),
            principal: params.principal.clone(),
        }
    }
}

#[derive(Default)]
struct IdlePool {
    idle: Mutex<HashMap<PoolKey, Vec<Ldap>>>,
}

impl IdlePool {
    fn take(&self, key: &PoolKey) -> Option<Ldap> {
        let mut idle = self.idle.lock();
        let connections = idle.get_mut(key)?;
        while let Some(mut ldap) = connections.pop() {
            if !ldap.is_closed() {
                return Some(ldap);
            }
        }
        None
    }

    fn put(&self, key: PoolKey, ldap: Ldap) {
        let mut idle = self.idle.lock();
        let connections = idle.entry(key).or_default();
        if connections.len() < MAX_IDLE_PER_KEY {
            connections.push(ldap);
        }
        // dropping the last handle shuts the connection down
    }

    fn len(&self) -> usize {
        self.idle.lock().values().map(Vec::len).sum()
    }
}

// =========================================================================
// Error mapping
// =========================================================================

fn check_bind(rc: u32, text: &str) -> Result<()> {
    match rc {
        0 => Ok(()),
        RC_INVALID_CREDENTIALS => Err(Error::Authentication("invalid credentials".to_string())),
        rc => Err(Error::Authentication(format!("result code {}: {}", rc, text))),
    }
}

fn op_error(err: ldap3::LdapError, operation: &str) -> Error {
    match err {
        ldap3::LdapError::Timeout { .. } => Error::Timeout(operation.to_string()),
        ldap3::LdapError::LdapResult { result } => search_error(result.rc, &result.text, operation),
        other => Error::connectivity(format!("{} failed: {}", operation, other)),
    }
}

fn search_error(rc: u32, text: &str, operation: &str) -> Error {
    let message = format!("{} failed with result code {}: {}", operation, rc, text);
    match rc {
        RC_NO_SUCH_OBJECT | RC_REFERRAL => Error::NoSuchObject(message),
        _ => Error::Search(message),
    }
}

fn connect_error(err: ldap3::LdapError, params: &ConnectParams) -> Error {
    match err {
        ldap3::LdapError::Timeout { .. } => {
            Error::Timeout(format!("connecting to {}", params.url))
        }
        ldap3::LdapError::Io { source } if !params.start_tls || is_transport_failure(&source) => {
            Error::connectivity(format!("{}: {}", params.url, source))
        }
        other if params.start_tls => Error::tls(format!("{}: {}", params.url, other)),
        other => Error::connectivity(format!("{}: {}", params.url, other)),
    }
}

/// TLS failures surface as malformed or truncated data; anything else is the
/// transport underneath.
fn is_transport_failure(err: &io::Error) -> bool {
    !matches!(
        err.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
    )
}

/// Limits are sent as a non-negative protocol INTEGER.
fn protocol_limit(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn host_and_port(url: &str) -> Result<(String, u16)> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::config(format!("Invalid LDAP URL '{}': {}", url, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::config(format!("LDAP URL '{}' has no host", url)))?
        .to_string();
    let default_port = if parsed.scheme() == "ldaps" {
        636
    } else {
        ldaprealm_core::DEFAULT_LDAP_PORT
    };
    Ok((host, parsed.port().unwrap_or(default_port)))
}
