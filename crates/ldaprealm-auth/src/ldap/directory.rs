//! Directory client seam
//!
//! The context factory decides *how* to connect (URL, bind identity, TLS,
//! pooling); a [`DirectoryConnector`] performs the connection. The production
//! connector is [`Ldap3Connector`](super::client::Ldap3Connector).

use async_trait::async_trait;
use ldaprealm_core::Result;
use std::fmt;

use crate::ldap::types::{Authentication, Entry, SearchLimits, Secret, Timeouts};

/// Search scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    Base,
    OneLevel,
    #[default]
    Subtree,
}

/// Everything a connector needs to open one authenticated connection
#[derive(Clone)]
pub struct ConnectParams {
    pub url: String,
    pub authentication: Authentication,
    /// `None` binds anonymously
    pub principal: Option<String>,
    pub credentials: Option<Secret>,
    pub start_tls: bool,
    pub sasl_realm: Option<String>,
    /// The connector may hand out and take back idle connections
    pub pooling: bool,
    pub timeouts: Timeouts,
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // credentials intentionally left out
        f.debug_struct("ConnectParams")
            .field("url", &self.url)
            .field("authentication", &self.authentication.as_str())
            .field("principal", &self.principal)
            .field("start_tls", &self.start_tls)
            .field("sasl_realm", &self.sasl_realm)
            .field("pooling", &self.pooling)
            .finish()
    }
}

/// A fully substituted search
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: Scope,
    pub filter: String,
    /// Empty means "all user attributes"
    pub attributes: Vec<String>,
    pub limits: SearchLimits,
}

#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    /// Opens and binds a connection.
    ///
    /// Errors: `Connectivity` when the server cannot be reached,
    /// `TlsNegotiation` when StartTLS fails, `Authentication` when the bind
    /// is rejected, `Configuration` for unsupported mechanisms.
    async fn connect(&self, params: &ConnectParams) -> Result<Box<dyn DirectoryConnection>>;
}

#[async_trait]
pub trait DirectoryConnection: Send {
    /// Starts a search. The cursor borrows the connection, so the connection
    /// cannot be closed while results are still being read.
    async fn search<'a>(
        &'a mut self,
        request: &SearchRequest,
    ) -> Result<Box<dyn EntryCursor + 'a>>;

    /// Unbinds (or returns the connection to its pool).
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait EntryCursor: Send {
    /// Next entry, `None` once the search is complete.
    async fn next_entry(&mut self) -> Result<Option<Entry>>;

    /// Stops the search on the server side.
    async fn abandon(&mut self);
}
