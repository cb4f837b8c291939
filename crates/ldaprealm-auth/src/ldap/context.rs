//! Directory context factory
//!
//! One factory per configured server. It turns a [`ServerConfig`] into
//! connection parameters and hands out [`DirContext`]s, each owned by a single
//! operation and closed by it.

use ldaprealm_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ldap::directory::{
    ConnectParams, DirectoryConnection, DirectoryConnector, EntryCursor, SearchRequest,
};
use crate::ldap::types::{Secret, ServerConfig};

/// An open, authenticated directory connection
///
/// `close` consumes the context, so it can be closed at most once.
pub struct DirContext {
    connection: Box<dyn DirectoryConnection>,
    url: String,
}

impl DirContext {
    /// URL of the server this context is connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) async fn search<'a>(
        &'a mut self,
        request: &SearchRequest,
    ) -> Result<Box<dyn EntryCursor + 'a>> {
        self.connection.search(request).await
    }

    pub async fn close(self) {
        self.connection.close().await;
    }
}

impl std::fmt::Debug for DirContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirContext").field("url", &self.url).finish()
    }
}

/// Builds bind and user contexts for one server
pub struct ContextFactory {
    config: Arc<ServerConfig>,
    connector: Arc<dyn DirectoryConnector>,
}

impl ContextFactory {
    pub fn new(config: Arc<ServerConfig>, connector: Arc<dyn DirectoryConnector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whether user binds use the login (SASL) rather than the entry DN
    pub fn is_sasl(&self) -> bool {
        self.config.authentication.is_sasl()
    }

    pub fn is_gssapi(&self) -> bool {
        self.config.authentication.is_gssapi()
    }

    /// Context bound with the service account, or anonymous when no bind DN
    /// is configured.
    pub async fn create_bind_context(&self) -> Result<DirContext> {
        let pooling = self.config.connection_pooling
            && !self.config.authentication.is_sasl()
            && !self.config.start_tls;
        self.create_context(
            self.config.bind_dn.clone(),
            self.config.bind_password.clone(),
            pooling,
        )
        .await
    }

    /// Context bound as an end user. Never pooled.
    pub async fn create_user_context(
        &self,
        principal: &str,
        credentials: &Secret,
    ) -> Result<DirContext> {
        self.create_context(Some(principal.to_string()), Some(credentials.clone()), false)
            .await
    }

    /// Opens and closes a bind context, logging the outcome.
    pub async fn test_connection(&self) -> Result<()> {
        if self.config.authentication.is_sasl() && self.config.bind_dn.is_none() {
            return Err(Error::config(format!(
                "When using SASL - property {}.bindDn is required",
                self.config.settings_prefix
            )));
        }

        match self.create_bind_context().await {
            Ok(context) => {
                info!("Test LDAP connection on {}: OK", context.url());
                context.close().await;
                Ok(())
            }
            Err(e) => {
                info!("Test LDAP connection on {}: FAIL", self.config.primary_url());
                match e {
                    Error::TlsNegotiation(_) => Err(e),
                    other => Err(Error::connectivity(format!(
                        "{}: {}",
                        self.config.primary_url(),
                        other
                    ))),
                }
            }
        }
    }

    async fn create_context(
        &self,
        principal: Option<String>,
        credentials: Option<Secret>,
        pooling: bool,
    ) -> Result<DirContext> {
        if self.config.urls.is_empty() {
            return Err(Error::config(format!(
                "No LDAP URL configured for {}",
                self.config.settings_prefix
            )));
        }

        let sasl_realm = self
            .config
            .sasl_realm
            .clone()
            .or_else(|| self.config.realm.clone());

        let mut last_error = None;
        for url in &self.config.urls {
            let params = ConnectParams {
                url: url.clone(),
                authentication: self.config.authentication.clone(),
                principal: principal.clone(),
                credentials: credentials.clone(),
                start_tls: self.config.start_tls,
                sasl_realm: sasl_realm.clone(),
                pooling,
                timeouts: self.config.timeouts,
            };
            debug!(
                url = %params.url,
                authentication = params.authentication.as_str(),
                principal = ?params.principal,
                realm = ?params.sasl_realm,
                "Initializing LDAP context"
            );

            match self.connector.connect(&params).await {
                Ok(connection) => {
                    return Ok(DirContext {
                        connection,
                        url: url.clone(),
                    })
                }
                Err(e) if e.is_connectivity() && !matches!(e, Error::TlsNegotiation(_)) => {
                    warn!("LDAP server {} is unreachable: {}", url, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::connectivity("no LDAP server reachable")))
    }
}
