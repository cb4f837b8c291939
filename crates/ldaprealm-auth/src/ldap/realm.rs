//! LDAP realm
//!
//! The realm is initialized once from settings, then exposes up to three
//! capabilities to the host application. Each capability walks the configured
//! servers in order and stops at the first one that knows the user.

use async_trait::async_trait;
use ldaprealm_core::{Error, Result, Settings, REALM_NAME};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::ldap::autodiscovery::LdapAutodiscovery;
use crate::ldap::client::Ldap3Connector;
use crate::ldap::directory::DirectoryConnector;
use crate::ldap::settings::{LdapSettingsManager, ServerBundle};
use crate::ldap::types::{Entry, GroupSet, Secret, UserDetails};

/// Checks a login and password against the directory
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(false)` for unknown users and wrong passwords.
    async fn authenticate(&self, login: &str, password: &str) -> Result<bool>;
}

#[async_trait]
pub trait UsersProvider: Send + Sync {
    async fn fetch_user_details(&self, login: &str) -> Result<UserDetails>;
}

#[async_trait]
pub trait GroupsProvider: Send + Sync {
    async fn fetch_groups(&self, login: &str) -> Result<GroupSet>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealmState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Result of trying one server during authentication
#[derive(Debug)]
enum AuthOutcome {
    Authenticated,
    UserNotFound,
    CredentialsRejected,
    Unavailable(Error),
}

type Servers = Arc<Vec<ServerBundle>>;

pub struct LdapRealm {
    settings: Settings,
    connector: Arc<dyn DirectoryConnector>,
    autodiscovery: Option<LdapAutodiscovery>,
    state: RealmState,
    authenticator: Option<Arc<LdapAuthenticator>>,
    users_provider: Option<Arc<LdapUsersProvider>>,
    groups_provider: Option<Arc<LdapGroupsProvider>>,
}

impl LdapRealm {
    /// Realm backed by `ldap3` and the system DNS resolver
    pub fn new(settings: Settings) -> Self {
        Self::with_connector(settings, Arc::new(Ldap3Connector::new()), LdapAutodiscovery::system())
    }

    pub fn with_connector(
        settings: Settings,
        connector: Arc<dyn DirectoryConnector>,
        autodiscovery: LdapAutodiscovery,
    ) -> Self {
        Self {
            settings,
            connector,
            autodiscovery: Some(autodiscovery),
            state: RealmState::Uninitialized,
            authenticator: None,
            users_provider: None,
            groups_provider: None,
        }
    }

    pub fn name(&self) -> &'static str {
        REALM_NAME
    }

    pub fn state(&self) -> RealmState {
        self.state
    }

    /// Builds the server bundles and tests every connection.
    ///
    /// A failed realm stays failed; calling `init` on a ready realm is a no-op.
    pub async fn init(&mut self) -> Result<()> {
        match self.state {
            RealmState::Ready => return Ok(()),
            RealmState::Failed | RealmState::Initializing => {
                return Err(Error::config("LDAP realm failed to initialize"))
            }
            RealmState::Uninitialized => {}
        }

        self.state = RealmState::Initializing;
        match self.build().await {
            Ok(servers) => {
                let servers: Servers = Arc::new(servers);
                let has_groups = servers.iter().any(|s| s.group_mapping.is_some());

                self.authenticator = Some(Arc::new(LdapAuthenticator { servers: servers.clone() }));
                self.users_provider = Some(Arc::new(LdapUsersProvider { servers: servers.clone() }));
                self.groups_provider = has_groups.then(|| Arc::new(LdapGroupsProvider { servers }));
                self.state = RealmState::Ready;
                info!("LDAP realm initialized");
                Ok(())
            }
            Err(e) => {
                error!("LDAP realm failed to initialize: {}", e);
                self.state = RealmState::Failed;
                Err(e)
            }
        }
    }

    async fn build(&mut self) -> Result<Vec<ServerBundle>> {
        let autodiscovery = self
            .autodiscovery
            .take()
            .ok_or_else(|| Error::config("LDAP realm failed to initialize"))?;
        let manager =
            LdapSettingsManager::new(self.settings.clone(), self.connector.clone(), autodiscovery);

        let servers = manager.server_bundles().await?;
        for server in &servers {
            server.context_factory.test_connection().await?;
        }
        Ok(servers)
    }

    pub fn authenticator(&self) -> Option<Arc<dyn Authenticator>> {
        self.ready()?;
        self.authenticator
            .clone()
            .map(|a| a as Arc<dyn Authenticator>)
    }

    pub fn users_provider(&self) -> Option<Arc<dyn UsersProvider>> {
        self.ready()?;
        self.users_provider
            .clone()
            .map(|p| p as Arc<dyn UsersProvider>)
    }

    /// Only present when at least one server has a group mapping.
    pub fn groups_provider(&self) -> Option<Arc<dyn GroupsProvider>> {
        self.ready()?;
        self.groups_provider
            .clone()
            .map(|p| p as Arc<dyn GroupsProvider>)
    }

    fn ready(&self) -> Option<()> {
        (self.state == RealmState::Ready).then_some(())
    }
}

/// Looks up the entry of `login` with the server's bind context.
async fn find_user(server: &ServerBundle, login: &str) -> Result<Option<Entry>> {
    let mut context = server.context_factory.create_bind_context().await?;
    let result = server
        .user_mapping
        .create_search(login)
        .limits(server.config.limits)
        .find_unique(&mut context)
        .await;
    context.close().await;
    result
}

pub struct LdapAuthenticator {
    servers: Servers,
}

impl LdapAuthenticator {
    async fn authenticate_on(&self, server: &ServerBundle, login: &str, password: &Secret) -> AuthOutcome {
        let entry = match find_user(server, login).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return AuthOutcome::UserNotFound,
            Err(e) => return AuthOutcome::Unavailable(e),
        };

        let principal = if server.context_factory.is_sasl() {
            login
        } else {
            entry.dn.as_str()
        };

        match server.context_factory.create_user_context(principal, password).await {
            Ok(context) => {
                context.close().await;
                AuthOutcome::Authenticated
            }
            Err(Error::Authentication(_)) => AuthOutcome::CredentialsRejected,
            Err(e) => AuthOutcome::Unavailable(e),
        }
    }
}

#[async_trait]
impl Authenticator for LdapAuthenticator {
    async fn authenticate(&self, login: &str, password: &str) -> Result<bool> {
        if password.is_empty() {
            debug!("Password is blank, user {} is not authenticated", login);
            return Ok(false);
        }
        let password = Secret::new(password);

        let mut last_error = None;
        let mut reached = false;
        for server in self.servers.iter() {
            match self.authenticate_on(server, login, &password).await {
                AuthOutcome::Authenticated => {
                    debug!("User {} successfully authenticated on server {}", login, server.key());
                    return Ok(true);
                }
                AuthOutcome::UserNotFound => {
                    reached = true;
                    debug!("User {} not found in server {}", login, server.key());
                }
                AuthOutcome::CredentialsRejected => {
                    reached = true;
                    debug!("Password not valid for user {} in server {}", login, server.key());
                }
                AuthOutcome::Unavailable(e) => {
                    warn!("Unable to authenticate user {} on server {}: {}", login, server.key(), e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !reached => Err(Error::connectivity(format!(
                "Unable to authenticate user {}: {}",
                login, e
            ))),
            _ => Ok(false),
        }
    }
}

pub struct LdapUsersProvider {
    servers: Servers,
}

#[async_trait]
impl UsersProvider for LdapUsersProvider {
    async fn fetch_user_details(&self, login: &str) -> Result<UserDetails> {
        let mut last_error = None;
        for server in self.servers.iter() {
            match find_user(server, login).await {
                Ok(Some(entry)) => {
                    let mapping = &server.user_mapping;
                    return Ok(UserDetails {
                        name: entry.first(mapping.real_name_attribute()).map(str::to_string),
                        email: entry.first(mapping.email_attribute()).map(str::to_string),
                    });
                }
                Ok(None) => debug!("User {} not found in server {}", login, server.key()),
                Err(e) => {
                    warn!("Unable to retrieve details for user {} on server {}: {}", login, server.key(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => Error::retrieval(login, e),
            None => Error::not_found(login),
        })
    }
}

pub struct LdapGroupsProvider {
    servers: Servers,
}

impl LdapGroupsProvider {
    async fn groups_on(&self, server: &ServerBundle, login: &str) -> Result<Option<GroupSet>> {
        let Some(mapping) = &server.group_mapping else {
            return Ok(None);
        };

        let mut context = server.context_factory.create_bind_context().await?;
        let result: Result<Option<GroupSet>> = async {
            let user = server
                .user_mapping
                .create_search(login)
                .limits(server.config.limits)
                .find_unique(&mut context)
                .await?;
            match user {
                Some(user) => mapping
                    .resolve(&mut context, login, &user, server.config.limits)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        }
        .await;
        context.close().await;
        result
    }
}

#[async_trait]
impl GroupsProvider for LdapGroupsProvider {
    async fn fetch_groups(&self, login: &str) -> Result<GroupSet> {
        let mut last_error = None;
        for server in self.servers.iter() {
            match self.groups_on(server, login).await {
                Ok(Some(groups)) => return Ok(groups),
                Ok(None) => debug!("User {} not found in server {}", login, server.key()),
                Err(e) => {
                    warn!("Unable to retrieve groups for user {} on server {}: {}", login, server.key(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => Error::retrieval(login, e),
            None => Error::not_found(login),
        })
    }
}
