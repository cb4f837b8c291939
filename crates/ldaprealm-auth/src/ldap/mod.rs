//! LDAP/Active Directory realm
//!
//! Provides directory authentication via:
//! - LDAP (OpenLDAP, ApacheDS, 389 Directory Server)
//! - Microsoft Active Directory
//!
//! Features:
//! - Simple, SASL and StartTLS binds
//! - Server autodiscovery through DNS SRV records
//! - Several servers tried in order
//! - Nested group resolution

mod autodiscovery;
mod client;
mod context;
mod directory;
mod group_mapping;
mod realm;
mod search;
mod settings;
mod types;
mod user_mapping;

#[cfg(test)]
pub(crate) mod testing;

pub use autodiscovery::{HickorySrvResolver, LdapAutodiscovery, SrvRecord, SrvResolver};
pub use client::Ldap3Connector;
pub use context::{ContextFactory, DirContext};
pub use directory::{
    ConnectParams, DirectoryConnection, DirectoryConnector, EntryCursor, Scope, SearchRequest,
};
pub use group_mapping::{rdn_value, LdapGroupMapping};
pub use realm::{
    Authenticator, GroupsProvider, LdapAuthenticator, LdapGroupsProvider, LdapRealm,
    LdapUsersProvider, RealmState, UsersProvider,
};
pub use search::{escape_filter_value, substitute, LdapSearch, SearchResults};
pub use settings::{LdapSettingsManager, ServerBundle};
pub use types::*;
pub use user_mapping::LdapUserMapping;
