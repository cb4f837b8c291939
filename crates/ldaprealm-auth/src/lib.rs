//! Directory authentication for ldaprealm

pub mod ldap;

pub use ldap::{
    Authenticator, GroupSet, GroupsProvider, LdapAutodiscovery, LdapRealm, RealmState,
    UserDetails, UsersProvider,
};
