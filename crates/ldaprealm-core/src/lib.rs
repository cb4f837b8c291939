//! ldaprealm Core Library
//!
//! Error taxonomy, raw settings and shared constants for the ldaprealm
//! directory authentication layer.

pub mod config;
pub mod error;

pub use config::Settings;
pub use error::{Error, Result};

/// ldaprealm version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Settings prefix used when no explicit prefix is configured
pub const DEFAULT_SETTINGS_PREFIX: &str = "ldap";

/// Name under which the realm registers with the host application
pub const REALM_NAME: &str = "LDAP";

/// Default LDAP port
pub const DEFAULT_LDAP_PORT: u16 = 389;
