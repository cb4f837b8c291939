//! CLI command implementations

pub mod auth;
pub mod discover;
pub mod groups;
pub mod user;

use crate::OutputFormat;
use anyhow::{Context, Result};
use ldaprealm_auth::LdapRealm;
use ldaprealm_core::Settings;

/// Context passed to all commands
pub struct CommandContext {
    pub settings: Settings,
    pub output_format: OutputFormat,
    pub verbose: bool,
}

impl CommandContext {
    /// Check if output should be JSON
    pub fn is_json(&self) -> bool {
        matches!(self.output_format, OutputFormat::Json)
    }

    /// Print verbose message if verbose mode
    pub fn debug(&self, msg: &str) {
        if self.verbose {
            eprintln!("[DEBUG] {}", msg);
        }
    }

    /// Initialized realm for the loaded settings
    pub async fn realm(&self) -> Result<LdapRealm> {
        self.debug(&format!("Initializing LDAP realm from {} settings", self.settings.len()));
        let mut realm = LdapRealm::new(self.settings.clone());
        realm
            .init()
            .await
            .context("Unable to initialize the LDAP realm")?;
        Ok(realm)
    }
}
