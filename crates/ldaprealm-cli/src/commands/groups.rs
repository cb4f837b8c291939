//! groups command - resolve group memberships of a user

use super::CommandContext;
use anyhow::{anyhow, Result};
use colored::Colorize;

pub async fn execute(ctx: &CommandContext, login: &str) -> Result<()> {
    let realm = ctx.realm().await?;
    let provider = realm
        .groups_provider()
        .ok_or_else(|| anyhow!("No group mapping configured (set ldap.group.baseDn or ldap.group.memberOfAttribute)"))?;

    let groups = provider.fetch_groups(login).await?;

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&groups)?);
    } else if groups.is_empty() {
        println!("{} belongs to no group", login.cyan());
    } else {
        println!("{} ({})", login.blue().bold(), groups.len());
        for group in groups.iter() {
            println!("  - {}", group);
        }
    }
    Ok(())
}
