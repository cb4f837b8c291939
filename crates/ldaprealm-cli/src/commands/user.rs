//! user command - display name and email of a user

use super::CommandContext;
use anyhow::{anyhow, Result};
use colored::Colorize;

pub async fn execute(ctx: &CommandContext, login: &str) -> Result<()> {
    let realm = ctx.realm().await?;
    let users = realm
        .users_provider()
        .ok_or_else(|| anyhow!("LDAP realm is not ready"))?;

    let details = users.fetch_user_details(login).await?;

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&details)?);
    } else {
        println!("{}", login.blue().bold());
        println!("  {}: {}", "Name".cyan(), details.name.as_deref().unwrap_or("(not set)"));
        println!("  {}: {}", "Email".cyan(), details.email.as_deref().unwrap_or("(not set)"));
    }
    Ok(())
}
