//! auth command - authenticate a login

use super::CommandContext;
use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Serialize)]
struct AuthResult<'a> {
    login: &'a str,
    authenticated: bool,
}

pub async fn execute(ctx: &CommandContext, login: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };

    let realm = ctx.realm().await?;
    let authenticator = realm
        .authenticator()
        .ok_or_else(|| anyhow!("LDAP realm is not ready"))?;

    let authenticated = authenticator.authenticate(login, &password).await?;

    if ctx.is_json() {
        let result = AuthResult { login, authenticated };
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if authenticated {
        println!("{} {}", "Authenticated".green().bold(), login.cyan());
    } else {
        println!("{} {}", "Rejected".red().bold(), login.cyan());
    }

    if !authenticated {
        bail!("Authentication failed for user {}", login);
    }
    Ok(())
}

fn read_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .context("Failed to read password from standard input")?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}
