//! discover command - DNS SRV autodiscovery for a realm

use super::CommandContext;
use anyhow::Result;
use colored::Colorize;
use ldaprealm_auth::LdapAutodiscovery;
use serde::Serialize;

#[derive(Serialize)]
struct Discovery {
    realm: String,
    base_dn: String,
    servers: Vec<String>,
}

pub async fn execute(ctx: &CommandContext, realm: &str) -> Result<()> {
    ctx.debug(&format!("Looking up _ldap._tcp.{}", realm));
    let servers = LdapAutodiscovery::system().ldap_servers(realm).await;
    let discovery = Discovery {
        realm: realm.to_string(),
        base_dn: LdapAutodiscovery::dns_domain_dn(realm),
        servers,
    };

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&discovery)?);
    } else {
        println!("{}", discovery.realm.blue().bold());
        println!("  {}: {}", "Base DN".cyan(), discovery.base_dn);
        if discovery.servers.is_empty() {
            println!("  {}: (no SRV records)", "Servers".cyan());
        } else {
            println!("  {}:", "Servers".cyan());
            for server in &discovery.servers {
                println!("    - {}", server);
            }
        }
    }
    Ok(())
}
