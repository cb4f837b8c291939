//! ldaprealm - LDAP realm diagnostics
//!
//! Checks a directory configuration the same way the host application uses
//! it: connection test, authentication, user details and group resolution.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use commands::CommandContext;
use ldaprealm_core::Settings;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ldaprealm")]
#[command(author = "ldaprealm Team")]
#[command(version = ldaprealm_core::VERSION)]
#[command(about = "LDAP / Active Directory realm diagnostics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (.toml or .properties)
    #[arg(short, long, global = true, env = "LDAPREALM_CONFIG")]
    config: Option<String>,

    /// Override a setting, e.g. -D ldap.url=ldap://localhost:389
    #[arg(short = 'D', long = "set", global = true, value_name = "KEY=VALUE", value_parser = parse_key_value)]
    overrides: Vec<(String, String)>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Print progress details
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LDAPREALM_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Test the connection to every configured server
    Test,

    /// Authenticate a user
    Auth {
        /// Login
        login: String,

        /// Password; read from standard input when absent
        #[arg(long, env = "LDAPREALM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Show the name and email of a user
    User {
        /// Login
        login: String,
    },

    /// Show the groups of a user
    Groups {
        /// Login
        login: String,
    },

    /// Resolve directory servers and base DN of a DNS realm
    Discover {
        /// DNS realm, e.g. example.org
        realm: String,
    },

    /// Show version information
    Version,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ctx = CommandContext {
        settings: load_settings(cli.config.as_deref(), cli.overrides)?,
        output_format: cli.output,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Test => commands::test::execute(&ctx).await,
        Commands::Auth { login, password } => {
            commands::auth::execute(&ctx, &login, password).await
        }
        Commands::User { login } => commands::user::execute(&ctx, &login).await,
        Commands::Groups { login } => commands::groups::execute(&ctx, &login).await,
        Commands::Discover { realm } => commands::discover::execute(&ctx, &realm).await,
        Commands::Version => {
            println!("ldaprealm {}", ldaprealm_core::VERSION);
            Ok(())
        }
    }
}

fn load_settings(path: Option<&str>, overrides: Vec<(String, String)>) -> Result<Settings> {
    let mut settings = match path {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path))?,
        None => Settings::new(),
    };
    for (key, value) in overrides {
        settings.insert(key, value);
    }
    debug!(path = ?path, properties = settings.len(), "Loaded settings");
    Ok(settings)
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    Ok((key.trim().to_string(), value.to_string()))
}
