//! # Forge Dispatch Main Entry Point
//!
//! Serves the intake API by default; `migrate`, `process` and `approve` are
//! operator shortcuts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forge_dispatch::{
    allowlist::Allowlist,
    config::ConfigLoader,
    context::ServiceContext,
    db,
    events::Event,
    migration::{Migrator, MigratorTrait},
    orchestrator::JobOrchestrator,
    server::run_server,
    telemetry,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "forge-dispatch", version, about = "CI job dispatch for forge events")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run migrations, then start the worker and HTTP server
    Serve,
    /// Apply pending migrations and exit
    Migrate,
    /// Process one serialized event inline and print the results
    Process {
        /// Path to the event JSON
        file: PathBuf,
    },
    /// Approve a forge account (user or organization) for the service
    Approve {
        account: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config)?;
    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let pool = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            Migrator::up(&pool, None).await.context("running migrations")?;
            run_server(config, pool).await
        }
        Command::Migrate => {
            Migrator::up(&pool, None).await.context("running migrations")?;
            info!("Migrations applied");
            Ok(())
        }
        Command::Process { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let event: Event = serde_json::from_str(&raw).context("parsing event JSON")?;
            let ctx = ServiceContext::from_config(Arc::new(config), Arc::new(pool))?;
            let results = JobOrchestrator::new(Arc::new(ctx)).process(event).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }
        Command::Approve { account } => {
            Migrator::up(&pool, None).await.context("running migrations")?;
            if Allowlist::new(Arc::new(pool)).approve(&account).await? {
                println!("Account {account} approved");
            } else {
                println!("Account {account} was already approved");
            }
            Ok(())
        }
    }
}
