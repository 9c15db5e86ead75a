use anyhow::Result;
use clap::{Parser, Subcommand};
use juris_sync::SyncConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "juris-cli")]
#[command(about = "Juris reporting-store sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync pass against the reporting database.
    Sync,
    /// Print the resolved configuration (password redacted).
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = juris_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: run_id={} clients={}+{} cases={}+{} contracts={}+{} (inserted+skipped)",
                summary.run_id,
                summary.clients.inserted,
                summary.clients.skipped,
                summary.cases.inserted,
                summary.cases.skipped,
                summary.contracts.inserted,
                summary.contracts.skipped,
            );
        }
        Commands::Config => {
            let config = SyncConfig::from_env();
            println!("graphql_url = {}", config.graphql_url);
            println!("db_host     = {}", config.db_host);
            println!("db_port     = {}", config.db_port);
            println!("db_name     = {}", config.db_name);
            println!("db_user     = {}", config.db_user);
            println!("db_password = <redacted>");
            println!("http_timeout_secs = {}", config.http_timeout_secs);
        }
    }

    Ok(())
}
