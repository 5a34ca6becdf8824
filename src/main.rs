use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webhook_client::blob::FsBlobStore;
use webhook_client::http_server::{self, ServerState};
use webhook_client::prune::Pruner;
use webhook_client::store::FileRecordStore;
use webhook_client::ClientConfig;

#[derive(Parser)]
#[command(name = "webhook-client", version, about = "Receive and store webhook calls")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "webhook-client.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept webhooks over HTTP
    Serve,
    /// Delete calls older than `delete_after_days`
    Prune,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load(&cli.config)?;

    match cli.command {
        Command::Serve => {
            let records = FileRecordStore::open(config.records_dir())?;
            let blobs = FsBlobStore::new(config.blobs_dir());
            tracing::info!(calls = records.len(), "opened record store");
            http_server::serve(ServerState::new(config, records, blobs)).await?;
        }
        Command::Prune => {
            // Validate before touching storage.
            let pruner = Pruner::new(config.retention()?);
            let mut records = FileRecordStore::open(config.records_dir())?;
            let deleted = pruner.prune(&mut records, Utc::now())?;
            println!("pruned {deleted} webhook call(s)");
        }
    }

    Ok(())
}
