use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pagesmith::server::{ServerConfig, start_server};
use pagesmith::settings::Settings;
use pagesmith::store::Store;

#[derive(Parser)]
#[command(name = "pagesmith")]
#[command(version, about = "LLM-powered web app generation and deployment orchestrator")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the round orchestration server
    Serve {
        /// Override the PORT environment variable
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long, default_value = "pagesmith.db")]
        db_path: PathBuf,
    },
    /// Create the database schema and exit
    InitDb {
        #[arg(long, default_value = "pagesmith.db")]
        db_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "pagesmith=debug" } else { "pagesmith=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Commands::Serve { port, db_path } => {
            let mut settings = Settings::from_env()?;
            if let Some(port) = port {
                settings.port = port;
            }
            start_server(ServerConfig { db_path, settings }).await
        }
        Commands::InitDb { db_path } => {
            Store::new(&db_path)?;
            tracing::info!(path = %db_path.display(), "database initialized");
            Ok(())
        }
    }
}
