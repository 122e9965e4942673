mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "selvedge")]
#[command(about = "Schema migration and backfill runner for the garment ERP database")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the full ordered migration sequence
    Migrate,

    /// Revert the sequence in reverse declaration order
    Rollback,

    /// Show which steps are already satisfied, without changing anything
    Status {
        /// Emit machine-readable JSON instead of status lines
        #[arg(long)]
        json: bool,
    },

    /// Insert baseline rows; refuses while the schema is not fully migrated
    Seed,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Migrate => commands::migrate::run().await,
        Commands::Rollback => commands::migrate::rollback().await,
        Commands::Status { json } => commands::status::run(json).await,
        Commands::Seed => commands::seed::run().await,
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
