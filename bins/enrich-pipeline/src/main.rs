mod cmd;

use clap::{Parser, Subcommand};
use cmd::config::{ProduceArgs, WorkerArgs};

#[derive(Parser)]
#[command(name = "enrich-pipeline", about = "User enrichment stream processor")]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(long, default_value = "config.toml", env = "ENRICH_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the enrichment agents until Ctrl+C.
    Worker(WorkerArgs),
    /// Publish one user record to the source topic and exit.
    Produce(ProduceArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = match &cli.command {
        Command::Worker(args) => args.loglevel.as_str(),
        Command::Produce(_) => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()),
        )
        .init();

    let config = match cmd::config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(config = %cli.config, error = %e, "failed to load config");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Worker(_) => cmd::worker::run(&config).await,
        Command::Produce(args) => cmd::produce::run(&config, &args).await.map(|_| ()),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "enrich-pipeline failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
