mod config;
mod server;

use clap::{Parser, Subcommand};
use config::Config;
use server::{build_orchestrator, clean_once, run_server};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "partio")]
#[command(about = "Multipart uploads spread across independent storage backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Remove uploads left in progress past the dangling TTL, then exit
    Clean {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "partio_server=info,partio_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            tracing::info!("Starting Partio server with config: {}", config);

            let cfg = load_config(&config);

            tracing::info!(
                "Bind: {}, Backends: {}, Parts per upload: {}",
                cfg.bind_addr,
                cfg.content.backends.len(),
                cfg.upload.part_count
            );

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Clean { config } => {
            let cfg = load_config(&config);

            let orchestrator = match build_orchestrator(&cfg) {
                Ok(orchestrator) => orchestrator,
                Err(e) => {
                    tracing::error!("Failed to initialize: {}", e);
                    std::process::exit(1);
                }
            };

            if let Err(e) = clean_once(&orchestrator).await {
                tracing::error!("Cleanup failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn load_config(path: &str) -> Config {
    match Config::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}
