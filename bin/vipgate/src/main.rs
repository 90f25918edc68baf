mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "vipgate")]
#[command(about = "Donation-checkout automation with a Telegram storefront", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway and bot (long-running daemon)
    Serve {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Run environment diagnostics
    Doctor,

    /// Run the checkout pipeline once and save the QR artifact
    Qr {
        /// Invoice id to embed in the donation marker (random when omitted)
        #[arg(short, long)]
        invoice: Option<String>,

        /// Donation amount in IDR
        #[arg(short, long, default_value_t = 25_000)]
        amount: i64,

        /// Output file (defaults to the media directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port, host } => {
            commands::serve::run(host, port).await?;
        }
        Commands::Doctor => {
            commands::doctor::run().await?;
        }
        Commands::Qr { invoice, amount, output } => {
            commands::qr::run(invoice, amount, output).await?;
        }
    }

    Ok(())
}
