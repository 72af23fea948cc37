use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use offersync::pipeline::{self, AppConfig, Outcome};

#[derive(Parser)]
#[command(name = "osync", about = "Seller reconciliation jobs", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Windowed customer-payment metrics per offer
    Orders,
    /// Sheet/marketplace/inventory price reconciliation
    Prices {
        /// Push changed sheet prices to the marketplace (overrides PUSH_PRICES)
        #[arg(long)]
        push: bool,
    },
    /// Daily delivery-tariff shares from the seller portal
    Delivery,
}

#[tokio::main]
async fn main() -> Result<()> {
    offersync::util::env::init_env();
    offersync::tracing::init_tracing("info,offersync=info")?;

    let cli = Cli::parse();
    let mut cfg = AppConfig::from_env()?;

    let outcome = match cli.command {
        Command::Orders => pipeline::orders::run(&cfg).await,
        Command::Prices { push } => {
            if push {
                cfg.push_prices = true;
            }
            pipeline::prices::run(&cfg).await
        }
        Command::Delivery => pipeline::delivery::run(&cfg).await,
    };

    match outcome {
        Ok(outcome @ Outcome::Completed { .. }) => {
            info!(%outcome, "job finished");
            Ok(())
        }
        Ok(outcome) => {
            // distinct but non-fatal: nothing aggregated or lock held
            info!(%outcome, "job finished without writing");
            Ok(())
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "job failed");
            Err(err)
        }
    }
}
