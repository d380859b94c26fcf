use anyhow::{Context, Result};
use bt_compare::config::Config;
use bt_compare::data::get_historical_data;
use bt_compare::runner;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "bt-compare")]
#[command(about = "Backtesting engines comparison on an SMA cross strategy")]
struct Cli {
    /// Download candles from the exchange instead of reading the cache
    #[arg(long)]
    download: bool,

    /// Run a parameter search with this many trials instead of a single bar backtest
    #[arg(long = "optimize-bt-simple", default_value_t = 0)]
    optimize_bt_simple: usize,

    /// Config file (defaults to config/default.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_logging(config: &Config) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let file_layer = match config.log_file() {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config)?;

    info!("Fetching data; download={}", cli.download);
    let table = match get_historical_data(&config, cli.download).await {
        Ok(table) => table,
        Err(e) => {
            error!("An error occurred while fetching data: {:#}", e);
            return Ok(());
        }
    };

    if table.is_empty() {
        warn!("No candles in the requested window; nothing to backtest");
        return Ok(());
    }

    runner::run(&config, &table, cli.optimize_bt_simple)
}
