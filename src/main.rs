//! Multi-timeframe signal validator - main entry point
//!
//! This binary provides two subcommands:
//! - validate: Detect a breakout for one symbol and validate it
//! - scan: Run detection and validation for several symbols concurrently

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "mtf-signal-validator")]
#[command(about = "Momentum setup detection with multi-timeframe validation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the latest breakout for one symbol
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/mtf_validation.json")]
        config: String,

        /// Symbol to validate, e.g. BTCUSDT
        #[arg(short, long)]
        symbol: String,

        /// Data source: "csv" or "binance" (overrides config file)
        #[arg(long)]
        source: Option<String>,

        /// Validate the latest close even without a confirmed breakout
        #[arg(long)]
        force: bool,
    },

    /// Scan several symbols concurrently
    Scan {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/mtf_validation.json")]
        config: String,

        /// Symbols to scan (comma-separated). E.g., "BTCUSDT,ETHUSDT,SOLUSDT"
        #[arg(short, long)]
        symbols: String,

        /// Data source: "csv" or "binance" (overrides config file)
        #[arg(long)]
        source: Option<String>,

        /// Validate the latest close even without a confirmed breakout
        #[arg(long)]
        force: bool,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy HTTP crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Log file: {}", log_path.display());
    Ok(())
}

fn main() -> Result<()> {
    // Missing .env is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Validate { .. } => "validate",
        Commands::Scan { .. } => "scan",
    };
    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Validate {
            config,
            symbol,
            source,
            force,
        } => commands::validate::run(config, symbol, source, force),

        Commands::Scan {
            config,
            symbols,
            source,
            force,
        } => commands::scan::run(config, symbols, source, force),
    }
}
