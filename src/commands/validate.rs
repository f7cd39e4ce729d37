//! Validate command - detect a breakout for one symbol and validate it

use anyhow::Result;
use tracing::info;

use mtf_signal_validator::Symbol;

use super::{build_source, build_validator, evaluate_symbol, load_config, print_result, SymbolOutcome};

pub fn run(
    config_path: String,
    symbol: String,
    source: Option<String>,
    force: bool,
) -> Result<()> {
    info!("Starting validation for {}", symbol);

    let config = load_config(&config_path, source)?;
    let source = build_source(&config)?;
    let validator = build_validator(&config, source.clone())?;
    let symbol = Symbol::new(symbol.trim().to_uppercase());

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(evaluate_symbol(
        &config,
        source.as_ref(),
        &validator,
        &symbol,
        force,
    ))?;

    println!("\n{}", "=".repeat(60));
    println!("MULTI-TIMEFRAME VALIDATION: {}", symbol);
    println!("{}", "=".repeat(60));

    match outcome {
        SymbolOutcome::NoPattern { bars } => {
            println!("  No breakout on the latest of {} fast bars", bars);
            println!("  Use --force to validate the latest close anyway");
        }
        SymbolOutcome::Validated { signal, result } => {
            match &signal {
                Some(signal) => {
                    println!("  Breakout:        {}", signal.breakout_time);
                    println!("  Breakout price:  {:.4}", signal.breakout_price);
                    println!("  Pattern quality: {:.1}", signal.quality_score);
                }
                None => println!("  Forced validation (no confirmed breakout)"),
            }
            println!("{}", "-".repeat(60));
            print_result(&result);
        }
    }

    println!("{}", "=".repeat(60));
    Ok(())
}
