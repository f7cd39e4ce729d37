//! Scan command - run detection and validation for several symbols at once

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use mtf_signal_validator::{Symbol, Timeframe};

use super::{build_source, build_validator, evaluate_symbol, load_config, SymbolOutcome};

pub fn run(config_path: String, symbols: String, source: Option<String>, force: bool) -> Result<()> {
    let symbols: Vec<Symbol> = symbols
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| Symbol::new(s.to_uppercase()))
        .collect();
    anyhow::ensure!(!symbols.is_empty(), "No symbols given");

    info!("Scanning {} symbols", symbols.len());

    let config = Arc::new(load_config(&config_path, source)?);
    let source = build_source(&config)?;
    let validator = build_validator(&config, source.clone())?;

    let rt = tokio::runtime::Runtime::new()?;
    let outcomes = rt.block_on(async {
        let handles: Vec<_> = symbols
            .iter()
            .cloned()
            .map(|symbol| {
                let config = Arc::clone(&config);
                let source = Arc::clone(&source);
                let validator = validator.clone();
                tokio::spawn(async move {
                    let outcome =
                        evaluate_symbol(&config, source.as_ref(), &validator, &symbol, force).await;
                    (symbol, outcome)
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.context("Scan task panicked")?);
        }
        anyhow::Ok(outcomes)
    })?;

    println!("\n{}", "=".repeat(72));
    println!("MULTI-TIMEFRAME SCAN");
    println!("{}", "=".repeat(72));
    println!(
        "  {:<12} {:<10} {:>8} {:>8} {:>8}  {}",
        "Symbol", "Decision", "Score", "Daily", "Medium", "Pattern"
    );
    println!("{}", "-".repeat(72));

    let (mut passed, mut blocked, mut degraded, mut idle) = (0, 0, 0, 0);

    for (symbol, outcome) in &outcomes {
        match outcome {
            Ok(SymbolOutcome::NoPattern { .. }) => {
                idle += 1;
                println!("  {:<12} {:<10} {:>8} {:>8} {:>8}  none", symbol.as_str(), "-", "-", "-", "-");
            }
            Ok(SymbolOutcome::Validated { signal, result }) => {
                if result.is_degraded() {
                    degraded += 1;
                } else if result.passed {
                    passed += 1;
                } else {
                    blocked += 1;
                }
                let fmt_score = |tf| {
                    result
                        .score(tf)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "n/a".to_string())
                };
                let pattern = signal
                    .as_ref()
                    .map(|s| format!("q={:.1}", s.quality_score))
                    .unwrap_or_else(|| "forced".to_string());
                println!(
                    "  {:<12} {:<10} {:>8} {:>8} {:>8}  {}",
                    symbol.as_str(),
                    result.status.as_str(),
                    result.aggregate_score.to_string(),
                    fmt_score(Timeframe::Daily),
                    fmt_score(Timeframe::Medium),
                    pattern
                );
            }
            Err(e) => {
                error!("{}: {:#}", symbol, e);
                println!("  {:<12} ERROR      {:#}", symbol.as_str(), e);
            }
        }
    }

    let latency = validator.latency_summary();
    println!("{}", "-".repeat(72));
    println!(
        "  PASS: {}  BLOCK: {}  DEGRADED: {}  No pattern: {}",
        passed, blocked, degraded, idle
    );
    println!(
        "  Latency (ms): n={} p50={:.1} p95={:.1} p99={:.1} max={:.1}",
        latency.count, latency.p50_ms, latency.p95_ms, latency.p99_ms, latency.max_ms
    );
    if !latency.within_budget(config.latency.p95_budget_ms, config.latency.p99_budget_ms) {
        println!(
            "  ⚠ Latency above budget (P95 {}ms / P99 {}ms)",
            config.latency.p95_budget_ms, config.latency.p99_budget_ms
        );
    }
    println!("{}", "=".repeat(72));

    Ok(())
}
