// src/main.rs
//! SimOpt Engine
//!
//! Runs one optimization batch: loads the optimization config, dispatches
//! every task across the worker pool, and prints the aggregated cost.
//! External parameter arguments are passed as `name=value` pairs after the
//! config path:
//!
//! ```text
//! simopt-engine optimization.yaml x0=0.25 x1=1.5
//! ```

use anyhow::{bail, Context, Result};
use simopt_engine::evaluation::YamlEvaluationFactory;
use simopt_engine::observability::init_tracing;
use simopt_engine::{EngineConfig, OptimizationConfig, SimulationPool, VERSION};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .context("usage: simopt-engine <optimization-config.yaml> [name=value ...]")?;
    let params = parse_param_args(args)?;

    let opt_config = OptimizationConfig::from_file(&config_path)?;
    init_tracing(opt_config.log_filename.as_deref())?;

    info!("Starting SimOpt Engine v{}", VERSION);

    let engine_config = EngineConfig::load()?;
    let overrides = opt_config.build_params(&params)?;

    let pool = Arc::new(SimulationPool::new(
        engine_config,
        opt_config,
        Arc::new(YamlEvaluationFactory),
    ));

    // Graceful shutdown: the first interrupt cancels every worker and
    // kills all running process trees
    let cancel = pool.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling all simulations...");
            cancel.cancel();
        }
    });

    let (results, failed_tasks) = pool.run_all(&overrides).await?;

    let snapshot = pool.counters();
    info!(
        total_runs = snapshot.total_runs,
        successes = snapshot.successes,
        crashes = snapshot.crashes,
        "optimization batch finished"
    );
    info!(cost = pool.total_cost(&results), "aggregated cost");

    if !failed_tasks.is_empty() {
        for task in &failed_tasks {
            error!(task, "task remained crashed after all retries");
        }
        bail!("{} task(s) crashed", failed_tasks.len());
    }
    Ok(())
}

/// Parse trailing `name=value` arguments into the external parameter set
fn parse_param_args(args: impl Iterator<Item = String>) -> Result<BTreeMap<String, f64>> {
    let mut params = BTreeMap::new();
    for arg in args {
        let (name, value) = arg
            .split_once('=')
            .with_context(|| format!("expected name=value argument, got <{arg}>"))?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("parameter <{name}> has non-numeric value <{value}>"))?;
        params.insert(name.to_string(), value);
    }
    Ok(params)
}
