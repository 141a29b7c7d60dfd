// src/lib.rs
//! SimOpt Engine Library
//!
//! This library provides the core components for running black-box
//! simulation-optimization sessions: many independent external simulation
//! processes executed in parallel, each scored through a configurable
//! weighted/constrained cost function.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **runtime**: single-run process lifecycle, port leasing, process
//!   trees, run results
//! - **pool**: bounded-parallelism dispatch, retry rounds, shared counters
//! - **cost**: the weighted, norm-aggregated, constraint-adjusted cost
//!   model
//! - **optimization**: session configuration and parameter mapping
//! - **evaluation**: the external evaluation collaborator contract
//! - **observability**: tracing and logging setup
//! - **utils**: errors and host-level engine configuration

// Public module exports
pub mod cost;
pub mod evaluation;
pub mod observability;
pub mod optimization;
pub mod pool;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use cost::{Constraint, CostFunction, CostNorm, KpiSet};
pub use evaluation::{EvaluationFactory, Evaluator};
pub use optimization::{OptimizationConfig, ParamValue, TaskEvalPolicy};
pub use pool::{CounterSnapshot, SimulationPool};
pub use runtime::{PortLeaseManager, RunResult, RunStatus, SimulationRunner, TaskDescriptor};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = BuildInfo::current();
        assert!(!info.version.is_empty());
    }
}
