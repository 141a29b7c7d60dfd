// src/pool/mod.rs
//! Parallel worker pool
//!
//! The bounded-concurrency dispatcher that runs many task descriptors and
//! reconciles their outcomes:
//!
//! - **Simulation Pool**: fan-out, serialized evaluation, bounded retry
//!   rounds, cooperative cancellation
//! - **Counters**: pool-wide success/crash statistics with linearizable
//!   updates
//!
//! # Task lifecycle across retries
//!
//! ```text
//! Queued → Running → Success (terminal)
//!            │
//!            └→ Crashed → [Queued again, ≤3 rounds] → Crashed (terminal)
//! ```

pub mod counters;
pub mod simulation_pool;

// Re-export commonly used types
pub use counters::{CounterSnapshot, RunCounters};
pub use simulation_pool::{SimulationPool, CRASH_COST, MAX_RETRY_ROUNDS};
