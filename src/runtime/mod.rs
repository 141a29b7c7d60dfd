// src/runtime/mod.rs
//! Simulation process runtime
//!
//! Everything needed to execute one external simulation process:
//!
//! - **Port Lease**: exclusive port claims coordinated through lock files
//! - **Task**: task descriptors and command templating
//! - **Process Tree**: descendant enumeration and signal fan-out
//! - **Runner**: the single-run lifecycle (spawn, timeout, kill, classify)
//! - **Result**: the immutable per-attempt outcome document
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Preparing → Running → {Completed | TimedOut | SpawnFailed} → Released
//!         │            │                        │
//!         │ leases     │ descendant snapshot    │ leases released,
//!         │ acquired   │ + timeout armed        │ recording polled
//! ```

pub mod port_lease;
pub mod process_tree;
pub mod result;
pub mod runner;
pub mod task;

// Re-export commonly used types
pub use port_lease::{PortLease, PortLeaseManager};
pub use process_tree::ProcessTree;
pub use result::{RunResult, RunStatus};
pub use runner::{SimulationRunner, RECORDING_FILENAME};
pub use task::{ExecuteSpec, RunTimeouts, TaskDescriptor};
