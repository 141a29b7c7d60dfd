// src/optimization/mod.rs
//! Optimization session specification
//!
//! - **Config**: loading and validation of the YAML run specification
//! - **Params**: typed parameter values and the external-input map used to
//!   build per-run overrides from the outer search algorithm's arguments

pub mod config;
pub mod params;

// Re-export commonly used types
pub use config::{OptimizationConfig, TaskEvalPolicy};
pub use params::{resolve_input_map, InputEntry, InputSource, ParamValue};
