// src/cost/mod.rs
//! Cost and constraint models
//!
//! This module turns a set of key performance indicators into one scalar:
//!
//! - **Cost Function**: weighted KPI terms aggregated through a vector norm
//! - **Constraint**: barrier/penalty terms softly enforcing feasibility
//!   boundaries
//!
//! Both are pure numeric components with no process or filesystem
//! dependencies beyond the optional on-disk dumps of their configuration.

pub mod constraint;
pub mod cost_function;

// Re-export commonly used types
pub use constraint::{Constraint, ConstraintParams, ConstraintSpec, Offset};
pub use cost_function::{CostBreakdown, CostFunction, CostNorm, KpiSet};
