// src/cost/cost_function.rs
//! Weighted, norm-aggregated, constraint-adjusted cost function
//!
//! Turns a KPI set into one scalar:
//!
//! 1. Per weighted tag, the term `(1/N) * weight * kpi` (N = number of
//!    weighted tags); any negative weighted KPI aborts the computation.
//! 2. The term vector collapses through the configured norm (L1, L2, L∞).
//! 3. Constraint terms are summed on top; barrier terms may be negative,
//!    so the total is not guaranteed non-negative.

use crate::cost::constraint::{Constraint, ConstraintSpec};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Ordered KPI-tag to value mapping
pub type KpiSet = BTreeMap<String, f64>;

/// Vector norm used to aggregate the weighted KPI terms.
///
/// Configured as `1`, `2` or `"inf"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CostNorm {
    #[default]
    L1,
    L2,
    LInf,
}

impl CostNorm {
    fn aggregate(&self, terms: &[f64]) -> f64 {
        match self {
            CostNorm::L1 => terms.iter().map(|t| t.abs()).sum(),
            CostNorm::L2 => terms.iter().map(|t| t * t).sum::<f64>().sqrt(),
            CostNorm::LInf => terms.iter().map(|t| t.abs()).fold(0.0, f64::max),
        }
    }
}

impl<'de> Deserialize<'de> for CostNorm {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Order(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Order(1) => Ok(CostNorm::L1),
            Repr::Order(2) => Ok(CostNorm::L2),
            Repr::Name(name) if name.eq_ignore_ascii_case("inf") => Ok(CostNorm::LInf),
            Repr::Order(other) => Err(serde::de::Error::custom(format!(
                "invalid cost function norm <{other}>, expected 1, 2 or \"inf\""
            ))),
            Repr::Name(other) => Err(serde::de::Error::custom(format!(
                "invalid cost function norm <{other}>, expected 1, 2 or \"inf\""
            ))),
        }
    }
}

/// Per-run breakdown of one cost computation, persisted with the result
/// summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Weighted per-tag terms, before norm aggregation
    pub weighted_terms: BTreeMap<String, f64>,
    /// Evaluated constraint terms by constraint tag
    pub constraint_terms: BTreeMap<String, f64>,
    /// The final scalar cost
    pub total: f64,
}

/// The configurable cost model
#[derive(Debug, Clone)]
pub struct CostFunction {
    weights: BTreeMap<String, f64>,
    norm: CostNorm,
    constraints: Vec<Constraint>,
}

impl CostFunction {
    pub fn new(weights: BTreeMap<String, f64>, norm: CostNorm) -> Self {
        Self {
            weights,
            norm,
            constraints: Vec::new(),
        }
    }

    /// Append constraints built from parsed config entries
    pub fn add_constraints(&mut self, specs: &[ConstraintSpec]) -> Result<()> {
        for spec in specs {
            let constraint = Constraint::from_spec(spec)?;
            debug!(
                kind = constraint.kind(),
                tag = constraint.tag(),
                input_tag = constraint.input_tag(),
                "constraint model added"
            );
            self.constraints.push(constraint);
        }
        Ok(())
    }

    pub fn add_constraint(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn norm(&self) -> CostNorm {
        self.norm
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Compute the scalar cost for a KPI set.
    ///
    /// A weighted tag absent from `kpis` contributes a zero term; a
    /// negative value for any weighted tag aborts with `InvalidKpi`, and a
    /// constraint whose input tag is absent aborts with
    /// `ConstraintInputMissing`. No partial cost is ever returned.
    pub fn compute(&self, kpis: &KpiSet) -> Result<f64> {
        self.compute_breakdown(kpis).map(|b| b.total)
    }

    /// As [`compute`](Self::compute), additionally returning the per-term
    /// breakdown for the result summary
    pub fn compute_breakdown(&self, kpis: &KpiSet) -> Result<CostBreakdown> {
        let n = self.weights.len();
        let mut weighted_terms = BTreeMap::new();
        let mut terms = Vec::with_capacity(n);

        for (tag, weight) in &self.weights {
            let value = kpis.get(tag).copied().unwrap_or(0.0);
            if value < 0.0 {
                return Err(EngineError::InvalidKpi {
                    tag: tag.clone(),
                    value,
                });
            }
            let term = weight * value / n as f64;
            debug!(tag, weight, value, term, "cost function term");
            weighted_terms.insert(tag.clone(), term);
            terms.push(term);
        }

        let mut total = self.norm.aggregate(&terms);
        debug!(cost = total, "cost before constraints");

        let mut constraint_terms = BTreeMap::new();
        for constraint in &self.constraints {
            let input = kpis.get(constraint.input_tag()).copied().ok_or_else(|| {
                EngineError::ConstraintInputMissing {
                    tag: constraint.tag().to_string(),
                    input_tag: constraint.input_tag().to_string(),
                }
            })?;
            let term = constraint.compute(input);
            debug!(
                tag = constraint.tag(),
                input_tag = constraint.input_tag(),
                input,
                term,
                "constraint term"
            );
            constraint_terms.insert(constraint.tag().to_string(), term);
            total += term;
        }
        debug!(cost = total, "cost after constraints");

        Ok(CostBreakdown {
            weighted_terms,
            constraint_terms,
            total,
        })
    }

    /// Dump the weight map as `cost_function.yaml` and each constraint's
    /// evaluated state into `dir`
    pub fn save(&self, dir: &Path, kpis: &KpiSet) -> Result<()> {
        let file = std::fs::File::create(dir.join("cost_function.yaml"))?;
        serde_yaml::to_writer(file, &self.weights)?;

        for constraint in &self.constraints {
            let input = kpis.get(constraint.input_tag()).copied().unwrap_or(0.0);
            constraint.save(dir, input)?;
        }
        Ok(())
    }
}
