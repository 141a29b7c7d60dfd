// src/cost/constraint.rs
//! Constraint penalty and barrier terms
//!
//! Each constraint maps one KPI value to an additive cost term used to
//! softly enforce a feasibility boundary:
//!
//! - **LogBarrier**: logarithmic barrier, active below the offset
//! - **InverseBarrier**: inverse barrier with a floored denominator
//! - **Penalty**: polynomial penalty, active above the offset
//! - **DistancePenalty**: distance to the nearest of a set of targets
//!
//! All variants are pure functions of one scalar input plus fixed
//! parameters.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Denominator floor for the inverse barrier
const INVERSE_BARRIER_FLOOR: f64 = 1e-5;

/// Offset parameter: a single boundary value, or a list of targets for
/// the distance penalty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Offset {
    Scalar(f64),
    Targets(Vec<f64>),
}

impl Default for Offset {
    fn default() -> Self {
        Offset::Scalar(0.0)
    }
}

impl Offset {
    /// The scalar boundary; lists are only valid for the distance penalty
    fn scalar(&self, kind: &str) -> Result<f64> {
        match self {
            Offset::Scalar(value) => Ok(*value),
            Offset::Targets(_) => Err(EngineError::Configuration(format!(
                "constraint type <{kind}> takes a scalar offset, not a list"
            ))),
        }
    }

    /// Offset as a target list; a scalar becomes a one-element list
    fn targets(&self) -> Vec<f64> {
        match self {
            Offset::Scalar(value) => vec![*value],
            Offset::Targets(values) => values.clone(),
        }
    }
}

/// Numeric parameters of one constraint, as they appear in configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintParams {
    #[serde(default)]
    pub gain: f64,
    #[serde(default)]
    pub offset: Offset,
    #[serde(default)]
    pub c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<f64>,
}

/// One constraint entry of the optimization config
#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub tag: String,
    pub input_tag: String,
    pub params: ConstraintParams,
}

/// A constraint term over one KPI
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    LogBarrier {
        tag: String,
        input_tag: String,
        gain: f64,
        offset: f64,
        c: f64,
    },
    InverseBarrier {
        tag: String,
        input_tag: String,
        gain: f64,
        offset: f64,
        c: f64,
    },
    Penalty {
        tag: String,
        input_tag: String,
        gain: f64,
        offset: f64,
        c: f64,
        n: f64,
    },
    DistancePenalty {
        tag: String,
        input_tag: String,
        gain: f64,
        targets: Vec<f64>,
        c: f64,
        n: f64,
    },
}

impl Constraint {
    /// Instantiate a constraint by type name.
    ///
    /// Unknown names are a configuration error; so is a list-valued offset
    /// on anything but `DistancePenalty`, or a missing exponent where one
    /// is required.
    pub fn create(
        kind: &str,
        tag: &str,
        input_tag: &str,
        params: &ConstraintParams,
    ) -> Result<Self> {
        let tag = tag.to_string();
        let input_tag = input_tag.to_string();
        match kind {
            "LogBarrier" => Ok(Constraint::LogBarrier {
                offset: params.offset.scalar(kind)?,
                tag,
                input_tag,
                gain: params.gain,
                c: params.c,
            }),
            "InverseBarrier" => Ok(Constraint::InverseBarrier {
                offset: params.offset.scalar(kind)?,
                tag,
                input_tag,
                gain: params.gain,
                c: params.c,
            }),
            "Penalty" => Ok(Constraint::Penalty {
                offset: params.offset.scalar(kind)?,
                n: Self::exponent(kind, params)?,
                tag,
                input_tag,
                gain: params.gain,
                c: params.c,
            }),
            "DistancePenalty" => Ok(Constraint::DistancePenalty {
                targets: params.offset.targets(),
                n: Self::exponent(kind, params)?,
                tag,
                input_tag,
                gain: params.gain,
                c: params.c,
            }),
            other => Err(EngineError::Configuration(format!(
                "unknown constraint type <{other}>"
            ))),
        }
    }

    /// Build a constraint from a parsed config entry
    pub fn from_spec(spec: &ConstraintSpec) -> Result<Self> {
        Self::create(&spec.kind, &spec.tag, &spec.input_tag, &spec.params)
    }

    fn exponent(kind: &str, params: &ConstraintParams) -> Result<f64> {
        params.n.ok_or_else(|| {
            EngineError::Configuration(format!(
                "constraint type <{kind}> requires parameter <n>"
            ))
        })
    }

    /// Constraint type name, matching the configuration spelling
    pub fn kind(&self) -> &'static str {
        match self {
            Constraint::LogBarrier { .. } => "LogBarrier",
            Constraint::InverseBarrier { .. } => "InverseBarrier",
            Constraint::Penalty { .. } => "Penalty",
            Constraint::DistancePenalty { .. } => "DistancePenalty",
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Constraint::LogBarrier { tag, .. }
            | Constraint::InverseBarrier { tag, .. }
            | Constraint::Penalty { tag, .. }
            | Constraint::DistancePenalty { tag, .. } => tag,
        }
    }

    /// KPI tag this constraint reads
    pub fn input_tag(&self) -> &str {
        match self {
            Constraint::LogBarrier { input_tag, .. }
            | Constraint::InverseBarrier { input_tag, .. }
            | Constraint::Penalty { input_tag, .. }
            | Constraint::DistancePenalty { input_tag, .. } => input_tag,
        }
    }

    /// Evaluate the constraint term for one KPI value
    pub fn compute(&self, x: f64) -> f64 {
        match self {
            Constraint::LogBarrier {
                gain, offset, c, ..
            } => {
                if x - offset > 0.0 {
                    0.0
                } else {
                    -c * (-gain * (x - offset)).ln()
                }
            }
            Constraint::InverseBarrier {
                gain, offset, c, ..
            } => {
                let d = gain * (x - offset);
                let d = if d.abs() < INVERSE_BARRIER_FLOOR {
                    INVERSE_BARRIER_FLOOR.copysign(d)
                } else {
                    d
                };
                -c / d
            }
            Constraint::Penalty {
                gain,
                offset,
                c,
                n,
                ..
            } => {
                if x - offset < 0.0 {
                    0.0
                } else {
                    c * (gain * (x - offset)).max(0.0).powf(*n)
                }
            }
            Constraint::DistancePenalty {
                gain,
                targets,
                c,
                n,
                ..
            } => targets
                .iter()
                .map(|t| c * (gain * (x - t).abs()).powf(*n))
                .fold(f64::INFINITY, f64::min),
        }
    }

    /// Dump the constraint parameters and its value at `x` into
    /// `<tag>_<input_tag>.yaml` under `dir`
    pub fn save(&self, dir: &Path, x: f64) -> Result<()> {
        let dump = ConstraintDump {
            function_name: self.kind().to_string(),
            tag: self.tag().to_string(),
            input_tag: self.input_tag().to_string(),
            params: self.params(),
            x,
            result: self.compute(x),
        };
        let filename = dir.join(format!("{}_{}.yaml", self.tag(), self.input_tag()));
        let file = std::fs::File::create(filename)?;
        serde_yaml::to_writer(file, &dump)?;
        Ok(())
    }

    /// Parameters in their configuration form
    pub fn params(&self) -> ConstraintParams {
        match self {
            Constraint::LogBarrier {
                gain, offset, c, ..
            }
            | Constraint::InverseBarrier {
                gain, offset, c, ..
            } => ConstraintParams {
                gain: *gain,
                offset: Offset::Scalar(*offset),
                c: *c,
                n: None,
            },
            Constraint::Penalty {
                gain,
                offset,
                c,
                n,
                ..
            } => ConstraintParams {
                gain: *gain,
                offset: Offset::Scalar(*offset),
                c: *c,
                n: Some(*n),
            },
            Constraint::DistancePenalty {
                gain,
                targets,
                c,
                n,
                ..
            } => ConstraintParams {
                gain: *gain,
                offset: Offset::Targets(targets.clone()),
                c: *c,
                n: Some(*n),
            },
        }
    }
}

/// On-disk form of one evaluated constraint
#[derive(Debug, Serialize)]
struct ConstraintDump {
    function_name: String,
    tag: String,
    input_tag: String,
    params: ConstraintParams,
    x: f64,
    result: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params(gain: f64, offset: Offset, c: f64, n: Option<f64>) -> ConstraintParams {
        ConstraintParams { gain, offset, c, n }
    }

    #[test]
    fn test_create_by_name() {
        let p = params(1.0, Offset::Scalar(10.0), 1.0, Some(1.0));
        for kind in ["LogBarrier", "InverseBarrier", "Penalty", "DistancePenalty"] {
            let c = Constraint::create(kind, "limit", "x", &p).unwrap();
            assert_eq!(c.kind(), kind);
            assert_eq!(c.tag(), "limit");
            assert_eq!(c.input_tag(), "x");
        }
        assert!(Constraint::create("Quadratic", "limit", "x", &p).is_err());
    }

    #[test]
    fn test_penalty_requires_exponent() {
        let p = params(1.0, Offset::Scalar(10.0), 1.0, None);
        assert!(Constraint::create("Penalty", "limit", "x", &p).is_err());
    }

    #[test]
    fn test_list_offset_only_for_distance_penalty() {
        let p = params(1.0, Offset::Targets(vec![1.0, 2.0]), 1.0, Some(1.0));
        assert!(Constraint::create("LogBarrier", "limit", "x", &p).is_err());
        assert!(Constraint::create("DistancePenalty", "limit", "x", &p).is_ok());
    }

    #[test]
    fn test_log_barrier() {
        let c = Constraint::create(
            "LogBarrier",
            "limit",
            "x",
            &params(1.0, Offset::Scalar(10.0), 1.0, None),
        )
        .unwrap();
        assert_eq!(c.compute(15.0), 0.0);
        assert!((c.compute(5.0) - (-(5.0f64).ln())).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_barrier_floors_denominator() {
        let c = Constraint::create(
            "InverseBarrier",
            "limit",
            "x",
            &params(1.0, Offset::Scalar(10.0), 1.0, None),
        )
        .unwrap();
        // At the boundary the denominator is floored, not divided by zero
        assert!(c.compute(10.0).is_finite());
        assert!((c.compute(11.0) - (-1.0)).abs() < 1e-12);
        assert!((c.compute(9.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_penalty() {
        let c = Constraint::create(
            "Penalty",
            "limit",
            "x",
            &params(1.0, Offset::Scalar(10.0), 1.0, Some(1.0)),
        )
        .unwrap();
        assert_eq!(c.compute(5.0), 0.0);
        assert!((c.compute(11.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_distance_penalty_targets() {
        let c = Constraint::create(
            "DistancePenalty",
            "grid",
            "x",
            &params(1.0, Offset::Targets(vec![1.0, 2.0, 3.0]), 1.0, Some(1.0)),
        )
        .unwrap();
        assert_eq!(c.compute(1.0), 0.0);
        assert_eq!(c.compute(2.0), 0.0);
        assert_eq!(c.compute(3.0), 0.0);
        assert!((c.compute(2.5) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_distance_penalty_scalar_offset() {
        let c = Constraint::create(
            "DistancePenalty",
            "grid",
            "x",
            &params(1.0, Offset::Scalar(2.0), 1.0, Some(1.0)),
        )
        .unwrap();
        assert_eq!(c.compute(2.0), 0.0);
        assert!((c.compute(3.5) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_save_dump() {
        let dir = tempfile::tempdir().unwrap();
        let c = Constraint::create(
            "Penalty",
            "limit",
            "overshoot",
            &params(1.0, Offset::Scalar(10.0), 1.0, Some(2.0)),
        )
        .unwrap();
        c.save(dir.path(), 12.0).unwrap();
        let dumped = std::fs::read_to_string(dir.path().join("limit_overshoot.yaml")).unwrap();
        assert!(dumped.contains("Penalty"));
        assert!(dumped.contains("overshoot"));
    }

    proptest! {
        #[test]
        fn prop_penalty_zero_in_feasible_region(x in -1e3..10.0f64) {
            let c = Constraint::create(
                "Penalty",
                "limit",
                "x",
                &params(1.0, Offset::Scalar(10.0), 1.0, Some(2.0)),
            )
            .unwrap();
            prop_assert_eq!(c.compute(x), 0.0);
        }

        #[test]
        fn prop_penalty_non_negative(x in -1e3..1e3f64) {
            let c = Constraint::create(
                "Penalty",
                "limit",
                "x",
                &params(2.0, Offset::Scalar(0.0), 1.5, Some(2.0)),
            )
            .unwrap();
            prop_assert!(c.compute(x) >= 0.0);
        }

        #[test]
        fn prop_distance_penalty_zero_at_targets(idx in 0usize..3) {
            let targets = vec![1.0, 2.0, 3.0];
            let c = Constraint::create(
                "DistancePenalty",
                "grid",
                "x",
                &params(1.0, Offset::Targets(targets.clone()), 1.0, Some(1.0)),
            )
            .unwrap();
            prop_assert_eq!(c.compute(targets[idx]), 0.0);
        }
    }
}
