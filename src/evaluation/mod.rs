// src/evaluation/mod.rs
//! Evaluation collaborator contract
//!
//! Parsing the simulator's recording format, trajectory geometry and
//! report generation live outside this engine. The worker pool only
//! depends on this contract: given a recording and a time offset, an
//! evaluator produces a KPI mapping and can persist its outputs. The
//! collaborator is not guaranteed re-entrant, so the pool serializes all
//! calls into it.

use crate::cost::KpiSet;
use crate::utils::errors::{EngineError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One opened evaluation over a recording
pub trait Evaluator: Send {
    /// Compute the KPI set from the recording
    fn compute_kpis(&mut self) -> Result<()>;

    /// The computed KPI mapping
    fn kpis(&self) -> &KpiSet;

    /// Persist only the KPI dump into `dir`
    fn save_kpis(&self, dir: &Path) -> Result<()>;

    /// Persist the full evaluation output (KPIs, plots, reports) into
    /// `dir`
    fn save_evaluation(&self, dir: &Path) -> Result<()>;
}

/// Opens evaluations; injected into the pool
pub trait EvaluationFactory: Send + Sync {
    fn open(
        &self,
        recording: &Path,
        results_dir: &Path,
        time_offset: f64,
    ) -> Result<Box<dyn Evaluator>>;
}

/// Filename of the KPI dump read and written by [`YamlEvaluation`]
pub const KPI_FILENAME: &str = "kpis.yaml";

/// Reference evaluator reading a KPI mapping the simulator itself emitted
/// next to the recording.
///
/// Richer collaborators parse the recording directly and produce plots on
/// `save_evaluation`; this one covers simulators that post-process their
/// own telemetry, and the test suite.
pub struct YamlEvaluation {
    kpi_file: PathBuf,
    kpis: KpiSet,
}

impl Evaluator for YamlEvaluation {
    fn compute_kpis(&mut self) -> Result<()> {
        let file = std::fs::File::open(&self.kpi_file).map_err(|e| {
            EngineError::Evaluation(format!(
                "cannot open KPI dump <{}>: {e}",
                self.kpi_file.display()
            ))
        })?;
        self.kpis = serde_yaml::from_reader(file).map_err(|e| {
            EngineError::Evaluation(format!(
                "invalid KPI dump <{}>: {e}",
                self.kpi_file.display()
            ))
        })?;
        debug!(count = self.kpis.len(), "KPIs loaded");
        Ok(())
    }

    fn kpis(&self) -> &KpiSet {
        &self.kpis
    }

    fn save_kpis(&self, dir: &Path) -> Result<()> {
        let file = std::fs::File::create(dir.join(KPI_FILENAME))?;
        serde_yaml::to_writer(file, &self.kpis)?;
        Ok(())
    }

    fn save_evaluation(&self, dir: &Path) -> Result<()> {
        // No richer outputs exist for pre-computed KPI dumps
        self.save_kpis(dir)
    }
}

/// Factory for [`YamlEvaluation`]
pub struct YamlEvaluationFactory;

impl EvaluationFactory for YamlEvaluationFactory {
    fn open(
        &self,
        recording: &Path,
        _results_dir: &Path,
        _time_offset: f64,
    ) -> Result<Box<dyn Evaluator>> {
        let kpi_file = recording
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(KPI_FILENAME);
        Ok(Box::new(YamlEvaluation {
            kpi_file,
            kpis: KpiSet::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_evaluation_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("recording.dat");
        std::fs::write(&recording, b"").unwrap();
        std::fs::write(dir.path().join(KPI_FILENAME), "rmse: 1.5\novershoot: 0.25\n").unwrap();

        let mut evaluation = YamlEvaluationFactory
            .open(&recording, dir.path(), 0.0)
            .unwrap();
        evaluation.compute_kpis().unwrap();
        assert_eq!(evaluation.kpis()["rmse"], 1.5);
        assert_eq!(evaluation.kpis()["overshoot"], 0.25);

        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        evaluation.save_kpis(&out).unwrap();
        assert!(out.join(KPI_FILENAME).exists());
    }

    #[test]
    fn test_missing_kpi_dump_is_evaluation_error() {
        let dir = tempfile::tempdir().unwrap();
        let recording = dir.path().join("recording.dat");

        let mut evaluation = YamlEvaluationFactory
            .open(&recording, dir.path(), 0.0)
            .unwrap();
        let err = evaluation.compute_kpis().unwrap_err();
        assert!(matches!(err, EngineError::Evaluation(_)));
    }
}
