// src/runtime/result.rs
//! Per-attempt run results
//!
//! A [`RunResult`] is created at the end of one task attempt and never
//! mutated; a retried task produces a new result that supersedes the
//! previous one in the final report. Results persist as
//! `run_result.yaml` inside the run's results directory.

use crate::cost::CostBreakdown;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Terminal status of one task attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Crashed,
}

/// Outcome of one task attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    /// Task name the attempt belongs to
    pub task: String,
    /// Scalar cost; absent for crashed attempts
    pub cost: Option<f64>,
    /// Evaluated simulation window in seconds
    pub sim_time: Option<f64>,
    /// Per-run results directory
    pub results_dir: PathBuf,
    /// The recording artifact, when one was produced
    pub recording_filename: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    /// Failure description for crashed attempts
    pub message: Option<String>,
    /// Cost-term breakdown of a successful evaluation
    pub cost_function_data: Option<CostBreakdown>,
}

impl RunResult {
    pub const FILENAME: &'static str = "run_result.yaml";

    pub fn success(
        task: impl Into<String>,
        cost: f64,
        sim_time: Option<f64>,
        results_dir: impl Into<PathBuf>,
        recording_filename: impl Into<PathBuf>,
        cost_function_data: CostBreakdown,
    ) -> Self {
        Self {
            status: RunStatus::Success,
            task: task.into(),
            cost: Some(cost),
            sim_time,
            results_dir: results_dir.into(),
            recording_filename: Some(recording_filename.into()),
            timestamp: Utc::now(),
            message: None,
            cost_function_data: Some(cost_function_data),
        }
    }

    /// A completed process attempt, before evaluation has produced a cost
    pub fn completed(
        task: impl Into<String>,
        sim_time: Option<f64>,
        results_dir: impl Into<PathBuf>,
        recording_filename: impl Into<PathBuf>,
    ) -> Self {
        Self {
            status: RunStatus::Success,
            task: task.into(),
            cost: None,
            sim_time,
            results_dir: results_dir.into(),
            recording_filename: Some(recording_filename.into()),
            timestamp: Utc::now(),
            message: None,
            cost_function_data: None,
        }
    }

    pub fn crashed(
        task: impl Into<String>,
        results_dir: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: RunStatus::Crashed,
            task: task.into(),
            cost: None,
            sim_time: None,
            results_dir: results_dir.into(),
            recording_filename: None,
            timestamp: Utc::now(),
            message: Some(message.into()),
            cost_function_data: None,
        }
    }

    pub fn is_crashed(&self) -> bool {
        self.status == RunStatus::Crashed
    }

    /// Persist the result summary into `dir` as [`Self::FILENAME`]
    pub fn save(&self, dir: &Path) -> crate::utils::errors::Result<PathBuf> {
        let path = dir.join(Self::FILENAME);
        let file = std::fs::File::create(&path)?;
        serde_yaml::to_writer(file, self)?;
        Ok(path)
    }
}
