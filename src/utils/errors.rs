// src/utils/errors.rs
//! Engine-wide error types
//!
//! Every failure the engine can produce is a variant of [`EngineError`].
//! Per-task failures (port allocation, spawn, timeout, non-zero exit,
//! missing recording, invalid KPIs) are recoverable at the pool boundary
//! and become `CRASHED` run results; a configuration error is fatal before
//! any run starts.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the engine
pub type Result<T> = std::result::Result<T, EngineError>;

/// All error conditions produced by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// No free port could be leased within the allocation timeout
    #[error("no free port in range {start}..{end} after {timeout_secs}s")]
    PortAllocation {
        start: u16,
        end: u16,
        timeout_secs: u64,
    },

    /// The simulation process could not be started
    #[error("failed to spawn simulation process: {0}")]
    SpawnFailed(String),

    /// The simulation process exceeded its wall-clock timeout
    #[error("process exceeded wall-clock timeout of {0:.1}s")]
    ProcessTimeout(f64),

    /// The simulation process exited with a non-zero status
    #[error("simulation process exited with status {0}")]
    ProcessFailed(i32),

    /// No recording artifact appeared after the process exited
    #[error("no recording generated under {0}")]
    MissingArtifact(PathBuf),

    /// A KPI consumed by the cost function was negative
    #[error("KPI <{tag}> has negative value {value}")]
    InvalidKpi { tag: String, value: f64 },

    /// A constraint references a KPI tag absent from the KPI set
    #[error("constraint <{tag}>: input tag <{input_tag}> not in KPI set")]
    ConstraintInputMissing { tag: String, input_tag: String },

    /// The evaluation collaborator failed
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// Malformed or missing configuration, fatal at startup
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Whether this error is recoverable at task granularity.
    ///
    /// Recoverable errors are caught at the worker-pool boundary and turned
    /// into a crashed run result so the pool keeps processing the queue.
    /// Configuration errors are not: they abort before any task runs.
    pub fn is_task_recoverable(&self) -> bool {
        !matches!(self, EngineError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_is_fatal() {
        let err = EngineError::Configuration("missing key".into());
        assert!(!err.is_task_recoverable());
    }

    #[test]
    fn test_task_errors_are_recoverable() {
        let errors = [
            EngineError::PortAllocation {
                start: 15000,
                end: 20000,
                timeout_secs: 10,
            },
            EngineError::SpawnFailed("exec failed".into()),
            EngineError::ProcessTimeout(600.0),
            EngineError::ProcessFailed(1),
            EngineError::MissingArtifact(PathBuf::from("/tmp/run")),
            EngineError::InvalidKpi {
                tag: "rmse".into(),
                value: -1.0,
            },
            EngineError::ConstraintInputMissing {
                tag: "limit".into(),
                input_tag: "overshoot".into(),
            },
            EngineError::Evaluation("parser error".into()),
        ];
        for err in errors {
            assert!(err.is_task_recoverable(), "{err}");
        }
    }
}
