// src/optimization/config.rs
//! Optimization session configuration
//!
//! Loads and validates the YAML run specification: the task source, the
//! input-map used to build per-run parameter overrides, the cost model,
//! the pool size and retry/record policy. Everything is checked at load
//! time so a malformed specification fails before any simulation starts,
//! and the resulting value is passed by reference into the pool and the
//! runners.

use crate::cost::{ConstraintSpec, CostFunction, CostNorm};
use crate::optimization::params::{resolve_input_map, InputSource, ParamValue};
use crate::utils::errors::{EngineError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Policy reducing several task costs to one scalar
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskEvalPolicy {
    #[default]
    Mean,
    Max,
    Sum,
}

impl TaskEvalPolicy {
    /// Aggregate a cost vector; empty input yields zero
    pub fn aggregate(&self, costs: &[f64]) -> f64 {
        if costs.is_empty() {
            return 0.0;
        }
        match self {
            TaskEvalPolicy::Mean => costs.iter().sum::<f64>() / costs.len() as f64,
            TaskEvalPolicy::Max => costs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            TaskEvalPolicy::Sum => costs.iter().sum(),
        }
    }
}

/// Task source: one file, a list of files, or a directory of task files
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TaskSource {
    Single(PathBuf),
    Many(Vec<PathBuf>),
}

/// A value given inline or as a path to a YAML file holding it
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum InlineOrFile<T> {
    Inline(T),
    File(PathBuf),
}

impl<T: serde::de::DeserializeOwned> InlineOrFile<T> {
    fn resolve(self, base_dir: &Path, key: &str) -> Result<T> {
        match self {
            InlineOrFile::Inline(value) => Ok(value),
            InlineOrFile::File(path) => {
                let path = resolve_path(base_dir, &path);
                let file = std::fs::File::open(&path).map_err(|e| {
                    EngineError::Configuration(format!(
                        "cannot open {key} file <{}>: {e}",
                        path.display()
                    ))
                })?;
                serde_yaml::from_reader(file).map_err(|e| {
                    EngineError::Configuration(format!(
                        "invalid {key} file <{}>: {e}",
                        path.display()
                    ))
                })
            }
        }
    }
}

/// The raw YAML schema, before validation
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOptConfig {
    task: TaskSource,
    #[serde(default)]
    parameters: Vec<String>,
    #[serde(default)]
    input_map: BTreeMap<String, InputSource>,
    cost_fcn: InlineOrFile<BTreeMap<String, f64>>,
    #[serde(default)]
    constraints: Option<InlineOrFile<Vec<ConstraintSpec>>>,
    output_dir: PathBuf,
    #[serde(default)]
    max_num_processes: Option<usize>,
    #[serde(default)]
    store_all_results: Option<bool>,
    #[serde(default)]
    store_kpis_only: Option<bool>,
    #[serde(default)]
    evaluation_time_offset: Option<f64>,
    #[serde(default)]
    cost_fcn_norm: Option<CostNorm>,
    #[serde(default)]
    task_eval_fcn: Option<TaskEvalPolicy>,
    #[serde(default)]
    retry_time_budget: Option<f64>,
    #[serde(default)]
    log_filename: Option<PathBuf>,
}

/// Validated optimization session configuration
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    /// Task files, in dispatch order
    pub tasks: Vec<PathBuf>,
    /// External parameter labels, in the order the search algorithm
    /// supplies them
    pub parameters: Vec<String>,
    /// The cost model, constraints included
    pub cost_fcn: CostFunction,
    /// Root directory for per-run results
    pub results_dir: PathBuf,
    /// Worker pool size
    pub max_num_processes: usize,
    /// Keep every per-run results directory instead of cleaning up
    pub record_all_results: bool,
    /// Store only the KPI dump instead of the full evaluation output
    pub store_kpis_only: bool,
    /// Seconds trimmed from the start of the recording during evaluation
    pub evaluation_time_offset: f64,
    /// Reduction of several task costs to one scalar
    pub task_eval: TaskEvalPolicy,
    /// Optional wall-clock budget for the whole retry procedure
    pub retry_time_budget: Option<Duration>,
    /// Optional pool log file
    pub log_filename: Option<PathBuf>,

    input_map: BTreeMap<String, InputSource>,
}

impl OptimizationConfig {
    /// Load and validate a configuration file. Relative paths inside the
    /// file resolve against the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            EngineError::Configuration(format!(
                "cannot open optimization config <{}>: {e}",
                path.display()
            ))
        })?;
        let raw: RawOptConfig = serde_yaml::from_reader(file).map_err(|e| {
            EngineError::Configuration(format!(
                "invalid optimization config <{}>: {e}",
                path.display()
            ))
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Self::from_raw(raw, &base_dir)
    }

    /// Parse a configuration from a YAML string; relative paths resolve
    /// against `base_dir`
    pub fn from_yaml_str(yaml: &str, base_dir: &Path) -> Result<Self> {
        let raw: RawOptConfig = serde_yaml::from_str(yaml).map_err(|e| {
            EngineError::Configuration(format!("invalid optimization config: {e}"))
        })?;
        Self::from_raw(raw, base_dir)
    }

    fn from_raw(raw: RawOptConfig, base_dir: &Path) -> Result<Self> {
        let max_num_processes = raw.max_num_processes.unwrap_or(2);
        if max_num_processes == 0 {
            return Err(EngineError::Configuration(
                "max_num_processes must be greater than zero".into(),
            ));
        }

        let evaluation_time_offset = raw.evaluation_time_offset.unwrap_or(0.0);
        if evaluation_time_offset < 0.0 {
            return Err(EngineError::Configuration(
                "evaluation_time_offset must not be negative".into(),
            ));
        }

        if let Some(budget) = raw.retry_time_budget {
            if budget <= 0.0 {
                return Err(EngineError::Configuration(
                    "retry_time_budget must be greater than zero".into(),
                ));
            }
        }

        let tasks = Self::expand_tasks(raw.task, base_dir)?;
        info!(count = tasks.len(), "task files loaded");
        for task in &tasks {
            info!(task = %task.display(), "registered task");
        }

        let weights = raw.cost_fcn.resolve(base_dir, "cost_fcn")?;
        let mut cost_fcn = CostFunction::new(weights, raw.cost_fcn_norm.unwrap_or_default());
        if let Some(constraints) = raw.constraints {
            let specs = constraints.resolve(base_dir, "constraints")?;
            cost_fcn.add_constraints(&specs)?;
        }

        info!(
            max_num_processes,
            evaluation_time_offset, "optimization configuration loaded"
        );

        Ok(Self {
            tasks,
            parameters: raw.parameters,
            cost_fcn,
            results_dir: resolve_path(base_dir, &raw.output_dir),
            max_num_processes,
            record_all_results: raw.store_all_results.unwrap_or(false),
            store_kpis_only: raw.store_kpis_only.unwrap_or(true),
            evaluation_time_offset,
            task_eval: raw.task_eval_fcn.unwrap_or_default(),
            retry_time_budget: raw.retry_time_budget.map(Duration::from_secs_f64),
            log_filename: raw.log_filename.map(|p| resolve_path(base_dir, &p)),
            input_map: raw.input_map,
        })
    }

    /// Expand the task source to a concrete file list. Directory entries
    /// are naturally sorted by their embedded numeric suffix, so `task_10`
    /// follows `task_2`.
    fn expand_tasks(source: TaskSource, base_dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match source {
            TaskSource::Single(path) => vec![resolve_path(base_dir, &path)],
            TaskSource::Many(paths) => paths
                .iter()
                .map(|p| resolve_path(base_dir, p))
                .collect(),
        };

        let mut tasks = Vec::new();
        for entry in entries {
            if entry.is_dir() {
                let mut found = Vec::new();
                for item in std::fs::read_dir(&entry)? {
                    let path = item?.path();
                    let is_task_file = path
                        .extension()
                        .map(|ext| ext == "yml" || ext == "yaml")
                        .unwrap_or(false);
                    if path.is_file() && is_task_file {
                        found.push(path);
                    }
                }
                found.sort_by_key(|path| natural_key(path));
                tasks.extend(found);
            } else if entry.is_file() {
                tasks.push(entry);
            } else {
                return Err(EngineError::Configuration(format!(
                    "task source <{}> does not exist",
                    entry.display()
                )));
            }
        }

        if tasks.is_empty() {
            return Err(EngineError::Configuration("no task files found".into()));
        }
        Ok(tasks)
    }

    /// Build the per-run parameter overrides from the external argument
    /// set supplied by the search algorithm
    pub fn build_params(
        &self,
        args: &BTreeMap<String, f64>,
    ) -> Result<BTreeMap<String, ParamValue>> {
        resolve_input_map(&self.input_map, args)
    }

    /// Reduce several task costs to one scalar using the configured policy
    pub fn aggregate_costs(&self, costs: &[f64]) -> f64 {
        self.task_eval.aggregate(costs)
    }
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Sort key splitting a file stem into its alphabetic prefix and numeric
/// suffix: `task_10` sorts after `task_2`
fn natural_key(path: &Path) -> (String, u64) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let prefix = stem[..stem.len() - digits.len()].to_string();
    (prefix, digits.parse().unwrap_or(0))
}
