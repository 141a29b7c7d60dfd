// src/runtime/task.rs
//! Task descriptors and command templating
//!
//! A task file declares one simulation invocation:
//!
//! ```yaml
//! id: station_keeping
//! execute:
//!   cmd: run_simulation
//!   params:
//!     timeout: 120
//!     use_waves: true
//! ```
//!
//! Rendering substitutes every parameter as `name:=value` (booleans as
//! `0`/`1`, lists comma-joined without brackets), appends the recording
//! path as a dedicated parameter, and lets per-run overrides win over the
//! declared defaults. Any parameter whose name contains `timeout` sets the
//! process wall-clock timeout to five times its value unless an explicit
//! override is supplied.

use crate::optimization::params::ParamValue;
use crate::utils::errors::{EngineError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Fallback process timeout when the task declares none
pub const DEFAULT_PROCESS_TIMEOUT_SECS: f64 = 1e5;

/// Process timeout as a multiple of the declared simulation timeout
pub const TIMEOUT_MULTIPLIER: f64 = 5.0;

/// The `execute` section of a task file
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteSpec {
    /// Command template the parameters are appended to
    pub cmd: String,
    /// Parameter defaults, in declaration-independent sorted order
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

/// One simulation task, immutable once loaded
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub execute: ExecuteSpec,
    #[serde(skip)]
    name: String,
}

/// Wall-clock timeouts resolved for one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunTimeouts {
    /// Process kill deadline in seconds
    pub process: f64,
    /// Simulation-declared timeout, when one exists
    pub simulation: Option<f64>,
}

impl TaskDescriptor {
    /// Load a task file; the task name is the file stem
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| {
            EngineError::Configuration(format!("cannot open task file <{}>: {e}", path.display()))
        })?;
        let mut task: TaskDescriptor = serde_yaml::from_reader(file).map_err(|e| {
            EngineError::Configuration(format!("invalid task file <{}>: {e}", path.display()))
        })?;
        task.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| task.id.clone());
        info!(task = task.name, id = task.id, "task file loaded");
        Ok(task)
    }

    /// Parse a task from YAML text; the task name falls back to the id
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut task: TaskDescriptor = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::Configuration(format!("invalid task: {e}")))?;
        task.name = task.id.clone();
        Ok(task)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the full command line for one run: declared defaults first
    /// (skipping overridden names), then the recording path, then the
    /// overrides.
    pub fn render_command(
        &self,
        overrides: &BTreeMap<String, ParamValue>,
        recording: &Path,
    ) -> String {
        let mut cmd = self.execute.cmd.clone();

        for (name, value) in &self.execute.params {
            if overrides.contains_key(name) {
                continue;
            }
            cmd.push_str(&format!(" {}:={}", name, value.render()));
        }

        cmd.push_str(&format!(" recording_filename:=\"{}\"", recording.display()));

        for (name, value) in overrides {
            cmd.push_str(&format!(" {}:={}", name, value.render()));
        }

        cmd
    }

    /// The simulation timeout declared by the task or its overrides: the
    /// first positive value of a parameter whose name contains `timeout`
    pub fn declared_timeout(&self, overrides: &BTreeMap<String, ParamValue>) -> Option<f64> {
        let candidates = self
            .execute
            .params
            .iter()
            .filter(|(name, _)| !overrides.contains_key(*name))
            .chain(overrides.iter());

        for (name, value) in candidates {
            if !name.contains("timeout") {
                continue;
            }
            match value.as_f64() {
                Some(timeout) if timeout > 0.0 => return Some(timeout),
                Some(timeout) => warn!(name, timeout, "ignoring non-positive timeout parameter"),
                None => warn!(name, "ignoring non-numeric timeout parameter"),
            }
        }
        None
    }

    /// Resolve the process and simulation timeouts for one run.
    ///
    /// An explicit positive override becomes the process timeout verbatim;
    /// otherwise a declared simulation timeout is multiplied by
    /// [`TIMEOUT_MULTIPLIER`]; otherwise the large fallback applies.
    pub fn resolve_timeouts(
        &self,
        override_timeout: Option<f64>,
        overrides: &BTreeMap<String, ParamValue>,
    ) -> RunTimeouts {
        let simulation = self.declared_timeout(overrides);

        let process = match override_timeout {
            Some(timeout) if timeout > 0.0 => timeout,
            Some(timeout) => {
                warn!(timeout, "ignoring non-positive timeout override");
                simulation
                    .map(|t| t * TIMEOUT_MULTIPLIER)
                    .unwrap_or(DEFAULT_PROCESS_TIMEOUT_SECS)
            }
            None => simulation
                .map(|t| t * TIMEOUT_MULTIPLIER)
                .unwrap_or(DEFAULT_PROCESS_TIMEOUT_SECS),
        };

        RunTimeouts {
            process,
            simulation,
        }
    }
}
