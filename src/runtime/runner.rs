// src/runtime/runner.rs
//! Single-run simulation process lifecycle
//!
//! One [`SimulationRunner`] owns one task attempt end-to-end:
//!
//! 1. Lease two middleware ports from disjoint ranges
//! 2. Create a timestamped results directory and render the command
//! 3. Write the reproducer script and parameter dump, export the
//!    environment surface
//! 4. Spawn the process and snapshot its descendant tree
//! 5. Enforce the wall-clock timeout and cooperative cancellation
//! 6. Classify the exit and wait for the recording artifact
//!
//! Port leases release on every exit path. Every failure of the error
//! taxonomy comes back as a `CRASHED` [`RunResult`], never as an `Err`;
//! only unexpected programming errors propagate.

use crate::optimization::params::ParamValue;
use crate::runtime::port_lease::PortLeaseManager;
use crate::runtime::process_tree::ProcessTree;
use crate::runtime::result::RunResult;
use crate::runtime::task::{RunTimeouts, TaskDescriptor};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use chrono::Utc;
use rand::Rng;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the recording artifact inside the results directory
pub const RECORDING_FILENAME: &str = "recording.dat";

/// Suffix of a recording that is still being written
pub const ACTIVE_RECORDING_SUFFIX: &str = "active";

/// Reproducer script written next to the recording
const SCRIPT_FILENAME: &str = "run_simulation.sh";

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Lifecycle manager for one external simulation process
pub struct SimulationRunner {
    engine: EngineConfig,
    task: TaskDescriptor,
    results_root: PathBuf,
    ports: Arc<PortLeaseManager>,
    cancel: CancellationToken,
    record_all_results: bool,

    results_dir: Option<PathBuf>,
    recording_filename: Option<PathBuf>,
    timeouts: Option<RunTimeouts>,
    run_counter: u32,
}

impl SimulationRunner {
    pub fn new(
        engine: EngineConfig,
        task: TaskDescriptor,
        results_root: impl Into<PathBuf>,
        record_all_results: bool,
        ports: Arc<PortLeaseManager>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            task,
            results_root: results_root.into(),
            ports,
            cancel,
            record_all_results,
            results_dir: None,
            recording_filename: None,
            timeouts: None,
            run_counter: 0,
        }
    }

    pub fn task(&self) -> &TaskDescriptor {
        &self.task
    }

    /// Results directory of the current attempt
    pub fn results_dir(&self) -> Option<&Path> {
        self.results_dir.as_deref()
    }

    pub fn recording_filename(&self) -> Option<&Path> {
        self.recording_filename.as_deref()
    }

    /// Timeouts resolved for the current attempt
    pub fn timeouts(&self) -> Option<RunTimeouts> {
        self.timeouts
    }

    /// Execute one attempt.
    ///
    /// All per-task failures (port allocation, spawn, timeout, non-zero
    /// exit, missing recording) return a `CRASHED` result with a
    /// descriptive message; `Err` is reserved for unexpected errors.
    pub async fn run(
        &mut self,
        overrides: &BTreeMap<String, ParamValue>,
        override_timeout: Option<f64>,
    ) -> Result<RunResult> {
        self.run_counter += 1;
        match self.execute(overrides, override_timeout).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_task_recoverable() => {
                error!(
                    task = self.task.name(),
                    error = %err,
                    "attempt failed, marking task as crashed"
                );
                Ok(self.crashed(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    async fn execute(
        &mut self,
        overrides: &BTreeMap<String, ParamValue>,
        override_timeout: Option<f64>,
    ) -> Result<RunResult> {
        if self.cancel.is_cancelled() {
            return Ok(self.crashed("run cancelled before start"));
        }

        // Leases release on every exit path below via Drop; the explicit
        // release after the wait just makes the ports reusable sooner.
        let mut master_lease = self.ports.acquire(
            self.engine.master_port_range.as_range(),
            self.engine.port_lease_timeout(),
        )?;
        let mut world_lease = self.ports.acquire(
            self.engine.world_port_range.as_range(),
            self.engine.port_lease_timeout(),
        )?;

        let results_dir = self.create_results_dir()?;
        let recording = results_dir.join(RECORDING_FILENAME);
        self.results_dir = Some(results_dir.clone());
        self.recording_filename = Some(recording.clone());

        let cmd = self.task.render_command(overrides, &recording);
        let timeouts = self.task.resolve_timeouts(override_timeout, overrides);
        self.timeouts = Some(timeouts);
        info!(
            task = self.task.name(),
            process_timeout = timeouts.process,
            simulation_timeout = timeouts.simulation,
            "running simulation: {cmd}"
        );

        self.write_reproducer_script(&results_dir, &cmd)?;
        self.write_param_dump(&results_dir, overrides)?;

        let sim_home = results_dir.join("sim");
        std::fs::create_dir_all(&sim_home)?;

        let process_log = self.open_process_log()?;
        let process_log_err = process_log.try_clone()?;

        if self.cancel.is_cancelled() {
            return Ok(self.crashed("run cancelled before spawn"));
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&cmd)
            .env(
                "SIM_MASTER_URI",
                format!("http://localhost:{}", master_lease.port()),
            )
            .env(
                "SIM_WORLD_URI",
                format!("http://localhost:{}", world_lease.port()),
            )
            .env("SIM_HOME", &sim_home)
            .stdin(Stdio::null())
            .stdout(Stdio::from(process_log))
            .stderr(Stdio::from(process_log_err))
            .spawn()
            .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;

        // Give the launcher time to fork its children before the snapshot
        tokio::time::sleep(self.engine.spawn_settle()).await;
        let tree = child.id().map(ProcessTree::capture);
        if let Some(tree) = &tree {
            info!(
                task = self.task.name(),
                pid = tree.root().as_raw(),
                members = tree.members().len(),
                "simulation process started"
            );
        }

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status?),
            _ = tokio::time::sleep(Duration::from_secs_f64(timeouts.process)) => {
                WaitOutcome::TimedOut
            }
            _ = self.cancel.cancelled() => WaitOutcome::Cancelled,
        };

        let status = match outcome {
            WaitOutcome::Exited(status) => status,
            WaitOutcome::TimedOut => {
                warn!(
                    task = self.task.name(),
                    timeout = timeouts.process,
                    "process timeout, killing process tree"
                );
                self.kill_tree(&mut child, tree.as_ref()).await;
                return Err(EngineError::ProcessTimeout(timeouts.process));
            }
            WaitOutcome::Cancelled => {
                warn!(task = self.task.name(), "run cancelled, killing process tree");
                self.kill_tree(&mut child, tree.as_ref()).await;
                return Ok(self.crashed("run cancelled, process tree terminated"));
            }
        };

        master_lease.release();
        world_lease.release();

        if !status.success() {
            return Err(EngineError::ProcessFailed(status.code().unwrap_or(-1)));
        }
        debug!(task = self.task.name(), "simulation process exited cleanly");

        self.wait_for_recording(&recording).await?;

        info!(
            task = self.task.name(),
            recording = %recording.display(),
            "simulation finished"
        );
        Ok(RunResult::completed(
            self.task.name(),
            timeouts.simulation,
            results_dir,
            recording,
        ))
    }

    /// SIGTERM/SIGKILL the captured tree, then reap the direct child
    async fn kill_tree(&self, child: &mut tokio::process::Child, tree: Option<&ProcessTree>) {
        if let Some(tree) = tree {
            tree.kill(self.engine.kill_grace()).await;
        } else {
            debug!("no process tree captured, killing direct child only");
        }
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "direct child already finished");
        }
        let _ = child.wait().await;
    }

    /// Poll for the recording artifact after a clean exit. A recording
    /// that never appears within the window is a crash even on exit 0.
    async fn wait_for_recording(&self, recording: &Path) -> Result<()> {
        let active = PathBuf::from(format!(
            "{}.{ACTIVE_RECORDING_SUFFIX}",
            recording.display()
        ));

        for _ in 0..self.engine.artifact_poll_attempts {
            if recording.exists() {
                return Ok(());
            }
            if active.exists() {
                debug!(recording = %recording.display(), "recording still being finalized");
            }
            tokio::time::sleep(self.engine.artifact_poll_interval()).await;
        }

        Err(EngineError::MissingArtifact(
            recording
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf(),
        ))
    }

    fn crashed(&self, message: impl Into<String>) -> RunResult {
        let results_dir = self
            .results_dir
            .clone()
            .unwrap_or_else(|| self.results_root.clone());
        RunResult::crashed(self.task.name(), results_dir, message)
    }

    /// Create `<results_root>/<task>_<timestamp>_<suffix>`
    fn create_results_dir(&self) -> Result<PathBuf> {
        let dir_name = format!(
            "{}_{}_{}",
            self.task.name(),
            Utc::now().format("%Y-%m-%d_%H-%M-%S"),
            rand::thread_rng().gen_range(0..1000)
        )
        .replace(' ', "_");
        let results_dir = self.results_root.join(dir_name);
        std::fs::create_dir_all(&results_dir)?;
        debug!(dir = %results_dir.display(), "results directory created");
        Ok(results_dir)
    }

    /// Write the command into a shell script for manual re-runs
    fn write_reproducer_script(&self, results_dir: &Path, cmd: &str) -> Result<()> {
        let path = results_dir.join(SCRIPT_FILENAME);
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "#!/usr/bin/env bash")?;
        writeln!(file, "{cmd}")?;
        debug!(script = %path.display(), "reproducer script created");
        Ok(())
    }

    /// Dump the override parameters of this attempt
    fn write_param_dump(
        &self,
        results_dir: &Path,
        overrides: &BTreeMap<String, ParamValue>,
    ) -> Result<()> {
        if overrides.is_empty() {
            return Ok(());
        }
        let path = results_dir.join(format!("params_{}.yaml", self.run_counter));
        let file = std::fs::File::create(path)?;
        serde_yaml::to_writer(file, overrides)?;
        Ok(())
    }

    fn open_process_log(&self) -> Result<std::fs::File> {
        let log_dir = self.engine.log_dir.join(self.task.name());
        std::fs::create_dir_all(&log_dir)?;
        let path = log_dir.join(format!(
            "{}_process.log",
            Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f")
        ));
        Ok(std::fs::File::options().create(true).append(true).open(path)?)
    }

    /// Remove this attempt's results directory unless every run is kept
    pub fn remove_results_dir(&self) {
        if self.record_all_results {
            return;
        }
        let Some(dir) = &self.results_dir else {
            return;
        };
        if dir.is_dir() {
            info!(dir = %dir.display(), "removing results directory");
            if let Err(e) = std::fs::remove_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "failed to remove results directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config::PortRange;

    fn test_engine(lock_dir: &Path, log_dir: &Path) -> EngineConfig {
        EngineConfig {
            master_port_range: PortRange {
                start: 42000,
                end: 42100,
            },
            world_port_range: PortRange {
                start: 42100,
                end: 42200,
            },
            lock_dir: lock_dir.to_path_buf(),
            spawn_settle_ms: 20,
            artifact_poll_attempts: 5,
            artifact_poll_interval_ms: 20,
            kill_grace_secs: 2,
            log_dir: log_dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn runner(dir: &Path, task_yaml: &str) -> SimulationRunner {
        let engine = test_engine(&dir.join("locks"), &dir.join("logs"));
        std::fs::create_dir_all(dir.join("locks")).unwrap();
        let ports = Arc::new(PortLeaseManager::from_config(&engine));
        let task = TaskDescriptor::from_yaml_str(task_yaml).unwrap();
        SimulationRunner::new(
            engine,
            task,
            dir.join("results"),
            true,
            ports,
            CancellationToken::new(),
        )
    }

    const RECORDING_TASK: &str = "\
id: records
execute:
  cmd: sh -c 'touch \"$SIM_HOME/../recording.dat\"'
  params:
    timeout: 30
";

    const FAILING_TASK: &str = "\
id: fails
execute:
  cmd: sh -c 'exit 3'
  params:
    timeout: 30
";

    const NO_RECORDING_TASK: &str = "\
id: silent
execute:
  cmd: sh -c 'true'
  params:
    timeout: 30
";

    #[tokio::test]
    async fn test_successful_run_produces_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), RECORDING_TASK);

        let result = runner.run(&BTreeMap::new(), None).await.unwrap();
        assert!(!result.is_crashed());
        assert_eq!(result.sim_time, Some(30.0));
        assert!(result.recording_filename.unwrap().exists());

        // Reproducer script and home directory were laid down
        let results_dir = runner.results_dir().unwrap();
        assert!(results_dir.join("run_simulation.sh").exists());
        assert!(results_dir.join("sim").is_dir());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_crashed() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), FAILING_TASK);

        let result = runner.run(&BTreeMap::new(), None).await.unwrap();
        assert!(result.is_crashed());
        assert!(result.message.unwrap().contains("status 3"));
    }

    #[tokio::test]
    async fn test_missing_recording_is_crashed() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), NO_RECORDING_TASK);

        let result = runner.run(&BTreeMap::new(), None).await.unwrap();
        assert!(result.is_crashed());
        assert!(result.message.unwrap().contains("no recording"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let task = "\
id: hangs
execute:
  cmd: sh -c 'sleep 30'
  params: {}
";
        let mut runner = runner(dir.path(), task);

        let started = std::time::Instant::now();
        let result = runner.run(&BTreeMap::new(), Some(1.0)).await.unwrap();
        assert!(result.is_crashed());
        assert!(result.message.unwrap().contains("timeout"));
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_leases_released_after_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), FAILING_TASK);
        let _ = runner.run(&BTreeMap::new(), None).await.unwrap();

        let manager = PortLeaseManager::from_config(&runner.engine);
        assert!(manager.locked_ports().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), RECORDING_TASK);
        runner.cancel.cancel();

        let result = runner.run(&BTreeMap::new(), None).await.unwrap();
        assert!(result.is_crashed());
        assert!(result.message.unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_param_dump_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = runner(dir.path(), RECORDING_TASK);
        let overrides = BTreeMap::from([("gain_p".to_string(), ParamValue::Number(4.0))]);

        let result = runner.run(&overrides, None).await.unwrap();
        assert!(!result.is_crashed());
        assert!(runner.results_dir().unwrap().join("params_1.yaml").exists());
    }

    #[tokio::test]
    async fn test_remove_results_dir_respects_record_all() {
        let dir = tempfile::tempdir().unwrap();
        let mut keeper = runner(dir.path(), RECORDING_TASK);
        let _ = keeper.run(&BTreeMap::new(), None).await.unwrap();
        keeper.remove_results_dir();
        assert!(keeper.results_dir().unwrap().exists());

        let mut cleaner = runner(dir.path(), RECORDING_TASK);
        cleaner.record_all_results = false;
        let _ = cleaner.run(&BTreeMap::new(), None).await.unwrap();
        cleaner.remove_results_dir();
        assert!(!cleaner.results_dir().unwrap().exists());
    }
}
