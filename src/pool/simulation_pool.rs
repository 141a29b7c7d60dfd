// src/pool/simulation_pool.rs
//! Parallel simulation worker pool
//!
//! Dispatches the task list across a bounded set of workers. Each worker
//! owns one task end-to-end: run the process, evaluate the recording,
//! compute the cost, persist the result summary. The evaluation phase is
//! serialized through one async mutex because the evaluation collaborator
//! is not guaranteed re-entrant; the run phase is fully parallel.
//!
//! After the initial pass, crashed tasks are retried individually for up
//! to [`MAX_RETRY_ROUNDS`] additional rounds, stopping early at the first
//! clean round, on cancellation, or when the configured retry time budget
//! runs out. A task still crashed after that stays crashed in the final
//! report.

use crate::evaluation::EvaluationFactory;
use crate::optimization::config::OptimizationConfig;
use crate::optimization::params::ParamValue;
use crate::pool::counters::{CounterSnapshot, RunCounters};
use crate::runtime::port_lease::PortLeaseManager;
use crate::runtime::result::RunResult;
use crate::runtime::runner::SimulationRunner;
use crate::runtime::task::TaskDescriptor;
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Additional retry rounds after the initial pass
pub const MAX_RETRY_ROUNDS: u32 = 3;

/// Sentinel cost assigned to crashed tasks during aggregation
pub const CRASH_COST: f64 = 1e7;

/// Bounded-concurrency dispatcher over the configured task list
pub struct SimulationPool {
    context: WorkerContext,
}

/// Everything one worker slot needs, cheap to clone into a spawned task
#[derive(Clone)]
struct WorkerContext {
    engine: EngineConfig,
    config: Arc<OptimizationConfig>,
    evaluation: Arc<dyn EvaluationFactory>,
    ports: Arc<PortLeaseManager>,
    counters: Arc<RunCounters>,
    eval_lock: Arc<Mutex<()>>,
    cancel: CancellationToken,
}

impl SimulationPool {
    pub fn new(
        engine: EngineConfig,
        config: OptimizationConfig,
        evaluation: Arc<dyn EvaluationFactory>,
    ) -> Self {
        let ports = Arc::new(PortLeaseManager::from_config(&engine));
        Self {
            context: WorkerContext {
                engine,
                config: Arc::new(config),
                evaluation,
                ports,
                counters: Arc::new(RunCounters::new()),
                eval_lock: Arc::new(Mutex::new(())),
                cancel: CancellationToken::new(),
            },
        }
    }

    /// Token observed by every worker and runner; the binary wires this
    /// to the interrupt signal
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context.cancel.clone()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.context.counters.snapshot()
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.context.config
    }

    /// Request cooperative shutdown: no new task starts, in-flight
    /// runners kill their process trees, completed results are still
    /// returned by `run_all`.
    pub fn terminate(&self) {
        warn!("termination requested, cancelling all workers");
        self.context.cancel.cancel();
    }

    /// Run every configured task, retry the crashed ones, and return all
    /// final results plus the names of tasks that stayed crashed.
    pub async fn run_all(
        &self,
        params: &BTreeMap<String, ParamValue>,
    ) -> Result<(Vec<RunResult>, Vec<String>)> {
        let ctx = &self.context;
        info!(
            num_processes = ctx.config.max_num_processes,
            tasks = ctx.config.tasks.len(),
            results_dir = %ctx.config.results_dir.display(),
            record_all = ctx.config.record_all_results,
            "starting simulation pool"
        );

        // Malformed task files are a configuration error and abort before
        // any simulation starts.
        let mut descriptors = Vec::with_capacity(ctx.config.tasks.len());
        for path in &ctx.config.tasks {
            descriptors.push(TaskDescriptor::from_file(path)?);
        }
        std::fs::create_dir_all(&ctx.config.results_dir)?;

        let mut results = Self::dispatch(ctx, &descriptors, params).await?;

        let retry_deadline = ctx
            .config
            .retry_time_budget
            .map(|budget| Instant::now() + budget);

        let mut round = 0;
        while round < MAX_RETRY_ROUNDS {
            let crashed: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(_, result)| result.is_crashed())
                .map(|(idx, _)| idx)
                .collect();
            if crashed.is_empty() {
                break;
            }
            if ctx.cancel.is_cancelled() {
                warn!("cancellation requested, skipping remaining retries");
                break;
            }
            if retry_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!("retry time budget exhausted, keeping crashed results");
                break;
            }

            round += 1;
            info!(round, count = crashed.len(), "retrying crashed tasks");
            for idx in crashed {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                if retry_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    warn!("retry time budget exhausted mid-round");
                    break;
                }
                self.quarantine_results_dir(&results[idx]);
                results[idx] = ctx
                    .run_one(descriptors[idx].clone(), params.clone())
                    .await?;
            }
        }

        let failed_tasks: Vec<String> = results
            .iter()
            .filter(|result| result.is_crashed())
            .map(|result| result.task.clone())
            .collect();
        info!(
            failed = failed_tasks.len(),
            "ending simulation pool"
        );
        Ok((results, failed_tasks))
    }

    /// Reduce the final results to one scalar with the configured
    /// aggregation policy; crashed tasks count as [`CRASH_COST`]
    pub fn total_cost(&self, results: &[RunResult]) -> f64 {
        let costs: Vec<f64> = results
            .iter()
            .map(|result| result.cost.unwrap_or(CRASH_COST))
            .collect();
        self.context.config.aggregate_costs(&costs)
    }

    /// Initial full pass: all tasks fan out over the bounded worker set
    async fn dispatch(
        ctx: &WorkerContext,
        descriptors: &[TaskDescriptor],
        params: &BTreeMap<String, ParamValue>,
    ) -> Result<Vec<RunResult>> {
        let semaphore = Arc::new(Semaphore::new(ctx.config.max_num_processes));
        let mut handles = Vec::with_capacity(descriptors.len());

        for task in descriptors {
            let ctx = ctx.clone();
            let task = task.clone();
            let params = params.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| {
                    EngineError::Configuration("worker semaphore closed unexpectedly".into())
                })?;
                ctx.run_one(task, params).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            let result = match joined {
                Ok(result) => result?,
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                }
                Err(join_err) => {
                    return Err(EngineError::Configuration(format!(
                        "worker task aborted: {join_err}"
                    )))
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Clear the way for a retry: rename the previous attempt's results
    /// directory with a `failed_` prefix, or delete it when partial
    /// results are not being recorded
    fn quarantine_results_dir(&self, result: &RunResult) {
        let dir = &result.results_dir;
        if !dir.is_dir() || *dir == self.context.config.results_dir {
            return;
        }

        if self.context.config.record_all_results {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let parent = dir.parent().unwrap_or(&self.context.config.results_dir);
            let mut target = parent.join(format!("failed_{name}"));
            let mut attempt = 1;
            while target.exists() {
                target = parent.join(format!("failed_{attempt}_{name}"));
                attempt += 1;
            }
            match std::fs::rename(dir, &target) {
                Ok(()) => info!(from = %dir.display(), to = %target.display(), "quarantined crashed results directory"),
                Err(e) => warn!(dir = %dir.display(), error = %e, "failed to quarantine results directory"),
            }
        } else {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => info!(dir = %dir.display(), "removed crashed results directory"),
                Err(e) => warn!(dir = %dir.display(), error = %e, "failed to remove results directory"),
            }
        }
    }
}

impl WorkerContext {
    /// One task end-to-end: run, evaluate, score, persist. Every
    /// taxonomy failure becomes a crashed result; `Err` only escapes for
    /// unexpected errors.
    async fn run_one(
        &self,
        task: TaskDescriptor,
        params: BTreeMap<String, ParamValue>,
    ) -> Result<RunResult> {
        if self.cancel.is_cancelled() {
            let result = RunResult::crashed(
                task.name(),
                self.config.results_dir.clone(),
                "run cancelled before dispatch",
            );
            self.log_crash(&result);
            return Ok(result);
        }

        info!(task = task.name(), "starting simulation for task");
        let mut runner = SimulationRunner::new(
            self.engine.clone(),
            task,
            self.config.results_dir.clone(),
            self.config.record_all_results,
            Arc::clone(&self.ports),
            self.cancel.child_token(),
        );

        let result = runner.run(&params, None).await?;
        if result.is_crashed() {
            self.log_crash(&result);
            let _ = result.save(&result.results_dir);
            runner.remove_results_dir();
            return Ok(result);
        }

        // Only one worker at a time may drive the evaluation collaborator
        let evaluated = {
            let _guard = self.eval_lock.lock().await;
            self.evaluate(&result)
        };

        match evaluated {
            Ok(final_result) => {
                self.log_success(&final_result);
                runner.remove_results_dir();
                Ok(final_result)
            }
            Err(err) if err.is_task_recoverable() => {
                error!(
                    task = %result.task,
                    results_dir = %result.results_dir.display(),
                    error = %err,
                    "evaluation failed, marking task as crashed"
                );
                let crashed = RunResult::crashed(
                    result.task.clone(),
                    result.results_dir.clone(),
                    err.to_string(),
                );
                let _ = crashed.save(&crashed.results_dir);
                self.log_crash(&crashed);
                runner.remove_results_dir();
                Ok(crashed)
            }
            Err(err) => Err(err),
        }
    }

    /// Evaluation and scoring of one completed run; caller holds the
    /// evaluation mutex
    fn evaluate(&self, result: &RunResult) -> Result<RunResult> {
        let recording = result
            .recording_filename
            .as_ref()
            .ok_or_else(|| EngineError::Evaluation("completed run has no recording".into()))?;
        let time_offset = self.config.evaluation_time_offset.max(0.0);

        info!(
            task = %result.task,
            recording = %recording.display(),
            time_offset,
            "starting evaluation of the results"
        );

        let mut evaluation = self
            .evaluation
            .open(recording, &result.results_dir, time_offset)?;
        evaluation.compute_kpis()?;

        if self.config.store_kpis_only {
            evaluation.save_kpis(&result.results_dir)?;
        } else {
            evaluation.save_evaluation(&result.results_dir)?;
        }

        let breakdown = self.config.cost_fcn.compute_breakdown(evaluation.kpis())?;
        let cost = breakdown.total;
        if cost < 0.0 {
            return Err(EngineError::Evaluation(format!(
                "cost function returned negative value {cost}"
            )));
        }

        self.config.cost_fcn.save(&result.results_dir, evaluation.kpis())?;

        let sim_time = result.sim_time.map(|t| (t - time_offset).max(0.0));
        let final_result = RunResult::success(
            result.task.clone(),
            cost,
            sim_time,
            result.results_dir.clone(),
            recording.clone(),
            breakdown,
        );
        final_result.save(&result.results_dir)?;

        info!(task = %result.task, cost, "cost function evaluated");
        Ok(final_result)
    }

    fn log_success(&self, result: &RunResult) {
        let snapshot = self.counters.record_success();
        info!(
            task = %result.task,
            cost = result.cost,
            results_dir = %result.results_dir.display(),
            "SUCCESS - simulation finished successfully"
        );
        log_statistics(snapshot);
    }

    fn log_crash(&self, result: &RunResult) {
        let snapshot = self.counters.record_crash();
        error!(
            task = %result.task,
            results_dir = %result.results_dir.display(),
            message = result.message.as_deref().unwrap_or(""),
            "CRASHED - simulation failed"
        );
        log_statistics(snapshot);
    }
}

fn log_statistics(snapshot: CounterSnapshot) {
    info!(
        total_runs = snapshot.total_runs,
        successes = snapshot.successes,
        crashes = snapshot.crashes,
        "pool statistics"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::YamlEvaluationFactory;
    use crate::runtime::result::RunStatus;
    use crate::utils::config::PortRange;
    use std::path::Path;
    use std::time::Duration;

    fn test_engine(base: &Path) -> EngineConfig {
        let lock_dir = base.join("locks");
        std::fs::create_dir_all(&lock_dir).unwrap();
        EngineConfig {
            master_port_range: PortRange {
                start: 43000,
                end: 43100,
            },
            world_port_range: PortRange {
                start: 43100,
                end: 43200,
            },
            lock_dir,
            spawn_settle_ms: 20,
            artifact_poll_attempts: 5,
            artifact_poll_interval_ms: 20,
            kill_grace_secs: 2,
            log_dir: base.join("logs"),
            ..Default::default()
        }
    }

    fn write_ok_task(dir: &Path, name: &str) {
        let yaml = format!(
            "id: {name}\nexecute:\n  cmd: \"sh -c 'touch $SIM_HOME/../recording.dat; echo rmse: 1.5 > $SIM_HOME/../kpis.yaml'\"\n  params:\n    timeout: 30\n"
        );
        std::fs::write(dir.join(format!("{name}.yml")), yaml).unwrap();
    }

    fn write_crashing_task(dir: &Path, name: &str) {
        let yaml = format!(
            "id: {name}\nexecute:\n  cmd: \"sh -c 'exit 1'\"\n  params:\n    timeout: 30\n"
        );
        std::fs::write(dir.join(format!("{name}.yml")), yaml).unwrap();
    }

    fn write_slow_task(dir: &Path, name: &str) {
        let yaml = format!(
            "id: {name}\nexecute:\n  cmd: \"sh -c 'sleep 20'\"\n  params:\n    timeout: 30\n"
        );
        std::fs::write(dir.join(format!("{name}.yml")), yaml).unwrap();
    }

    fn pool_for(base: &Path, task_names: &[&str], max_num_processes: usize) -> SimulationPool {
        let tasks: Vec<String> = task_names
            .iter()
            .map(|name| format!("  - {name}.yml"))
            .collect();
        let yaml = format!(
            "task:\n{}\ncost_fcn:\n  rmse: 1.0\noutput_dir: results\nmax_num_processes: {}\nstore_all_results: true\n",
            tasks.join("\n"),
            max_num_processes
        );
        let config = OptimizationConfig::from_yaml_str(&yaml, base).unwrap();
        SimulationPool::new(test_engine(base), config, Arc::new(YamlEvaluationFactory))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_all_tasks_succeed() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["task_1", "task_2", "task_3"] {
            write_ok_task(dir.path(), name);
        }
        let pool = pool_for(dir.path(), &["task_1", "task_2", "task_3"], 2);

        let (results, failed) = pool.run_all(&BTreeMap::new()).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(failed.is_empty());
        for result in &results {
            assert_eq!(result.status, RunStatus::Success);
            // weight 1.0, single tag: cost = 1.0 * 1.5 / 1
            assert!((result.cost.unwrap() - 1.5).abs() < 1e-12);
            assert!(result.results_dir.join("run_result.yaml").exists());
            assert!(result.results_dir.join("kpis.yaml").exists());
            assert!(result.results_dir.join("cost_function.yaml").exists());
        }

        let snapshot = pool.counters();
        assert_eq!(snapshot.total_runs, 3);
        assert_eq!(snapshot.successes, 3);
        assert_eq!(snapshot.crashes, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_crashed_tasks_stay_crashed_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["task_1", "task_3", "task_5"] {
            write_ok_task(dir.path(), name);
        }
        for name in ["task_2", "task_4"] {
            write_crashing_task(dir.path(), name);
        }
        let names = ["task_1", "task_2", "task_3", "task_4", "task_5"];
        let pool = pool_for(dir.path(), &names, 2);

        let (results, failed) = pool.run_all(&BTreeMap::new()).await.unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(failed, vec!["task_2".to_string(), "task_4".to_string()]);
        assert_eq!(results[1].status, RunStatus::Crashed);
        assert_eq!(results[3].status, RunStatus::Crashed);

        // 5 initial attempts + 2 crashed tasks retried in each of the 3
        // rounds
        let snapshot = pool.counters();
        assert_eq!(snapshot.total_runs, 5 + 2 * MAX_RETRY_ROUNDS as u64);
        assert_eq!(snapshot.successes, 3);
        assert_eq!(snapshot.crashes, 2 + 2 * MAX_RETRY_ROUNDS as u64);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_crashed_directories_are_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        write_crashing_task(dir.path(), "task_1");
        let pool = pool_for(dir.path(), &["task_1"], 1);

        let (results, failed) = pool.run_all(&BTreeMap::new()).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(results[0].is_crashed());

        let results_root = dir.path().join("results");
        let quarantined = std::fs::read_dir(&results_root)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("failed_")
            })
            .count();
        assert_eq!(quarantined, MAX_RETRY_ROUNDS as usize);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_terminate_stops_new_tasks() {
        let dir = tempfile::tempdir().unwrap();
        for idx in 1..=4 {
            write_slow_task(dir.path(), &format!("task_{idx}"));
        }
        let names = ["task_1", "task_2", "task_3", "task_4"];
        let pool = Arc::new(pool_for(dir.path(), &names, 1));

        let runner_pool = Arc::clone(&pool);
        let run = tokio::spawn(async move { runner_pool.run_all(&BTreeMap::new()).await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        let started = Instant::now();
        pool.terminate();

        let (results, failed) = run.await.unwrap().unwrap();
        // Termination must not wait out four 20-second sleeps
        assert!(started.elapsed() < Duration::from_secs(15));
        assert_eq!(results.len(), 4);
        assert_eq!(failed.len(), 4);
        assert!(results
            .iter()
            .all(|result| result.message.as_deref().unwrap_or("").contains("cancelled")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_total_cost_aggregation() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["task_1", "task_2"] {
            write_ok_task(dir.path(), name);
        }
        let pool = pool_for(dir.path(), &["task_1", "task_2"], 2);

        let (results, _) = pool.run_all(&BTreeMap::new()).await.unwrap();
        // Mean policy over two identical costs
        assert!((pool.total_cost(&results) - 1.5).abs() < 1e-12);
    }
}
