//! Execution engine for task plans.
//!
//! Combines the scheduler and the executor: ready tasks are resolved and
//! converged concurrently up to a bound, each under its own timeout.
//! Outputs of finished tasks feed the references of their dependents.

use crate::cloud::Cloud;
use crate::executor::{dependency_outputs, Executor, Mode, TaskError};
use crate::report::{ExecutionReport, TaskOutcome};
use crate::scheduler::Scheduler;
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use nimbus_core::{RunId, TaskName};
use nimbus_plan::ExecutionPlan;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Execution engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dry-run or apply
    pub mode: Mode,
    /// Maximum number of tasks in flight
    pub max_parallel: usize,
    /// Deadline for a single task
    pub task_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: Mode::DryRun,
            max_parallel: 10,
            task_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    /// Set the mode
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the parallelism bound
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Set the per-task timeout
    #[must_use]
    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }
}

/// Runs execution plans against a cloud
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    executor: Executor,
    config: EngineConfig,
}

impl ExecutionEngine {
    /// Create an engine
    #[must_use]
    pub fn new(cloud: Arc<dyn Cloud>, config: EngineConfig) -> Self {
        Self {
            executor: Executor::new(cloud, config.mode),
            config,
        }
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a plan to completion or cancellation
    ///
    /// A failed task skips its transitive dependents; independent tasks
    /// keep running. Cancellation stops new tasks from starting, waits
    /// for the ones in flight, and marks the rest cancelled. The report
    /// always holds one outcome per task, in plan order.
    pub async fn run(&self, plan: &ExecutionPlan, cancel: &CancellationToken) -> ExecutionReport {
        let run_id = RunId::new();
        let started_at = chrono::Utc::now();
        let limit = self.config.max_parallel.max(1);
        let mode = self.config.mode;
        tracing::info!(run_id = %run_id, mode = %mode, tasks = plan.len(), "starting pass");

        let mut scheduler = Scheduler::new(plan);
        let mut outputs: IndexMap<TaskName, Option<String>> = IndexMap::new();
        let mut outcomes: IndexMap<TaskName, TaskOutcome> = IndexMap::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while !cancel.is_cancelled() && in_flight.len() < limit {
                let Some(name) = scheduler.next_ready() else {
                    break;
                };
                let Some(task) = plan.task(name.as_str()) else {
                    continue;
                };
                let inputs = dependency_outputs(task, &outputs);
                let executor = &self.executor;
                let timeout = self.config.task_timeout;
                in_flight.push(async move {
                    let converge = async {
                        let attributes = executor.resolve(task, &inputs).await?;
                        executor.converge(task, &attributes).await
                    };
                    let result = tokio::time::timeout(timeout, converge)
                        .await
                        .unwrap_or(Err(TaskError::Timeout(timeout)));
                    (name, result)
                });
            }

            let Some((name, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok((verdict, id)) => {
                    outputs.insert(name.clone(), id.clone());
                    let outcome = match (mode, id) {
                        (Mode::Apply, Some(id)) => TaskOutcome::Converged { verdict, id },
                        _ => TaskOutcome::Planned { verdict },
                    };
                    outcomes.insert(name.clone(), outcome);
                    scheduler.mark_complete(name);
                }
                Err(e) => record_failure(&mut scheduler, &mut outcomes, name, e),
            }
        }

        let unscheduled = scheduler.unscheduled();
        if !unscheduled.is_empty() {
            tracing::warn!(run_id = %run_id, tasks = unscheduled.len(), "pass cancelled");
        }
        for name in unscheduled {
            outcomes.insert(name.clone(), TaskOutcome::Cancelled);
        }

        let outcomes: IndexMap<TaskName, TaskOutcome> = plan
            .order()
            .iter()
            .filter_map(|name| outcomes.swap_remove(name).map(|o| (name.clone(), o)))
            .collect();
        let report = ExecutionReport {
            run_id,
            mode,
            outcomes,
            started_at,
            finished_at: chrono::Utc::now(),
        };
        tracing::info!(
            run_id = %run_id,
            success = report.is_success(),
            creates = report.creates(),
            updates = report.updates(),
            unchanged = report.unchanged(),
            failed = report.failures().count(),
            "finished pass"
        );
        report
    }
}

fn record_failure(
    scheduler: &mut Scheduler<'_>,
    outcomes: &mut IndexMap<TaskName, TaskOutcome>,
    name: &TaskName,
    error: TaskError,
) {
    tracing::warn!(task = %name, error = %error, "task failed");
    outcomes.insert(name.clone(), TaskOutcome::Failed(error));
    for skipped in scheduler.mark_failed(name) {
        tracing::warn!(task = %skipped, blocked_by = %name, "task skipped");
        outcomes.insert(
            skipped.clone(),
            TaskOutcome::Skipped {
                blocked_by: name.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Attributes, CloudError, CloudRecord};
    use crate::executor::Verdict;
    use crate::memory::MemoryCloud;
    use async_trait::async_trait;
    use nimbus_plan::{Task, TaskGraph, TaskKind};

    fn name(s: &str) -> TaskName {
        TaskName::new(s).unwrap()
    }

    /// spec -> script -> lc -> asg, net -> lc, net -> lb
    fn cluster_plan() -> ExecutionPlan {
        let spec = name("ClusterSpec/c");
        let net = name("Network/c");
        let script = name("BootstrapScript/nodes.c");
        let lc = name("LaunchConfiguration/nodes.c");
        let mut graph = TaskGraph::new();
        graph
            .add_task(Task::new(spec.clone(), TaskKind::ClusterSpec).with_literal("name", "c"))
            .unwrap();
        graph
            .add_task(Task::new(net.clone(), TaskKind::Network).with_literal("cidr", "172.20.0.0/16"))
            .unwrap();
        graph
            .add_task(
                Task::new(name("LoadBalancer/api.c"), TaskKind::LoadBalancer)
                    .with_literal("port", "443")
                    .with_ref("network", &net),
            )
            .unwrap();
        graph
            .add_task(Task::new(script.clone(), TaskKind::BootstrapScript).with_ref("clusterSpec", &spec))
            .unwrap();
        graph
            .add_task(
                Task::new(lc.clone(), TaskKind::LaunchConfiguration)
                    .with_ref("network", &net)
                    .with_ref("userData", &script),
            )
            .unwrap();
        graph
            .add_task(
                Task::new(name("AutoscalingGroup/nodes.c"), TaskKind::AutoscalingGroup)
                    .with_ref("launchConfiguration", &lc),
            )
            .unwrap();
        graph.into_plan().unwrap()
    }

    fn flat_plan(count: usize) -> ExecutionPlan {
        let mut graph = TaskGraph::new();
        for i in 0..count {
            graph
                .add_task(Task::new(name(&format!("Network/n{}", i)), TaskKind::Network))
                .unwrap();
        }
        graph.into_plan().unwrap()
    }

    fn engine(cloud: Arc<MemoryCloud>, config: EngineConfig) -> ExecutionEngine {
        ExecutionEngine::new(cloud, config)
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.mode, Mode::DryRun);
        assert_eq!(config.max_parallel, 10);
        assert_eq!(config.task_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_apply_then_rerun_only_finds() {
        let cloud = Arc::new(MemoryCloud::new());
        let plan = cluster_plan();
        let engine = engine(cloud.clone(), EngineConfig::default().with_mode(Mode::Apply));

        let first = engine.run(&plan, &CancellationToken::new()).await;
        assert!(first.is_success());
        assert_eq!(first.creates(), 6);
        let after_first = cloud.calls();
        assert_eq!(after_first.creates, 6);

        let second = engine.run(&plan, &CancellationToken::new()).await;
        assert!(second.is_success());
        assert_eq!(second.unchanged(), 6);
        let after_second = cloud.calls();
        assert_eq!(after_second.finds, after_first.finds + 6);
        assert_eq!(after_second.mutations(), after_first.mutations());
    }

    #[tokio::test]
    async fn test_dependents_see_produced_ids() {
        let cloud = Arc::new(MemoryCloud::new());
        let plan = cluster_plan();
        let report = engine(cloud.clone(), EngineConfig::default().with_mode(Mode::Apply))
            .run(&plan, &CancellationToken::new())
            .await;
        assert!(report.is_success());

        let network = cloud.get("Network/c").await.unwrap();
        let lb = cloud.get("LoadBalancer/api.c").await.unwrap();
        assert_eq!(lb.attributes["network"], network.id);
    }

    #[tokio::test]
    async fn test_report_in_plan_order() {
        let plan = cluster_plan();
        let report = engine(Arc::new(MemoryCloud::new()), EngineConfig::default())
            .run(&plan, &CancellationToken::new())
            .await;
        let names: Vec<&TaskName> = report.outcomes.keys().collect();
        let order: Vec<&TaskName> = plan.order().iter().collect();
        assert_eq!(names, order);
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_mutations() {
        let cloud = Arc::new(MemoryCloud::new());
        let plan = cluster_plan();
        let report = engine(cloud.clone(), EngineConfig::default())
            .run(&plan, &CancellationToken::new())
            .await;

        assert!(report.is_success());
        assert_eq!(report.mode, Mode::DryRun);
        assert_eq!(report.creates(), 6);
        assert!(matches!(
            report.outcomes[&name("LoadBalancer/api.c")],
            TaskOutcome::Planned {
                verdict: Verdict::Create
            }
        ));
        assert_eq!(cloud.calls().finds, 6);
        assert_eq!(cloud.calls().mutations(), 0);
    }

    #[tokio::test]
    async fn test_failure_skips_only_dependents() {
        let cloud = Arc::new(MemoryCloud::new().with_failure("BootstrapScript/nodes.c"));
        let plan = cluster_plan();
        let report = engine(cloud.clone(), EngineConfig::default().with_mode(Mode::Apply))
            .run(&plan, &CancellationToken::new())
            .await;

        assert!(!report.is_success());
        let failed: Vec<&str> = report.failures().map(|(n, _)| n.as_str()).collect();
        assert_eq!(failed, vec!["BootstrapScript/nodes.c"]);
        let skipped: Vec<&str> = report.skipped().map(TaskName::as_str).collect();
        assert_eq!(
            skipped,
            vec!["LaunchConfiguration/nodes.c", "AutoscalingGroup/nodes.c"]
        );
        assert!(report.outcomes[&name("LoadBalancer/api.c")].is_ok());
        assert!(cloud.get("LaunchConfiguration/nodes.c").await.is_none());
        assert!(cloud.get("LoadBalancer/api.c").await.is_some());
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let cloud = Arc::new(MemoryCloud::new().with_latency(Duration::from_millis(10)));
        let plan = flat_plan(8);
        let config = EngineConfig::default().with_max_parallel(3);
        let report = engine(cloud.clone(), config).run(&plan, &CancellationToken::new()).await;

        assert!(report.is_success());
        assert!(cloud.peak_concurrency() <= 3);
        assert!(cloud.peak_concurrency() >= 2);
    }

    #[tokio::test]
    async fn test_zero_parallelism_still_progresses() {
        let plan = flat_plan(2);
        let report = engine(
            Arc::new(MemoryCloud::new()),
            EngineConfig::default().with_max_parallel(0),
        )
        .run(&plan, &CancellationToken::new())
        .await;
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_timeout_fails_task() {
        let cloud = Arc::new(MemoryCloud::new().with_latency(Duration::from_millis(200)));
        let plan = cluster_plan();
        let config = EngineConfig::default().with_task_timeout(Duration::from_millis(20));
        let report = engine(cloud, config).run(&plan, &CancellationToken::new()).await;

        let (_, err) = report.failures().next().unwrap();
        assert_eq!(*err, TaskError::Timeout(Duration::from_millis(20)));
        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.skipped().count(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cloud = Arc::new(MemoryCloud::new());
        let plan = cluster_plan();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = engine(cloud.clone(), EngineConfig::default()).run(&plan, &cancel).await;

        assert_eq!(report.cancelled().count(), 6);
        assert!(!report.is_success());
        assert_eq!(cloud.calls().finds, 0);
    }

    /// Cancels the pass from inside the first lookup
    struct CancelOnFind {
        inner: MemoryCloud,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Cloud for CancelOnFind {
        async fn find(&self, kind: TaskKind, name: &TaskName) -> Result<Option<CloudRecord>, CloudError> {
            self.cancel.cancel();
            self.inner.find(kind, name).await
        }

        async fn create(
            &self,
            kind: TaskKind,
            name: &TaskName,
            attributes: &Attributes,
        ) -> Result<CloudRecord, CloudError> {
            self.inner.create(kind, name, attributes).await
        }

        async fn update(
            &self,
            kind: TaskKind,
            name: &TaskName,
            attributes: &Attributes,
        ) -> Result<CloudRecord, CloudError> {
            self.inner.update(kind, name, attributes).await
        }
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_finish() {
        let cancel = CancellationToken::new();
        let cloud = Arc::new(CancelOnFind {
            inner: MemoryCloud::new(),
            cancel: cancel.clone(),
        });
        let plan = cluster_plan();
        let config = EngineConfig::default()
            .with_mode(Mode::Apply)
            .with_max_parallel(1);
        let report = ExecutionEngine::new(cloud.clone(), config).run(&plan, &cancel).await;

        let first = &plan.order()[0];
        assert!(matches!(report.outcomes[first], TaskOutcome::Converged { .. }));
        assert_eq!(report.cancelled().count(), 5);
        assert!(cloud.inner.get(first.as_str()).await.is_some());
    }
}
