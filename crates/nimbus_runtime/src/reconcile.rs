//! One reconciliation pass: normalize, build, validate, execute.

use crate::cloud::Cloud;
use crate::engine::{EngineConfig, ExecutionEngine};
use crate::report::ExecutionReport;
use nimbus_bootstrap::{BootstrapConfig, BootstrapScript};
use nimbus_plan::{ExecutionPlan, GraphError, ModelBuilder, TaskGraph};
use nimbus_spec::{
    populate_cluster_spec, ClusterNodeUpConfigBuilder, ClusterSpec, InstanceGroup,
    NodeUpConfigBuilder, NormalizedCluster, SpecError,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Reconciliation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The cluster spec is invalid; nothing ran
    #[error("invalid cluster spec: {0}")]
    Spec(#[from] SpecError),

    /// The task graph is invalid; nothing ran
    #[error("invalid task graph: {0}")]
    Graph(#[from] GraphError),

    /// Some tasks did not converge
    #[error("{}", Incomplete(.0))]
    PartialFailure(Box<ExecutionReport>),
}

struct Incomplete<'a>(&'a ExecutionReport);

impl fmt::Display for Incomplete<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        write!(
            f,
            "{} did not converge: {} failed, {} skipped, {} cancelled",
            report.run_id,
            report.failures().count(),
            report.skipped().count(),
            report.cancelled().count()
        )?;
        for (name, error) in report.failures() {
            write!(f, "\n  {}: {}", name, error)?;
        }
        Ok(())
    }
}

/// Drives reconciliation passes against one cloud
pub struct Reconciler {
    cloud: Arc<dyn Cloud>,
    bootstrap: BootstrapConfig,
    config: EngineConfig,
    nodeup: Option<Arc<dyn NodeUpConfigBuilder>>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("bootstrap", &self.bootstrap)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler
    #[must_use]
    pub fn new(cloud: Arc<dyn Cloud>, bootstrap: BootstrapConfig, config: EngineConfig) -> Self {
        Self {
            cloud,
            bootstrap,
            config,
            nodeup: None,
        }
    }

    /// Use a custom node configuration builder instead of the default one
    #[must_use]
    pub fn with_nodeup_builder(mut self, builder: Arc<dyn NodeUpConfigBuilder>) -> Self {
        self.nodeup = Some(builder);
        self
    }

    /// Engine configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bootstrap script renderer for a normalized cluster
    #[must_use]
    pub fn bootstrap_script(&self, cluster: &NormalizedCluster) -> BootstrapScript {
        let builder = self.nodeup.clone().unwrap_or_else(|| {
            Arc::new(ClusterNodeUpConfigBuilder::new(cluster.clone())) as Arc<dyn NodeUpConfigBuilder>
        });
        BootstrapScript::new(self.bootstrap.clone(), builder)
    }

    /// Normalize the cluster and build its validated execution plan
    ///
    /// # Errors
    ///
    /// Returns error if the spec is invalid or the graph has a duplicate
    /// name, an unknown dependency or a cycle
    pub fn plan(
        &self,
        cluster: &ClusterSpec,
        groups: &[InstanceGroup],
    ) -> Result<ExecutionPlan, ReconcileError> {
        let normalized = populate_cluster_spec(cluster)?;
        let script = self.bootstrap_script(&normalized);
        let graph = ModelBuilder::new(&normalized, groups, &script).build()?;
        Ok(graph.into_plan()?)
    }

    /// Run one full pass
    ///
    /// # Errors
    ///
    /// Returns error if planning fails, before any cloud call, or if any
    /// task did not converge; the latter carries the full report
    pub async fn reconcile(
        &self,
        cluster: &ClusterSpec,
        groups: &[InstanceGroup],
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ReconcileError> {
        let plan = self.plan(cluster, groups)?;
        self.execute(&plan, cancel).await
    }

    /// Validate and run a prebuilt graph
    ///
    /// # Errors
    ///
    /// Returns error if the graph is invalid, before any cloud call, or if
    /// any task did not converge
    pub async fn run_graph(
        &self,
        graph: TaskGraph,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ReconcileError> {
        let plan = graph.into_plan()?;
        self.execute(&plan, cancel).await
    }

    async fn execute(
        &self,
        plan: &ExecutionPlan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ReconcileError> {
        let engine = ExecutionEngine::new(Arc::clone(&self.cloud), self.config.clone());
        let report = engine.run(plan, cancel).await;
        if report.is_success() {
            Ok(report)
        } else {
            Err(ReconcileError::PartialFailure(Box::new(report)))
        }
    }
}
