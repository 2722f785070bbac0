//! Model builder: cluster spec to task graph.

use crate::graph::{GraphError, TaskGraph};
use crate::task::{Task, TaskKind};
use nimbus_bootstrap::BootstrapScript;
use nimbus_core::TaskName;
use nimbus_resource::{RenderError, ResourceHolder};
use nimbus_spec::{InstanceGroup, InstanceGroupRole, NormalizedCluster};
use std::sync::Arc;

/// Network range used when the cluster does not declare one
pub const DEFAULT_NETWORK_CIDR: &str = "172.20.0.0/16";

/// Builds the task graph of one reconciliation pass
#[derive(Debug)]
pub struct ModelBuilder<'a> {
    cluster: &'a NormalizedCluster,
    groups: &'a [InstanceGroup],
    bootstrap: &'a BootstrapScript,
}

impl<'a> ModelBuilder<'a> {
    /// Create a builder
    #[must_use]
    pub const fn new(
        cluster: &'a NormalizedCluster,
        groups: &'a [InstanceGroup],
        bootstrap: &'a BootstrapScript,
    ) -> Self {
        Self {
            cluster,
            groups,
            bootstrap,
        }
    }

    /// Build the graph
    ///
    /// Emits the stored cluster spec, the network, the API load balancer
    /// (when there is a master group) and, per instance group, its bootstrap
    /// script, launch configuration and autoscaling group. Edges follow the
    /// references between them.
    ///
    /// A group whose bootstrap template fails to compile still gets its
    /// tasks; the failure surfaces when its script is read, so only that
    /// group's sub-graph fails.
    ///
    /// # Errors
    ///
    /// Returns error on duplicate or malformed task names
    pub fn build(&self) -> Result<TaskGraph, GraphError> {
        let mut graph = TaskGraph::new();
        let cluster_name = self.cluster.name();
        let spec = self.cluster.spec();

        let spec_task = TaskName::of(TaskKind::ClusterSpec.as_str(), cluster_name)?;
        let stored = self.cluster.clone();
        let holder = ResourceHolder::new(format!("cluster-spec-{}", cluster_name), move || {
            serde_json::to_vec_pretty(stored.spec()).map_err(|e| RenderError::Generate {
                name: stored.name().to_string(),
                reason: e.to_string(),
            })
        });
        graph.add_task(
            Task::new(spec_task.clone(), TaskKind::ClusterSpec)
                .with_resource("spec", Arc::new(holder)),
        )?;

        let network = TaskName::of(TaskKind::Network.as_str(), cluster_name)?;
        graph.add_task(
            Task::new(network.clone(), TaskKind::Network)
                .with_literal(
                    "cidr",
                    spec.network_cidr.as_deref().unwrap_or(DEFAULT_NETWORK_CIDR),
                )
                .with_literal("nonMasqueradeCIDR", &spec.non_masquerade_cidr),
        )?;

        let has_masters = self
            .groups
            .iter()
            .any(|g| g.role() == InstanceGroupRole::Master);
        let load_balancer = if has_masters {
            let name = TaskName::of(
                TaskKind::LoadBalancer.as_str(),
                &format!("api.{}", cluster_name),
            )?;
            graph.add_task(
                Task::new(name.clone(), TaskKind::LoadBalancer)
                    .with_literal("port", "443")
                    .with_ref("network", &network),
            )?;
            Some(name)
        } else {
            None
        };

        for group in self.groups {
            let resource = format!("{}.{}", group.name, cluster_name);

            let bootstrap = self.bootstrap_task(group, &resource, &spec_task)?;
            let bootstrap_name = bootstrap.as_ref().map(|t| t.name().clone());
            if let Some(task) = bootstrap {
                graph.add_task(task)?;
            }

            let launch_name = TaskName::of(TaskKind::LaunchConfiguration.as_str(), &resource)?;
            let mut launch = Task::new(launch_name.clone(), TaskKind::LaunchConfiguration)
                .with_literal("role", group.role().as_str())
                .with_ref("network", &network);
            if let Some(machine_type) = &group.spec.machine_type {
                launch = launch.with_literal("machineType", machine_type);
            }
            if let Some(image) = &group.spec.image {
                launch = launch.with_literal("image", image);
            }
            if let Some(bootstrap_name) = &bootstrap_name {
                launch = launch.with_ref("userData", bootstrap_name);
            }
            graph.add_task(launch)?;

            let asg_name = TaskName::of(TaskKind::AutoscalingGroup.as_str(), &resource)?;
            let mut asg = Task::new(asg_name, TaskKind::AutoscalingGroup)
                .with_literal("minSize", group.spec.min_size.to_string())
                .with_literal("maxSize", group.spec.max_size.to_string())
                .with_ref("launchConfiguration", &launch_name);
            if group.role() == InstanceGroupRole::Master {
                if let Some(lb) = &load_balancer {
                    asg = asg.with_ref("loadBalancer", lb);
                }
            }
            graph.add_task(asg)?;
        }

        tracing::debug!(cluster = %cluster_name, tasks = graph.len(), "built task graph");
        Ok(graph)
    }

    fn bootstrap_task(
        &self,
        group: &InstanceGroup,
        resource: &str,
        spec_task: &TaskName,
    ) -> Result<Option<Task>, GraphError> {
        let holder = match self
            .bootstrap
            .resource_nodeup(group, self.cluster.egress_proxy())
        {
            Ok(Some(holder)) => holder,
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(group = %group.name, error = %e, "bootstrap template unusable");
                ResourceHolder::failed(format!("nodeup-{}", group.name), e)
            }
        };
        let name = TaskName::of(TaskKind::BootstrapScript.as_str(), resource)?;
        Ok(Some(
            Task::new(name, TaskKind::BootstrapScript)
                .with_ref("clusterSpec", spec_task)
                .with_resource("content", Arc::new(holder)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::AttrValue;
    use nimbus_bootstrap::BootstrapConfig;
    use nimbus_spec::{
        populate_cluster_spec, ClusterNodeUpConfigBuilder, ClusterSpec, EgressProxySpec,
    };

    fn setup() -> (NormalizedCluster, BootstrapScript) {
        let spec = ClusterSpec::new("example.com", "100.64.0.0/10")
            .with_config_base("s3://state/example.com")
            .with_egress_proxy(EgressProxySpec::new("proxy.local", 3128));
        let cluster = populate_cluster_spec(&spec).unwrap();
        let script = BootstrapScript::new(
            BootstrapConfig::new("https://example.com/nodeup", "abc"),
            Arc::new(ClusterNodeUpConfigBuilder::new(cluster.clone())),
        );
        (cluster, script)
    }

    fn groups() -> Vec<InstanceGroup> {
        vec![
            InstanceGroup::new("master-a", InstanceGroupRole::Master),
            InstanceGroup::new("nodes", InstanceGroupRole::Node),
            InstanceGroup::new("bastions", InstanceGroupRole::Bastion),
        ]
    }

    #[test]
    fn test_build_emits_expected_tasks() {
        let (cluster, script) = setup();
        let groups = groups();
        let graph = ModelBuilder::new(&cluster, &groups, &script).build().unwrap();
        let names: Vec<&str> = graph.tasks().map(|t| t.name().as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ClusterSpec/example.com",
                "Network/example.com",
                "LoadBalancer/api.example.com",
                "BootstrapScript/master-a.example.com",
                "LaunchConfiguration/master-a.example.com",
                "AutoscalingGroup/master-a.example.com",
                "BootstrapScript/nodes.example.com",
                "LaunchConfiguration/nodes.example.com",
                "AutoscalingGroup/nodes.example.com",
                "LaunchConfiguration/bastions.example.com",
                "AutoscalingGroup/bastions.example.com",
            ]
        );
    }

    #[test]
    fn test_build_edges() {
        let (cluster, script) = setup();
        let groups = groups();
        let graph = ModelBuilder::new(&cluster, &groups, &script).build().unwrap();

        let script_task = graph.get("BootstrapScript/nodes.example.com").unwrap();
        assert!(script_task.dependencies().contains("ClusterSpec/example.com"));

        let launch = graph.get("LaunchConfiguration/nodes.example.com").unwrap();
        assert!(launch.dependencies().contains("Network/example.com"));
        assert!(launch.dependencies().contains("BootstrapScript/nodes.example.com"));

        let bastion = graph.get("LaunchConfiguration/bastions.example.com").unwrap();
        assert_eq!(bastion.dependencies().len(), 1);

        let master_asg = graph.get("AutoscalingGroup/master-a.example.com").unwrap();
        assert!(master_asg.dependencies().contains("LoadBalancer/api.example.com"));
        let node_asg = graph.get("AutoscalingGroup/nodes.example.com").unwrap();
        assert!(!node_asg.dependencies().contains("LoadBalancer/api.example.com"));

        let plan = graph.into_plan().unwrap();
        assert_eq!(plan.order().first().map(TaskName::as_str), Some("ClusterSpec/example.com"));
    }

    #[test]
    fn test_no_load_balancer_without_masters() {
        let (cluster, script) = setup();
        let groups = vec![InstanceGroup::new("nodes", InstanceGroupRole::Node)];
        let graph = ModelBuilder::new(&cluster, &groups, &script).build().unwrap();
        assert!(graph.get("LoadBalancer/api.example.com").is_none());
    }

    #[test]
    fn test_bootstrap_content_is_lazy() {
        let (cluster, script) = setup();
        let groups = groups();
        let graph = ModelBuilder::new(&cluster, &groups, &script).build().unwrap();
        let task = graph.get("BootstrapScript/nodes.example.com").unwrap();
        let Some(AttrValue::Resource(holder)) = task.attributes().get("content") else {
            panic!("bootstrap task has no content resource");
        };
        assert!(!holder.is_materialized());
        assert!(holder.as_str().unwrap().contains("export HTTP_PROXY=http://proxy.local:3128"));
    }

    #[test]
    fn test_invalid_group_name() {
        let (cluster, script) = setup();
        let groups = vec![InstanceGroup::new("bad name", InstanceGroupRole::Node)];
        let err = ModelBuilder::new(&cluster, &groups, &script).build().unwrap_err();
        assert!(matches!(err, GraphError::InvalidName(_)));
    }
}
