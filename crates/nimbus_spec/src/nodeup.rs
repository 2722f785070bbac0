//! Per-instance-group node configuration.
//!
//! A [`NodeUpConfig`] is what the node agent reads at boot. It is produced by
//! an injected [`NodeUpConfigBuilder`] and embedded as YAML in the bootstrap
//! script.

use crate::cluster::{InstanceGroup, InstanceGroupRole};
use crate::normalize::NormalizedCluster;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag applied to control-plane machines
pub const TAG_MASTER: &str = "_kubernetes_master";
/// Tag applied to worker machines
pub const TAG_POOL: &str = "_kubernetes_pool";

/// Fully-resolved node configuration for one instance group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpConfig {
    /// Node role tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Assets the agent downloads, as `hash@url` or plain URLs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<String>,
    /// Cluster name
    pub cluster_name: String,
    /// Instance group the node belongs to
    pub instance_group_name: String,
    /// Role of the instance group
    pub instance_group_role: InstanceGroupRole,
    /// Base location of the cluster configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_base: Option<String>,
    /// Kubernetes version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    /// Addon channel locations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

impl NodeUpConfig {
    /// Serialize to YAML
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// Failure building a node configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("building node configuration for instance group {group}: {reason}")]
pub struct NodeUpBuildError {
    /// Instance group name
    pub group: String,
    /// Cause
    pub reason: String,
}

impl NodeUpBuildError {
    /// Create a build error
    #[must_use]
    pub fn new(group: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            reason: reason.into(),
        }
    }
}

/// Produces the node configuration for an instance group
pub trait NodeUpConfigBuilder: Send + Sync {
    /// Build the configuration for `group`
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot be resolved
    fn build(&self, group: &InstanceGroup) -> Result<NodeUpConfig, NodeUpBuildError>;
}

impl<F> NodeUpConfigBuilder for F
where
    F: Fn(&InstanceGroup) -> Result<NodeUpConfig, NodeUpBuildError> + Send + Sync,
{
    fn build(&self, group: &InstanceGroup) -> Result<NodeUpConfig, NodeUpBuildError> {
        self(group)
    }
}

/// Default builder deriving node configuration from the normalized cluster
#[derive(Debug, Clone)]
pub struct ClusterNodeUpConfigBuilder {
    cluster: NormalizedCluster,
    assets: Vec<String>,
    channels: Vec<String>,
}

impl ClusterNodeUpConfigBuilder {
    /// Create a builder for `cluster`
    #[must_use]
    pub fn new(cluster: NormalizedCluster) -> Self {
        Self {
            cluster,
            assets: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// Add an asset every node downloads
    #[must_use]
    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.assets.push(asset.into());
        self
    }

    /// Add an addon channel
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }
}

impl NodeUpConfigBuilder for ClusterNodeUpConfigBuilder {
    fn build(&self, group: &InstanceGroup) -> Result<NodeUpConfig, NodeUpBuildError> {
        let spec = self.cluster.spec();
        let config_base = spec
            .config_base
            .clone()
            .ok_or_else(|| NodeUpBuildError::new(&group.name, "configBase is not set"))?;

        let tags = match group.role() {
            InstanceGroupRole::Master => vec![TAG_MASTER.to_string()],
            InstanceGroupRole::Node => vec![TAG_POOL.to_string()],
            InstanceGroupRole::Bastion => Vec::new(),
        };

        Ok(NodeUpConfig {
            tags,
            assets: self.assets.clone(),
            cluster_name: spec.name.clone(),
            instance_group_name: group.name.clone(),
            instance_group_role: group.role(),
            config_base: Some(config_base),
            kubernetes_version: spec.kubernetes_version.clone(),
            channels: self.channels.clone(),
        })
    }
}
