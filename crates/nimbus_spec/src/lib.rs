//! NIMBUS Cluster Specification
//!
//! The declarative cluster model, the normalizer that derives
//! fully-resolved fields from sparse user input, and the per-instance-group
//! node configuration handed to the node agent.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod manifest;
pub mod nodeup;
pub mod normalize;

pub use cluster::{
    ClusterSpec, CloudProvider, EgressProxySpec, HttpProxySpec, InstanceGroup, InstanceGroupRole,
    InstanceGroupSpec,
};
pub use manifest::{ClusterManifest, ManifestError};
pub use nodeup::{ClusterNodeUpConfigBuilder, NodeUpBuildError, NodeUpConfig, NodeUpConfigBuilder};
pub use normalize::{assign_proxy, populate_cluster_spec, NormalizedCluster, SpecError};
