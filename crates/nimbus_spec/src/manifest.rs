//! Cluster manifest files.
//!
//! A manifest bundles the cluster spec with its instance groups. Both YAML
//! and JSON are accepted.

use crate::cluster::{ClusterSpec, InstanceGroup};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Manifest parsing errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// File could not be read
    #[error("reading manifest {path}: {source}")]
    Io {
        /// Manifest path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// YAML decoding failed
    #[error("invalid YAML manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON decoding failed
    #[error("invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),

    /// Two instance groups share a name
    #[error("duplicate instance group: {0}")]
    DuplicateGroup(String),
}

/// A cluster together with its instance groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManifest {
    /// The cluster
    pub cluster: ClusterSpec,
    /// Its instance groups
    #[serde(default)]
    pub instance_groups: Vec<InstanceGroup>,
}

impl ClusterManifest {
    /// Parse a YAML manifest
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or repeats a group name
    pub fn from_yaml_str(source: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_yaml::from_str(source)?;
        manifest.check_groups()
    }

    /// Parse a JSON manifest
    ///
    /// # Errors
    ///
    /// Returns error if the document is malformed or repeats a group name
    pub fn from_json_str(source: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(source)?;
        manifest.check_groups()
    }

    /// Load a manifest from disk, choosing the format by extension
    ///
    /// `.json` files are parsed as JSON, everything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let source = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&source)
        } else {
            Self::from_yaml_str(&source)
        }
    }

    fn check_groups(self) -> Result<Self, ManifestError> {
        let mut seen = std::collections::HashSet::new();
        for group in &self.instance_groups {
            if !seen.insert(group.name.as_str()) {
                return Err(ManifestError::DuplicateGroup(group.name.clone()));
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InstanceGroupRole;

    const YAML: &str = r#"
cluster:
  name: example.com
  cloudProvider: aws
  nonMasqueradeCIDR: 100.64.0.0/10
  configBase: s3://state/example.com
  egressProxy:
    httpProxy:
      host: proxy.example.com
      port: 3128
    proxyExcludes: google.com
instanceGroups:
  - name: master-a
    spec:
      role: Master
  - name: nodes
    spec:
      role: Node
      minSize: 2
      maxSize: 5
  - name: bastions
    spec:
      role: Bastion
"#;

    #[test]
    fn test_parse_yaml() {
        let manifest = ClusterManifest::from_yaml_str(YAML).unwrap();
        assert_eq!(manifest.cluster.name, "example.com");
        assert_eq!(manifest.cluster.non_masquerade_cidr, "100.64.0.0/10");
        let proxy = manifest.cluster.egress_proxy.as_ref().unwrap();
        assert_eq!(proxy.http_proxy.port, 3128);
        assert_eq!(manifest.instance_groups.len(), 3);
        assert_eq!(manifest.instance_groups[1].spec.max_size, 5);
        assert_eq!(manifest.instance_groups[2].role(), InstanceGroupRole::Bastion);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "cluster": {"name": "example.com", "nonMasqueradeCIDR": "100.64.0.0/10"},
            "instanceGroups": [{"name": "nodes", "spec": {"role": "Node"}}]
        }"#;
        let manifest = ClusterManifest::from_json_str(json).unwrap();
        assert_eq!(manifest.instance_groups[0].name, "nodes");
        assert!(manifest.cluster.egress_proxy.is_none());
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let json = r#"{
            "cluster": {"name": "example.com", "nonMasqueradeCIDR": "100.64.0.0/10"},
            "instanceGroups": [
                {"name": "nodes", "spec": {"role": "Node"}},
                {"name": "nodes", "spec": {"role": "Master"}}
            ]
        }"#;
        let err = ClusterManifest::from_json_str(json).unwrap_err();
        assert!(matches!(err, ManifestError::DuplicateGroup(name) if name == "nodes"));
    }

    #[test]
    fn test_unknown_role_rejected() {
        let yaml = "cluster:\n  name: c\n  nonMasqueradeCIDR: 10.0.0.0/8\ninstanceGroups:\n  - name: x\n    spec:\n      role: Worker\n";
        assert!(matches!(
            ClusterManifest::from_yaml_str(yaml),
            Err(ManifestError::Yaml(_))
        ));
    }
}
