//! Cluster and instance group model.
//!
//! These types are the user-declared target state. They are created once per
//! reconciliation pass and never mutated by it; normalization produces new
//! values instead.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cloud provider identifier
///
/// Only `"gce"` changes normalization behaviour; every other value,
/// including the empty string, behaves like the default (AWS-like) provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloudProvider(String);

impl CloudProvider {
    /// Google Compute Engine
    pub const GCE: &'static str = "gce";
    /// Amazon Web Services
    pub const AWS: &'static str = "aws";

    /// Create a provider identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is GCE
    #[must_use]
    pub fn is_gce(&self) -> bool {
        self.0 == Self::GCE
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CloudProvider {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// User-declared target state of a cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster name, also its internal DNS name
    pub name: String,
    /// Cloud provider identifier
    #[serde(default)]
    pub cloud_provider: CloudProvider,
    /// Address range that is not NAT-masqueraded
    #[serde(rename = "nonMasqueradeCIDR", default)]
    pub non_masquerade_cidr: String,
    /// Address range of the cluster network
    #[serde(rename = "networkCIDR", default, skip_serializing_if = "Option::is_none")]
    pub network_cidr: Option<String>,
    /// Egress proxy, if outbound traffic must go through one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_proxy: Option<EgressProxySpec>,
    /// Kubernetes version to install on nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    /// Base location of the cluster's stored configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_base: Option<String>,
}

impl ClusterSpec {
    /// Create a cluster spec with the given name and non-masquerade CIDR
    #[must_use]
    pub fn new(name: impl Into<String>, non_masquerade_cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            non_masquerade_cidr: non_masquerade_cidr.into(),
            ..Self::default()
        }
    }

    /// Set the cloud provider
    #[must_use]
    pub fn with_cloud_provider(mut self, provider: impl Into<CloudProvider>) -> Self {
        self.cloud_provider = provider.into();
        self
    }

    /// Set the egress proxy
    #[must_use]
    pub fn with_egress_proxy(mut self, proxy: EgressProxySpec) -> Self {
        self.egress_proxy = Some(proxy);
        self
    }

    /// Set the config base
    #[must_use]
    pub fn with_config_base(mut self, config_base: impl Into<String>) -> Self {
        self.config_base = Some(config_base.into());
        self
    }

    /// Set the kubernetes version
    #[must_use]
    pub fn with_kubernetes_version(mut self, version: impl Into<String>) -> Self {
        self.kubernetes_version = Some(version.into());
        self
    }
}

/// Egress proxy settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressProxySpec {
    /// HTTP proxy endpoint
    pub http_proxy: HttpProxySpec,
    /// Comma-joined list of destinations reached directly
    #[serde(default)]
    pub proxy_excludes: String,
}

impl EgressProxySpec {
    /// Create a proxy spec for `host:port` with no excludes
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            http_proxy: HttpProxySpec {
                host: host.into(),
                port,
                ..HttpProxySpec::default()
            },
            proxy_excludes: String::new(),
        }
    }

    /// Set the exclude list
    #[must_use]
    pub fn with_excludes(mut self, excludes: impl Into<String>) -> Self {
        self.proxy_excludes = excludes.into();
        self
    }

    /// Whether a proxy host is configured
    #[must_use]
    pub fn has_host(&self) -> bool {
        !self.http_proxy.host.is_empty()
    }

    /// Iterate over the non-empty exclude segments
    pub fn excludes(&self) -> impl Iterator<Item = &str> {
        self.proxy_excludes.split(',').filter(|s| !s.is_empty())
    }
}

/// HTTP proxy endpoint and credentials
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpProxySpec {
    /// Proxy host
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// Proxy user
    #[serde(default)]
    pub user: String,
    /// Proxy password
    #[serde(default)]
    pub password: String,
}

impl HttpProxySpec {
    /// Set user and password
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Proxy URL as exported to nodes: `http://[user[@password]]host:port`
    ///
    /// User and password are joined with `@`, and the credentials are not
    /// escaped, matching what existing node images parse.
    #[must_use]
    pub fn url(&self) -> String {
        let mut url = String::from("http://");
        if !self.user.is_empty() {
            url.push_str(&self.user);
            if !self.password.is_empty() {
                url.push('@');
                url.push_str(&self.password);
            }
        }
        url.push_str(&self.host);
        url.push(':');
        url.push_str(&self.port.to_string());
        url
    }
}

impl fmt::Debug for HttpProxySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpProxySpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

/// Role of the machines in an instance group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceGroupRole {
    /// Control-plane machines
    Master,
    /// Worker machines
    #[default]
    Node,
    /// SSH jump hosts; bare machines without a bootstrap script
    Bastion,
}

impl InstanceGroupRole {
    /// Get the role name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "Master",
            Self::Node => "Node",
            Self::Bastion => "Bastion",
        }
    }
}

impl fmt::Display for InstanceGroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named set of machines sharing role and provisioning parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceGroup {
    /// Group name
    pub name: String,
    /// Provisioning parameters
    pub spec: InstanceGroupSpec,
}

impl InstanceGroup {
    /// Create an instance group with default provisioning parameters
    #[must_use]
    pub fn new(name: impl Into<String>, role: InstanceGroupRole) -> Self {
        Self {
            name: name.into(),
            spec: InstanceGroupSpec {
                role,
                ..InstanceGroupSpec::default()
            },
        }
    }

    /// Role of the group
    #[must_use]
    pub const fn role(&self) -> InstanceGroupRole {
        self.spec.role
    }

    /// Whether the group is a bastion
    #[must_use]
    pub fn is_bastion(&self) -> bool {
        self.spec.role == InstanceGroupRole::Bastion
    }
}

/// Provisioning parameters of an instance group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroupSpec {
    /// Machine role
    pub role: InstanceGroupRole,
    /// Machine type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    /// Machine image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Minimum group size
    #[serde(default = "default_size")]
    pub min_size: u32,
    /// Maximum group size
    #[serde(default = "default_size")]
    pub max_size: u32,
}

const fn default_size() -> u32 {
    1
}

impl Default for InstanceGroupSpec {
    fn default() -> Self {
        Self {
            role: InstanceGroupRole::default(),
            machine_type: None,
            image: None,
            min_size: default_size(),
            max_size: default_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_provider_gce() {
        assert!(CloudProvider::from("gce").is_gce());
        assert!(!CloudProvider::from("aws").is_gce());
        assert!(!CloudProvider::default().is_gce());
    }

    #[test]
    fn test_proxy_url_without_credentials() {
        let proxy = EgressProxySpec::new("52.205.179.249", 3128);
        assert_eq!(proxy.http_proxy.url(), "http://52.205.179.249:3128");
    }

    #[test]
    fn test_proxy_url_with_user_only() {
        let mut proxy = EgressProxySpec::new("proxy.internal", 8080);
        proxy.http_proxy.user = "alice".to_string();
        assert_eq!(proxy.http_proxy.url(), "http://aliceproxy.internal:8080");
    }

    #[test]
    fn test_proxy_url_with_credentials() {
        let mut proxy = EgressProxySpec::new("proxy.internal", 8080);
        proxy.http_proxy = proxy.http_proxy.with_credentials("alice", "s3cret");
        assert_eq!(proxy.http_proxy.url(), "http://alice@s3cretproxy.internal:8080");
    }

    #[test]
    fn test_password_not_in_debug() {
        let http = HttpProxySpec::default().with_credentials("alice", "s3cret");
        let debug = format!("{:?}", http);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_excludes_skips_empty_segments() {
        let proxy = EgressProxySpec::new("h", 1).with_excludes("a,,b");
        assert_eq!(proxy.excludes().collect::<Vec<_>>(), vec!["a", "b"]);
        let empty = EgressProxySpec::new("h", 1);
        assert_eq!(empty.excludes().count(), 0);
    }

    #[test]
    fn test_cluster_spec_json_field_names() {
        let spec = ClusterSpec::new("testcluster.test.com", "100.64.0.0/10")
            .with_cloud_provider("aws")
            .with_egress_proxy(EgressProxySpec::new("10.0.0.1", 3128).with_excludes("google.com"));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["nonMasqueradeCIDR"], "100.64.0.0/10");
        assert_eq!(json["cloudProvider"], "aws");
        assert_eq!(json["egressProxy"]["httpProxy"]["port"], 3128);
        assert_eq!(json["egressProxy"]["proxyExcludes"], "google.com");
    }

    #[test]
    fn test_instance_group_defaults() {
        let group: InstanceGroup =
            serde_json::from_str(r#"{"name":"nodes","spec":{"role":"Node"}}"#).unwrap();
        assert_eq!(group.role(), InstanceGroupRole::Node);
        assert_eq!(group.spec.min_size, 1);
        assert_eq!(group.spec.max_size, 1);
        assert!(!group.is_bastion());
    }

    #[test]
    fn test_bastion_role() {
        let group = InstanceGroup::new("bastions", InstanceGroupRole::Bastion);
        assert!(group.is_bastion());
        assert_eq!(group.role().to_string(), "Bastion");
    }
}
