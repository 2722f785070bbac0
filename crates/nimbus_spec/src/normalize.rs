//! Cluster spec normalization.
//!
//! Normalization derives fields the user leaves implicit. It is a pure
//! function of its input: the input spec is borrowed, never mutated, and the
//! result is a new value.

use crate::cluster::{ClusterSpec, EgressProxySpec};
use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;

/// Address of the cloud instance metadata service
pub const METADATA_SERVICE_ADDR: &str = "169.254.169.254";

const LOOPBACK_ADDR: &str = "127.0.0.1";
const LOOPBACK_NAME: &str = "localhost";

/// Spec validation errors
///
/// Each variant names the offending spec field (see [`SpecError::field`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    /// Cluster has no name
    #[error("cluster name must not be empty")]
    MissingClusterName,

    /// Proxy normalization requested without a proxy
    #[error("egressProxy is not set")]
    MissingProxy,

    /// Proxy present but its host is empty
    #[error("egressProxy.httpProxy.host must not be empty")]
    MissingProxyHost,

    /// No non-masquerade CIDR
    #[error("nonMasqueradeCIDR must be set")]
    MissingCidr,

    /// Non-masquerade CIDR does not parse
    #[error("nonMasqueradeCIDR {value:?} is invalid: {reason}")]
    InvalidCidr {
        /// Value as given
        value: String,
        /// Parser message
        reason: String,
    },
}

impl SpecError {
    /// Spec field the error refers to
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::MissingClusterName => "name",
            Self::MissingProxy => "egressProxy",
            Self::MissingProxyHost => "egressProxy.httpProxy.host",
            Self::MissingCidr | Self::InvalidCidr { .. } => "nonMasqueradeCIDR",
        }
    }
}

/// Compute the normalized egress proxy of a cluster
///
/// The resulting exclude list is the caller-supplied list followed, in this
/// order, by the loopback pair, the cluster name, the second address of the
/// non-masquerade CIDR, the CIDR itself and (except on GCE) the metadata
/// service address. Nothing is reordered or deduplicated.
///
/// # Errors
///
/// Returns error if no proxy host is configured or the CIDR does not parse
pub fn assign_proxy(cluster: &ClusterSpec) -> Result<EgressProxySpec, SpecError> {
    let proxy = cluster.egress_proxy.as_ref().ok_or(SpecError::MissingProxy)?;
    if !proxy.has_host() {
        return Err(SpecError::MissingProxyHost);
    }

    let cidr = &cluster.non_masquerade_cidr;
    let second = second_address(cidr)?.to_string();

    let mut excludes: Vec<&str> = Vec::new();
    if !proxy.proxy_excludes.is_empty() {
        excludes.push(&proxy.proxy_excludes);
    }
    let leads_with_loopback = proxy.proxy_excludes.split(',').next() == Some(LOOPBACK_ADDR);
    if !leads_with_loopback {
        excludes.push(LOOPBACK_ADDR);
        excludes.push(LOOPBACK_NAME);
    }
    excludes.push(&cluster.name);
    excludes.push(&second);
    excludes.push(cidr);
    if !cluster.cloud_provider.is_gce() {
        excludes.push(METADATA_SERVICE_ADDR);
    }

    Ok(EgressProxySpec {
        http_proxy: proxy.http_proxy.clone(),
        proxy_excludes: excludes.join(","),
    })
}

/// The address as written in `cidr` with its last octet incremented
fn second_address(cidr: &str) -> Result<IpAddr, SpecError> {
    if cidr.is_empty() {
        return Err(SpecError::MissingCidr);
    }
    let net: IpNet = cidr.parse().map_err(|e: ipnet::AddrParseError| SpecError::InvalidCidr {
        value: cidr.to_string(),
        reason: e.to_string(),
    })?;
    Ok(match net.addr() {
        IpAddr::V4(addr) => {
            let mut octets = addr.octets();
            octets[3] = octets[3].wrapping_add(1);
            IpAddr::from(octets)
        }
        IpAddr::V6(addr) => {
            let mut octets = addr.octets();
            octets[15] = octets[15].wrapping_add(1);
            IpAddr::from(octets)
        }
    })
}

/// A cluster spec that has passed normalization
///
/// Only [`populate_cluster_spec`] constructs this, so downstream builders
/// that take it cannot observe a spec that skipped validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCluster(ClusterSpec);

impl NormalizedCluster {
    /// The normalized spec
    #[must_use]
    pub const fn spec(&self) -> &ClusterSpec {
        &self.0
    }

    /// Cluster name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Normalized egress proxy, if configured
    #[must_use]
    pub const fn egress_proxy(&self) -> Option<&EgressProxySpec> {
        self.0.egress_proxy.as_ref()
    }

    /// Unwrap into the spec
    #[must_use]
    pub fn into_inner(self) -> ClusterSpec {
        self.0
    }
}

/// Run the full normalization pass over a cluster spec
///
/// Validates the cluster name and the non-masquerade CIDR and, when an egress
/// proxy is configured, replaces it with the output of [`assign_proxy`].
/// No other field changes.
///
/// # Errors
///
/// Returns the first validation error found
pub fn populate_cluster_spec(cluster: &ClusterSpec) -> Result<NormalizedCluster, SpecError> {
    if cluster.name.is_empty() {
        return Err(SpecError::MissingClusterName);
    }
    second_address(&cluster.non_masquerade_cidr)?;

    let mut normalized = cluster.clone();
    if cluster.egress_proxy.is_some() {
        let proxy = assign_proxy(cluster)?;
        tracing::debug!(
            cluster = %cluster.name,
            excludes = %proxy.proxy_excludes,
            "assigned egress proxy excludes"
        );
        normalized.egress_proxy = Some(proxy);
    }
    Ok(NormalizedCluster(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::EgressProxySpec;

    const CLUSTER: &str = "testcluster.test.com";

    fn cluster(provider: &str, cidr: &str, excludes: &str) -> ClusterSpec {
        ClusterSpec::new(CLUSTER, cidr)
            .with_cloud_provider(provider)
            .with_egress_proxy(EgressProxySpec::new("52.205.179.249", 3128).with_excludes(excludes))
    }

    #[test]
    fn test_assign_proxy_with_user_excludes() {
        let spec = cluster("aws", "100.64.0.1/10", "google.com");
        let proxy = assign_proxy(&spec).unwrap();
        assert_eq!(
            proxy.proxy_excludes,
            "google.com,127.0.0.1,localhost,testcluster.test.com,100.64.0.2,100.64.0.1/10,169.254.169.254"
        );
    }

    #[test]
    fn test_assign_proxy_empty_excludes() {
        let spec = cluster("aws", "100.64.0.0/10", "");
        let proxy = assign_proxy(&spec).unwrap();
        assert_eq!(
            proxy.proxy_excludes,
            "127.0.0.1,localhost,testcluster.test.com,100.64.0.1,100.64.0.0/10,169.254.169.254"
        );
    }

    #[test]
    fn test_assign_proxy_gce_omits_metadata() {
        let spec = cluster("gce", "172.16.0.5/12", "");
        let proxy = assign_proxy(&spec).unwrap();
        assert_eq!(
            proxy.proxy_excludes,
            "127.0.0.1,localhost,testcluster.test.com,172.16.0.6,172.16.0.5/12"
        );
    }

    #[test]
    fn test_assign_proxy_leading_loopback_not_repeated() {
        let spec = cluster("aws", "100.64.0.0/10", "127.0.0.1,localhost,internal");
        let proxy = assign_proxy(&spec).unwrap();
        assert_eq!(
            proxy.proxy_excludes,
            "127.0.0.1,localhost,internal,testcluster.test.com,100.64.0.1,100.64.0.0/10,169.254.169.254"
        );
    }

    #[test]
    fn test_assign_proxy_keeps_duplicates() {
        let spec = cluster("aws", "100.64.0.0/10", "localhost");
        let proxy = assign_proxy(&spec).unwrap();
        assert!(proxy.proxy_excludes.starts_with("localhost,127.0.0.1,localhost,"));
    }

    #[test]
    fn test_assign_proxy_keeps_credentials() {
        let mut spec = cluster("aws", "100.64.0.0/10", "");
        if let Some(p) = spec.egress_proxy.as_mut() {
            p.http_proxy = p.http_proxy.clone().with_credentials("u", "p");
        }
        let proxy = assign_proxy(&spec).unwrap();
        assert_eq!(proxy.http_proxy.user, "u");
        assert_eq!(proxy.http_proxy.password, "p");
        assert_eq!(proxy.http_proxy.port, 3128);
    }

    #[test]
    fn test_assign_proxy_last_octet_wraps() {
        let spec = cluster("gce", "10.0.0.255/24", "");
        let proxy = assign_proxy(&spec).unwrap();
        assert!(proxy.proxy_excludes.contains(",10.0.0.0,"));
    }

    #[test]
    fn test_assign_proxy_errors() {
        let mut spec = cluster("aws", "100.64.0.0/10", "");
        spec.egress_proxy = None;
        assert_eq!(assign_proxy(&spec), Err(SpecError::MissingProxy));

        let spec = ClusterSpec::new(CLUSTER, "100.64.0.0/10")
            .with_egress_proxy(EgressProxySpec::new("", 3128));
        assert_eq!(assign_proxy(&spec), Err(SpecError::MissingProxyHost));

        let spec = cluster("aws", "not-a-cidr", "");
        let err = assign_proxy(&spec).unwrap_err();
        assert!(matches!(err, SpecError::InvalidCidr { .. }));
        assert_eq!(err.field(), "nonMasqueradeCIDR");
    }

    #[test]
    fn test_assign_proxy_does_not_mutate_input() {
        let spec = cluster("aws", "100.64.0.0/10", "google.com");
        let before = spec.clone();
        let _ = assign_proxy(&spec).unwrap();
        assert_eq!(spec, before);
    }

    #[test]
    fn test_populate_without_proxy() {
        let spec = ClusterSpec::new(CLUSTER, "100.64.0.0/10");
        let normalized = populate_cluster_spec(&spec).unwrap();
        assert_eq!(normalized.spec(), &spec);
        assert!(normalized.egress_proxy().is_none());
    }

    #[test]
    fn test_populate_validates() {
        let spec = ClusterSpec::new("", "100.64.0.0/10");
        assert_eq!(populate_cluster_spec(&spec), Err(SpecError::MissingClusterName));

        let spec = ClusterSpec::new(CLUSTER, "");
        assert_eq!(populate_cluster_spec(&spec), Err(SpecError::MissingCidr));

        let spec = ClusterSpec::new(CLUSTER, "100.64.0.0/99");
        assert!(matches!(
            populate_cluster_spec(&spec),
            Err(SpecError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn test_populate_only_changes_proxy() {
        let spec = cluster("aws", "100.64.0.0/10", "google.com").with_config_base("s3://state/c");
        let normalized = populate_cluster_spec(&spec).unwrap();
        let mut expected = spec.clone();
        expected.egress_proxy = Some(assign_proxy(&spec).unwrap());
        assert_eq!(normalized.into_inner(), expected);
    }

    proptest::proptest! {
        #[test]
        fn prop_user_prefix_preserved(
            segments in proptest::collection::vec("[a-z][a-z0-9.]{0,12}", 0..6),
            gce: bool,
        ) {
            let excludes = segments.join(",");
            let spec = cluster(if gce { "gce" } else { "aws" }, "100.64.0.0/10", &excludes);
            let proxy = assign_proxy(&spec).unwrap();
            let out: Vec<&str> = proxy.proxy_excludes.split(',').collect();

            let want: Vec<&str> = segments.iter().map(String::as_str).collect();
            proptest::prop_assert_eq!(&out[..segments.len()], want.as_slice());
            let tail = &out[segments.len()..];
            proptest::prop_assert_eq!(tail[0], "127.0.0.1");
            proptest::prop_assert_eq!(tail[1], "localhost");
            proptest::prop_assert_eq!(tail[2], CLUSTER);
            proptest::prop_assert_eq!(tail[3], "100.64.0.1");
            proptest::prop_assert_eq!(tail[4], "100.64.0.0/10");
            proptest::prop_assert_eq!(tail.len(), if gce { 5 } else { 6 });
        }
    }
}
