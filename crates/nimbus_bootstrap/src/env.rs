//! Bootstrap configuration and environment snippets.
//!
//! Process environment is read exactly once, into [`BootstrapConfig`],
//! before any script is rendered. Rendering itself never touches the
//! environment.

use nimbus_spec::EgressProxySpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Variable holding the node agent download URL
pub const NODEUP_URL_VAR: &str = "NODEUP_URL";
/// Variable holding the node agent digest
pub const NODEUP_HASH_VAR: &str = "NODEUP_HASH";

const S3_ENDPOINT: &str = "S3_ENDPOINT";
const S3_REGION: &str = "S3_REGION";
const S3_ACCESS_KEY_ID: &str = "S3_ACCESS_KEY_ID";
const S3_SECRET_ACCESS_KEY: &str = "S3_SECRET_ACCESS_KEY";

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty
    #[error("environment variable {0} must be set")]
    MissingVariable(String),
}

/// Object-storage endpoint override
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// Endpoint URL
    pub endpoint: String,
    /// Region
    pub region: String,
    /// Access key id
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
}

impl S3Config {
    /// Read the override from the process environment
    ///
    /// Returns `None` unless `S3_ENDPOINT` is set and non-empty.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the override through `lookup`
    ///
    /// All four values are taken in one pass, so the rendered block is
    /// consistent even if the source changes later.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup(S3_ENDPOINT).filter(|v| !v.is_empty())?;
        let read = |name: &str| {
            lookup(name).unwrap_or_else(|| {
                tracing::warn!(variable = name, "S3 endpoint override set without {}", name);
                String::new()
            })
        };
        Some(Self {
            endpoint,
            region: read(S3_REGION),
            access_key_id: read(S3_ACCESS_KEY_ID),
            secret_access_key: read(S3_SECRET_ACCESS_KEY),
        })
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Inputs to bootstrap rendering that come from outside the cluster spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Node agent download URL
    pub nodeup_source: String,
    /// Node agent digest; empty disables verification
    pub nodeup_source_hash: String,
    /// Object-storage override
    pub s3: Option<S3Config>,
}

impl BootstrapConfig {
    /// Create a config for the given node agent build
    #[must_use]
    pub fn new(nodeup_source: impl Into<String>, nodeup_source_hash: impl Into<String>) -> Self {
        Self {
            nodeup_source: nodeup_source.into(),
            nodeup_source_hash: nodeup_source_hash.into(),
            s3: None,
        }
    }

    /// Set the object-storage override
    #[must_use]
    pub fn with_s3(mut self, s3: S3Config) -> Self {
        self.s3 = Some(s3);
        self
    }

    /// Read the configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns error if `NODEUP_URL` is unset
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`
    ///
    /// # Errors
    ///
    /// Returns error if `NODEUP_URL` is unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let nodeup_source = lookup(NODEUP_URL_VAR)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingVariable(NODEUP_URL_VAR.to_string()))?;
        let nodeup_source_hash = lookup(NODEUP_HASH_VAR).unwrap_or_default();
        if nodeup_source_hash.is_empty() {
            tracing::warn!("{} is not set; nodes will not verify the agent download", NODEUP_HASH_VAR);
        }
        Ok(Self {
            nodeup_source,
            nodeup_source_hash,
            s3: S3Config::from_lookup(&lookup),
        })
    }
}

/// Shell snippet exporting the object-storage override
///
/// Either all four `export` lines or the empty string. The endpoint alone
/// decides: a region or credential missing from the environment is still
/// exported, with an empty value, so nodes see the same four variables
/// either way. [`S3Config::from_lookup`] logs a warning for each one.
#[must_use]
pub fn s3_env(s3: Option<&S3Config>) -> String {
    match s3 {
        Some(s3) => format!(
            "export {}={}\nexport {}={}\nexport {}={}\nexport {}={}\n",
            S3_ENDPOINT,
            s3.endpoint,
            S3_REGION,
            s3.region,
            S3_ACCESS_KEY_ID,
            s3.access_key_id,
            S3_SECRET_ACCESS_KEY,
            s3.secret_access_key,
        ),
        None => String::new(),
    }
}

/// Shell snippet configuring the egress proxy on a node
///
/// Exports `HTTP_PROXY` and `NO_PROXY`, then points docker, systemd and apt
/// at the proxy. The docker and systemd edits are guarded so re-running the
/// script does not append them twice. Empty when no proxy host is set.
#[must_use]
pub fn proxy_env(proxy: Option<&EgressProxySpec>) -> String {
    let Some(proxy) = proxy.filter(|p| p.has_host()) else {
        return String::new();
    };

    let mut snippet = String::new();
    snippet.push_str(&format!("export HTTP_PROXY={}\n", proxy.http_proxy.url()));
    snippet.push_str(&format!("export NO_PROXY={}\n", proxy.proxy_excludes));
    snippet.push_str(concat!(
        "if ! grep -qs '^export HTTP_PROXY=' /etc/default/docker; then\n",
        "cat >> /etc/default/docker << __ETC_DEFAULT_DOCKER\n",
        "export HTTP_PROXY=${HTTP_PROXY}\n",
        "export NO_PROXY=${NO_PROXY}\n",
        "__ETC_DEFAULT_DOCKER\n",
        "fi\n",
        "if ! grep -qs '^DefaultEnvironment=http_proxy=' /etc/systemd/system.conf; then\n",
        "echo DefaultEnvironment=http_proxy=${HTTP_PROXY} https_proxy=${HTTP_PROXY} ftp_proxy=${HTTP_PROXY} no_proxy=${NO_PROXY} >> /etc/systemd/system.conf\n",
        "fi\n",
        "systemctl daemon-reexec\n",
        "echo \"Acquire::http::Proxy \\\"${HTTP_PROXY}\\\";\" > /etc/apt/apt.conf.d/30proxy\n",
        "\n",
    ));
    snippet
}
