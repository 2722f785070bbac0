//! Bootstrap script rendering.

use crate::env::{proxy_env, s3_env, BootstrapConfig};
use nimbus_resource::{FunctionError, FunctionMap, RenderError, ResourceHolder, TemplateFunction, TemplateResource};
use nimbus_spec::{EgressProxySpec, InstanceGroup, NodeUpConfigBuilder};
use std::fmt;
use std::sync::Arc;

const TEMPLATE_NAME: &str = "nodeup.sh";
const TEMPLATE_SOURCE: &str = include_str!("../templates/nodeup.sh");

/// Everything a template function may read while rendering one group
///
/// Built once per render and shared, read-only, by all template functions.
pub struct RenderContext {
    config: BootstrapConfig,
    group: InstanceGroup,
    proxy: Option<EgressProxySpec>,
    builder: Arc<dyn NodeUpConfigBuilder>,
}

impl RenderContext {
    fn node_up_source(&self) -> String {
        self.config.nodeup_source.clone()
    }

    fn node_up_source_hash(&self) -> String {
        self.config.nodeup_source_hash.clone()
    }

    fn kube_env(&self) -> Result<String, FunctionError> {
        let config = self
            .builder
            .build(&self.group)
            .map_err(|e| FunctionError::new("KubeEnv", e.to_string()))?;
        config
            .to_yaml()
            .map_err(|e| FunctionError::new("KubeEnv", e.to_string()))
    }

    fn s3_env(&self) -> String {
        s3_env(self.config.s3.as_ref())
    }

    fn proxy_env(&self) -> String {
        proxy_env(self.proxy.as_ref())
    }

    fn functions(self: &Arc<Self>) -> FunctionMap {
        let mut functions = FunctionMap::new();
        let mut register = |name: &str, f: TemplateFunction| {
            functions.insert(name.to_string(), f);
        };

        let ctx = Arc::clone(self);
        register("NodeUpSource", Arc::new(move || Ok::<_, FunctionError>(ctx.node_up_source())));
        let ctx = Arc::clone(self);
        register("NodeUpSourceHash", Arc::new(move || Ok::<_, FunctionError>(ctx.node_up_source_hash())));
        let ctx = Arc::clone(self);
        register("KubeEnv", Arc::new(move || ctx.kube_env()));
        let ctx = Arc::clone(self);
        register("S3Env", Arc::new(move || Ok::<_, FunctionError>(ctx.s3_env())));
        let ctx = Arc::clone(self);
        register("ProxyEnv", Arc::new(move || Ok::<_, FunctionError>(ctx.proxy_env())));

        functions
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("config", &self.config)
            .field("group", &self.group.name)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

/// Renders per-instance-group startup scripts
#[derive(Clone)]
pub struct BootstrapScript {
    config: BootstrapConfig,
    builder: Arc<dyn NodeUpConfigBuilder>,
}

impl BootstrapScript {
    /// Create a renderer
    #[must_use]
    pub fn new(config: BootstrapConfig, builder: Arc<dyn NodeUpConfigBuilder>) -> Self {
        Self { config, builder }
    }

    /// Bootstrap configuration in use
    #[must_use]
    pub const fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Startup script for `group`
    ///
    /// Bastions get no script and yield `Ok(None)`. Otherwise the returned
    /// holder renders on first read; failures of the node configuration
    /// builder surface then, and only for this group.
    ///
    /// # Errors
    ///
    /// Returns error if the script template does not compile
    pub fn resource_nodeup(
        &self,
        group: &InstanceGroup,
        proxy: Option<&EgressProxySpec>,
    ) -> Result<Option<ResourceHolder>, RenderError> {
        if group.is_bastion() {
            tracing::debug!(group = %group.name, "bastion group, no bootstrap script");
            return Ok(None);
        }

        let ctx = Arc::new(RenderContext {
            config: self.config.clone(),
            group: group.clone(),
            proxy: proxy.cloned(),
            builder: Arc::clone(&self.builder),
        });
        let template = TemplateResource::new(TEMPLATE_NAME, TEMPLATE_SOURCE, ctx.functions())?;
        Ok(Some(ResourceHolder::from_template(
            format!("nodeup-{}", group.name),
            template,
        )))
    }
}

impl fmt::Debug for BootstrapScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapScript")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
