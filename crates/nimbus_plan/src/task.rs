//! Tasks: named units of desired state.

use indexmap::{IndexMap, IndexSet};
use nimbus_core::TaskName;
use nimbus_resource::ResourceHolder;
use std::fmt;
use std::sync::Arc;

/// Kind of cloud object a task converges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskKind {
    /// Stored, normalized cluster specification
    ClusterSpec,
    /// Cluster network
    Network,
    /// API load balancer in front of the masters
    LoadBalancer,
    /// Per-group startup script
    BootstrapScript,
    /// Machine template of an instance group
    LaunchConfiguration,
    /// Scaling group running an instance group's machines
    AutoscalingGroup,
}

impl TaskKind {
    /// Kind name, also the task name prefix
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterSpec => "ClusterSpec",
            Self::Network => "Network",
            Self::LoadBalancer => "LoadBalancer",
            Self::BootstrapScript => "BootstrapScript",
            Self::LaunchConfiguration => "LaunchConfiguration",
            Self::AutoscalingGroup => "AutoscalingGroup",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value of a task attribute
#[derive(Debug, Clone)]
pub enum AttrValue {
    /// Fixed text
    Literal(String),
    /// Identifier produced by another task, resolved at execution time
    Ref(TaskName),
    /// Lazily rendered content, compared by hash
    Resource(Arc<ResourceHolder>),
}

/// A named unit of desired state
///
/// Tasks are immutable once added to a graph. Dependencies are inferred
/// from [`AttrValue::Ref`] attributes and may be added explicitly.
#[derive(Debug, Clone)]
pub struct Task {
    name: TaskName,
    kind: TaskKind,
    attributes: IndexMap<String, AttrValue>,
    dependencies: IndexSet<TaskName>,
}

impl Task {
    /// Create a task with no attributes
    #[must_use]
    pub fn new(name: TaskName, kind: TaskKind) -> Self {
        Self {
            name,
            kind,
            attributes: IndexMap::new(),
            dependencies: IndexSet::new(),
        }
    }

    /// Set a literal attribute
    #[must_use]
    pub fn with_literal(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), AttrValue::Literal(value.into()));
        self
    }

    /// Set an attribute referencing another task's identifier
    ///
    /// The referenced task becomes a dependency.
    #[must_use]
    pub fn with_ref(mut self, key: impl Into<String>, target: &TaskName) -> Self {
        self.dependencies.insert(target.clone());
        self.attributes.insert(key.into(), AttrValue::Ref(target.clone()));
        self
    }

    /// Set a resource attribute
    #[must_use]
    pub fn with_resource(mut self, key: impl Into<String>, resource: Arc<ResourceHolder>) -> Self {
        self.attributes.insert(key.into(), AttrValue::Resource(resource));
        self
    }

    /// Add an ordering-only dependency
    #[must_use]
    pub fn depends_on(mut self, target: &TaskName) -> Self {
        self.dependencies.insert(target.clone());
        self
    }

    /// Task name
    #[must_use]
    pub const fn name(&self) -> &TaskName {
        &self.name
    }

    /// Task kind
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Attributes in declaration order
    #[must_use]
    pub const fn attributes(&self) -> &IndexMap<String, AttrValue> {
        &self.attributes
    }

    /// Names of the tasks this one waits for
    #[must_use]
    pub const fn dependencies(&self) -> &IndexSet<TaskName> {
        &self.dependencies
    }
}
