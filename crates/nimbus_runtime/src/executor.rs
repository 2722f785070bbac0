//! Per-task convergence.
//!
//! Each task follows the same protocol: find the object it manages, create
//! it when absent, update it when its attributes diverge, leave it alone
//! otherwise. Dry-run and apply share the lookup and the diff; only apply
//! calls `create` and `update`.

use crate::cloud::{Attributes, Cloud, CloudError};
use indexmap::IndexMap;
use nimbus_core::TaskName;
use nimbus_plan::{AttrValue, Task};
use nimbus_resource::{RenderError, ResourceHolder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Placeholder for identifiers a dry run cannot know
pub const UNKNOWN_AFTER_APPLY: &str = "<known after apply>";

/// Execution mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Report verdicts without mutating anything
    #[default]
    DryRun,
    /// Create and update objects
    Apply,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DryRun => write!(f, "dry-run"),
            Self::Apply => write!(f, "apply"),
        }
    }
}

/// What convergence decided for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Object absent
    Create,
    /// Object present with divergent attributes
    Update {
        /// Attribute keys that differ, sorted
        changed: Vec<String>,
    },
    /// Object present and equal
    NoOp,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update { changed } => write!(f, "update ({})", changed.join(", ")),
            Self::NoOp => write!(f, "no-op"),
        }
    }
}

/// Task convergence errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Find, create or update failed
    #[error("cloud: {0}")]
    Cloud(#[from] CloudError),

    /// A resource attribute could not be rendered
    #[error("render: {0}")]
    Render(#[from] RenderError),

    /// A reference points at a task with no recorded output
    #[error("attribute {attribute} references {target}, which produced no output")]
    UnresolvedReference {
        /// Attribute key
        attribute: String,
        /// Referenced task
        target: TaskName,
    },

    /// The task ran past its deadline
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Converges single tasks against a cloud
#[derive(Clone)]
pub struct Executor {
    cloud: Arc<dyn Cloud>,
    mode: Mode,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor").field("mode", &self.mode).finish_non_exhaustive()
    }
}

impl Executor {
    /// Create an executor
    #[must_use]
    pub fn new(cloud: Arc<dyn Cloud>, mode: Mode) -> Self {
        Self { cloud, mode }
    }

    /// Execution mode
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Resolve a task's attributes to plain strings
    ///
    /// References take the identifier their target produced; a target
    /// that would only be created in a dry run resolves to
    /// [`UNKNOWN_AFTER_APPLY`]. Resources resolve to their content hash.
    /// Rendering runs on the blocking pool, so a slow generator holds up
    /// only this task.
    ///
    /// # Errors
    ///
    /// Returns error if a referenced task has no output entry or a
    /// resource fails to render
    pub async fn resolve(
        &self,
        task: &Task,
        outputs: &IndexMap<TaskName, Option<String>>,
    ) -> Result<Attributes, TaskError> {
        let mut attributes = Attributes::new();
        for (key, value) in task.attributes() {
            let resolved = match value {
                AttrValue::Literal(text) => text.clone(),
                AttrValue::Ref(target) => match outputs.get(target) {
                    Some(Some(id)) => id.clone(),
                    Some(None) => UNKNOWN_AFTER_APPLY.to_string(),
                    None => {
                        return Err(TaskError::UnresolvedReference {
                            attribute: key.clone(),
                            target: target.clone(),
                        });
                    }
                },
                AttrValue::Resource(holder) => content_hash(Arc::clone(holder)).await?,
            };
            attributes.insert(key.clone(), resolved);
        }
        Ok(attributes)
    }

    /// Converge one task
    ///
    /// Returns the verdict and the identifier of the object, or `None`
    /// when a dry run would create it.
    ///
    /// # Errors
    ///
    /// Returns error if a cloud call fails
    #[tracing::instrument(skip(self, task, attributes), fields(task = %task.name(), mode = %self.mode))]
    pub async fn converge(
        &self,
        task: &Task,
        attributes: &Attributes,
    ) -> Result<(Verdict, Option<String>), TaskError> {
        let name = task.name();
        let kind = task.kind();

        let (verdict, id) = match self.cloud.find(kind, name).await? {
            None => {
                let id = match self.mode {
                    Mode::Apply => Some(self.cloud.create(kind, name, attributes).await?.id),
                    Mode::DryRun => None,
                };
                (Verdict::Create, id)
            }
            Some(existing) => {
                let changed = diff(&existing.attributes, attributes);
                if changed.is_empty() {
                    (Verdict::NoOp, Some(existing.id))
                } else {
                    let id = match self.mode {
                        Mode::Apply => self.cloud.update(kind, name, attributes).await?.id,
                        Mode::DryRun => existing.id,
                    };
                    (Verdict::Update { changed }, Some(id))
                }
            }
        };

        tracing::debug!(verdict = %verdict, "converged");
        Ok((verdict, id))
    }
}

/// Outputs of the tasks `task` depends on, copied out of `outputs`
pub(crate) fn dependency_outputs(
    task: &Task,
    outputs: &IndexMap<TaskName, Option<String>>,
) -> IndexMap<TaskName, Option<String>> {
    task.dependencies()
        .iter()
        .filter_map(|dep| outputs.get(dep).map(|id| (dep.clone(), id.clone())))
        .collect()
}

async fn content_hash(holder: Arc<ResourceHolder>) -> Result<String, TaskError> {
    let name = holder.name().to_string();
    let hash = tokio::task::spawn_blocking(move || holder.hash())
        .await
        .map_err(|e| RenderError::Generate {
            name,
            reason: e.to_string(),
        })??;
    Ok(hash.to_hex())
}

/// Keys whose values differ between `current` and `desired`, sorted
fn diff(current: &Attributes, desired: &Attributes) -> Vec<String> {
    let mut changed: Vec<String> = desired
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();
    changed.extend(
        current
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned(),
    );
    changed.sort_unstable();
    changed
}
