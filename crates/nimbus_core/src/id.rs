//! Identifiers for NIMBUS entities.
//!
//! A reconciliation pass is identified by a random [`RunId`]. Tasks are
//! identified by a [`TaskName`], which is the only identity that survives
//! between passes: it is matched against previously-applied cloud state.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Run identifier - identifies a single reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Create a new random RunId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from UUID bytes
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

/// Task name - unique within a pass, stable across passes
///
/// Names are conventionally `<Kind>/<resource name>`, e.g.
/// `LaunchConfiguration/nodes.example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskName(String);

impl TaskName {
    /// Separator between the kind prefix and the resource name
    pub const SEPARATOR: char = '/';

    /// Create a task name from a raw string
    ///
    /// # Errors
    ///
    /// Returns error if the name is empty or contains whitespace
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::InvalidName {
                reason: "task name must not be empty".to_string(),
            });
        }
        if name.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidName {
                reason: format!("task name {:?} contains whitespace", name),
            });
        }
        Ok(Self(name))
    }

    /// Compose a task name from a kind and a resource name
    ///
    /// # Errors
    ///
    /// Returns error if the composed name is invalid
    pub fn of(kind: &str, name: &str) -> CoreResult<Self> {
        if name.is_empty() {
            return Err(CoreError::InvalidName {
                reason: format!("{} resource name must not be empty", kind),
            });
        }
        Self::new(format!("{}{}{}", kind, Self::SEPARATOR, name))
    }

    /// Get the name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind prefix, if the name was composed with [`TaskName::of`]
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.0.split_once(Self::SEPARATOR).map(|(kind, _)| kind)
    }

    /// Resource part of the name (the whole name when there is no kind prefix)
    #[must_use]
    pub fn resource(&self) -> &str {
        self.0
            .split_once(Self::SEPARATOR)
            .map_or(self.0.as_str(), |(_, rest)| rest)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TaskName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TaskName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaskName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TaskName {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskName> for String {
    fn from(name: TaskName) -> Self {
        name.0
    }
}
