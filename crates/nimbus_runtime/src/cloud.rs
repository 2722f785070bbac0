//! Cloud provider seam.
//!
//! The executor only needs three operations per object: look it up by
//! task name, create it, and update it in place. Provider clients live
//! behind this trait.

use async_trait::async_trait;
use nimbus_core::TaskName;
use nimbus_plan::TaskKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Resolved attributes of a cloud object
pub type Attributes = BTreeMap<String, String>;

/// A cloud object as the provider reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudRecord {
    /// Provider-assigned identifier
    pub id: String,
    /// Current attributes
    pub attributes: Attributes,
}

/// Cloud API errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// The provider rejected or failed the call
    #[error("{operation} {name}: {message}")]
    Api {
        /// Operation name
        operation: String,
        /// Task name of the object
        name: String,
        /// Provider message
        message: String,
    },

    /// Update of an object that does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Create of an object that already exists
    #[error("{0} already exists")]
    AlreadyExists(String),
}

/// A cloud provider
#[async_trait]
pub trait Cloud: Send + Sync {
    /// Look up the object a task manages
    ///
    /// # Errors
    ///
    /// Returns error if the lookup itself fails; absence is `Ok(None)`
    async fn find(&self, kind: TaskKind, name: &TaskName) -> Result<Option<CloudRecord>, CloudError>;

    /// Create the object
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails
    async fn create(
        &self,
        kind: TaskKind,
        name: &TaskName,
        attributes: &Attributes,
    ) -> Result<CloudRecord, CloudError>;

    /// Replace the attributes of an existing object
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails
    async fn update(
        &self,
        kind: TaskKind,
        name: &TaskName,
        attributes: &Attributes,
    ) -> Result<CloudRecord, CloudError>;
}
