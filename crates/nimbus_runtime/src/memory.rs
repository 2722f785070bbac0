//! In-memory cloud.
//!
//! Keeps objects in a map keyed by task name. Counts calls, tracks peak
//! concurrency, and can inject latency and failures, which makes it the
//! executor's test double. Its state can be saved to and loaded from a JSON
//! file, so it also backs the CLI.

use crate::cloud::{Attributes, Cloud, CloudError, CloudRecord};
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use nimbus_core::TaskName;
use nimbus_plan::TaskKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Kind name
    pub kind: String,
    /// Object state
    pub record: CloudRecord,
}

/// Serializable state of a [`MemoryCloud`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Objects by task name
    pub objects: IndexMap<String, StoredObject>,
}

/// Calls made so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `find` calls
    pub finds: usize,
    /// `create` calls
    pub creates: usize,
    /// `update` calls
    pub updates: usize,
}

impl CallCounts {
    /// Number of mutating calls
    #[must_use]
    pub const fn mutations(&self) -> usize {
        self.creates + self.updates
    }
}

/// In-memory [`Cloud`]
#[derive(Debug, Default)]
pub struct MemoryCloud {
    objects: RwLock<IndexMap<String, StoredObject>>,
    finds: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    latency: Option<Duration>,
    failing: IndexSet<String>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryCloud {
    /// Create an empty cloud
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a cloud from a snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        Self {
            objects: RwLock::new(snapshot.objects),
            ..Self::default()
        }
    }

    /// Delay every call by `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every call for task `name` fail
    #[must_use]
    pub fn with_failure(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    /// Calls made so far
    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            finds: self.finds.load(Ordering::SeqCst),
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
        }
    }

    /// Highest number of calls observed in progress at once
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Copy of the current state
    pub async fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            objects: self.objects.read().await.clone(),
        }
    }

    /// Current object for a task, bypassing call accounting
    pub async fn get(&self, name: &str) -> Option<CloudRecord> {
        self.objects.read().await.get(name).map(|o| o.record.clone())
    }

    /// Load state from a JSON file; a missing file yields an empty cloud
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let snapshot: MemorySnapshot = serde_json::from_slice(&bytes)?;
                tracing::debug!(path = %path.display(), objects = snapshot.objects.len(), "loaded state");
                Ok(Self::from_snapshot(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e),
        }
    }

    /// Save state to a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub async fn save(&self, path: &Path) -> std::io::Result<()> {
        let snapshot = self.snapshot().await;
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(path, bytes).await
    }

    async fn enter(
        &self,
        counter: &AtomicUsize,
        operation: &str,
        name: &TaskName,
    ) -> Result<InFlight<'_>, CloudError> {
        counter.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.contains(name.as_str()) {
            return Err(CloudError::Api {
                operation: operation.to_string(),
                name: name.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(guard)
    }
}

#[async_trait]
impl Cloud for MemoryCloud {
    async fn find(&self, _kind: TaskKind, name: &TaskName) -> Result<Option<CloudRecord>, CloudError> {
        let _guard = self.enter(&self.finds, "find", name).await?;
        Ok(self.get(name.as_str()).await)
    }

    async fn create(
        &self,
        kind: TaskKind,
        name: &TaskName,
        attributes: &Attributes,
    ) -> Result<CloudRecord, CloudError> {
        let _guard = self.enter(&self.creates, "create", name).await?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(name.as_str()) {
            return Err(CloudError::AlreadyExists(name.to_string()));
        }
        let id = Uuid::new_v4().simple().to_string();
        let record = CloudRecord {
            id: format!("{}-{}", kind.as_str().to_lowercase(), &id[..12]),
            attributes: attributes.clone(),
        };
        objects.insert(
            name.to_string(),
            StoredObject {
                kind: kind.as_str().to_string(),
                record: record.clone(),
            },
        );
        Ok(record)
    }

    async fn update(
        &self,
        _kind: TaskKind,
        name: &TaskName,
        attributes: &Attributes,
    ) -> Result<CloudRecord, CloudError> {
        let _guard = self.enter(&self.updates, "update", name).await?;
        let mut objects = self.objects.write().await;
        let Some(object) = objects.get_mut(name.as_str()) else {
            return Err(CloudError::NotFound(name.to_string()));
        };
        object.record.attributes = attributes.clone();
        Ok(object.record.clone())
    }
}
