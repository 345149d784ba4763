//! Immutable JSON artifacts and their store

use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::{Error, ErrorKind};
use crate::id::Id;
use crate::storage::ArtifactStorage;

/// An immutable record holding an arbitrary JSON payload.
///
/// Artifacts are created once and never rewritten by the core. The optional
/// `parent_id` and the `level` field support hierarchical grouping by
/// downstream features; execution artifacts are always roots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// The artifact identifier.
    pub id: Id,

    /// The parent artifact in a hierarchy, if any.
    pub parent_id: Option<Id>,

    /// Depth in a hierarchy; `0` for a root.
    pub level: u32,

    /// The payload, stored verbatim.
    pub data: Value,

    /// When the artifact was created.
    pub created_at: DateTime<Utc>,

    /// When the artifact was last touched.
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    /// Creates a new root-or-child [`Artifact`] around a payload
    pub(crate) fn new(data: Value, parent_id: Option<Id>, level: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Id::new(),
            parent_id,
            level,
            data,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A handle to the artifact store.
///
/// Cloning is cheap; all clones share the same backend.
#[derive(Clone)]
pub struct Artifacts {
    storage: Arc<dyn ArtifactStorage>,
}

impl std::fmt::Debug for Artifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifacts").finish_non_exhaustive()
    }
}

impl Artifacts {
    /// Creates a new [`Artifacts`] facade over a storage backend
    #[inline]
    pub fn new(storage: Arc<dyn ArtifactStorage>) -> Self {
        Self { storage }
    }

    /// Persists a payload as a fresh artifact.
    ///
    /// When `parent_id` is given it must refer to an existing artifact,
    /// otherwise the call fails with `not-found`.
    pub async fn save(
        &self,
        data: Value,
        parent_id: Option<Id>,
        level: u32
    ) -> Result<Artifact, Error> {
        if let Some(parent) = parent_id {
            if self.storage.get(&parent).await?.is_none() {
                return Err(Error::new(
                    ErrorKind::NotFound,
                    format!("parent artifact not found: {parent}")));
            }
        }

        let artifact = Artifact::new(data, parent_id, level);
        self.storage.insert(&artifact).await?;

        tracing::debug!(artifact = %artifact.id, level = artifact.level, "artifact saved");
        Ok(artifact)
    }

    /// Loads an artifact by id, failing with `not-found` when absent
    pub async fn load(&self, id: &Id) -> Result<Artifact, Error> {
        self.storage
            .get(id)
            .await?
            .ok_or_else(|| Error::new(
                ErrorKind::NotFound,
                format!("artifact not found: {id}")))
    }

    /// Deletes an artifact by id, failing with `not-found` when absent
    pub async fn delete(&self, id: &Id) -> Result<(), Error> {
        if self.storage.remove(id).await? {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::NotFound,
                format!("artifact not found: {id}")))
        }
    }

    /// Lists all artifacts ordered by creation time ascending
    pub async fn list(&self) -> Result<Vec<Artifact>, Error> {
        self.storage.list().await
    }
}
