//! Storage abstractions for templates and artifacts
//!
//! Both stores share one transactional database; each operation runs in its
//! own short-lived scope, so no transaction ever spans a job's execution.

use std::sync::Arc;
use async_trait::async_trait;
use crate::artifact::{Artifact, Artifacts};
use crate::binder::Session;
use crate::error::Error;
use crate::id::Id;
use crate::task::{TaskFilter, TaskTemplate, Tasks};

pub use memory::MemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

/// Persistence operations for [`Artifact`] records
#[async_trait]
pub trait ArtifactStorage: Send + Sync {
    /// Inserts a freshly created artifact
    async fn insert(&self, artifact: &Artifact) -> Result<(), Error>;

    /// Returns an artifact by id, or `None` when absent
    async fn get(&self, id: &Id) -> Result<Option<Artifact>, Error>;

    /// Removes an artifact by id; returns whether it existed
    async fn remove(&self, id: &Id) -> Result<bool, Error>;

    /// Returns all artifacts ordered by creation time ascending
    async fn list(&self) -> Result<Vec<Artifact>, Error>;
}

/// Persistence operations for [`TaskTemplate`] records
#[async_trait]
pub trait TemplateStorage: Send + Sync {
    /// Inserts a freshly created template
    async fn insert(&self, template: &TaskTemplate) -> Result<(), Error>;

    /// Returns a template by id, or `None` when absent
    async fn get(&self, id: &Id) -> Result<Option<TaskTemplate>, Error>;

    /// Replaces a stored template; returns whether it existed
    async fn update(&self, template: &TaskTemplate) -> Result<bool, Error>;

    /// Removes a template by id; returns whether it existed
    async fn remove(&self, id: &Id) -> Result<bool, Error>;

    /// Returns templates matching the filter, creation time ascending
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskTemplate>, Error>;
}

/// A handle to the database lifecycle.
///
/// Hands out store facades and per-invocation sessions. Cloning is cheap;
/// all clones share the same backend.
///
/// # Example
/// ```
/// use stoker::{Db, NewTask};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), stoker::Error> {
/// let db = Db::in_memory();
///
/// let task = db.tasks().create(NewTask::shell("echo hi")).await?;
/// assert!(task.enabled);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Db {
    artifacts: Arc<dyn ArtifactStorage>,
    templates: Arc<dyn TemplateStorage>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    /// Creates a new [`Db`] over explicit storage backends
    pub fn new(
        artifacts: Arc<dyn ArtifactStorage>,
        templates: Arc<dyn TemplateStorage>
    ) -> Self {
        Self { artifacts, templates }
    }

    /// Creates a new [`Db`] backed by process memory
    pub fn in_memory() -> Self {
        let storage = Arc::new(MemoryStorage::new());
        Self {
            artifacts: storage.clone(),
            templates: storage,
        }
    }

    /// Opens (or creates) a SQLite database file and prepares its schema
    #[cfg(feature = "sqlite")]
    pub async fn sqlite(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let storage = Arc::new(SqliteStorage::open(path).await?);
        Ok(Self {
            artifacts: storage.clone(),
            templates: storage,
        })
    }

    /// Returns the artifact store
    #[inline]
    pub fn artifacts(&self) -> Artifacts {
        Artifacts::new(self.artifacts.clone())
    }

    /// Returns the task template store
    #[inline]
    pub fn tasks(&self) -> Tasks {
        Tasks::new(self.templates.clone())
    }

    /// Checks out a [`Session`] scoped to a single invocation
    #[inline]
    pub fn session(&self) -> Session {
        Session::new(self.artifacts(), self.tasks())
    }
}
