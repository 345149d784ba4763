//! In-memory storage backend

use std::collections::HashMap;
use async_trait::async_trait;
use tokio::sync::RwLock;
use crate::artifact::Artifact;
use crate::error::Error;
use crate::id::Id;
use crate::storage::{ArtifactStorage, TemplateStorage};
use crate::task::{TaskFilter, TaskTemplate};

/// Process-memory backend for both stores.
///
/// The default backend: state lives for the process lifetime, which matches
/// the core's non-goal of surviving restarts. Tests get a fresh instance per
/// [`crate::Db::in_memory`] call.
#[derive(Default)]
pub struct MemoryStorage {
    artifacts: RwLock<HashMap<Id, Artifact>>,
    templates: RwLock<HashMap<Id, TaskTemplate>>,
}

impl MemoryStorage {
    /// Creates a new empty [`MemoryStorage`]
    pub fn new() -> Self {
        Default::default()
    }
}

#[async_trait]
impl ArtifactStorage for MemoryStorage {
    async fn insert(&self, artifact: &Artifact) -> Result<(), Error> {
        self.artifacts
            .write()
            .await
            .insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn get(&self, id: &Id) -> Result<Option<Artifact>, Error> {
        Ok(self.artifacts
            .read()
            .await
            .get(id)
            .cloned())
    }

    async fn remove(&self, id: &Id) -> Result<bool, Error> {
        Ok(self.artifacts
            .write()
            .await
            .remove(id)
            .is_some())
    }

    async fn list(&self) -> Result<Vec<Artifact>, Error> {
        let mut artifacts = self.artifacts
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        artifacts.sort_by_key(|a| (a.created_at, a.id));
        Ok(artifacts)
    }
}

#[async_trait]
impl TemplateStorage for MemoryStorage {
    async fn insert(&self, template: &TaskTemplate) -> Result<(), Error> {
        self.templates
            .write()
            .await
            .insert(template.id, template.clone());
        Ok(())
    }

    async fn get(&self, id: &Id) -> Result<Option<TaskTemplate>, Error> {
        Ok(self.templates
            .read()
            .await
            .get(id)
            .cloned())
    }

    async fn update(&self, template: &TaskTemplate) -> Result<bool, Error> {
        let mut templates = self.templates.write().await;
        if !templates.contains_key(&template.id) {
            return Ok(false);
        }
        templates.insert(template.id, template.clone());
        Ok(true)
    }

    async fn remove(&self, id: &Id) -> Result<bool, Error> {
        Ok(self.templates
            .write()
            .await
            .remove(id)
            .is_some())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskTemplate>, Error> {
        let mut templates = self.templates
            .read()
            .await
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect::<Vec<_>>();
        templates.sort_by_key(|t| (t.created_at, t.id));

        let templates = templates
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use super::*;

    #[tokio::test]
    async fn it_updates_only_existing_templates() {
        let storage = MemoryStorage::new();
        let template = TaskTemplate {
            id: Id::new(),
            command: "echo hi".into(),
            kind: crate::task::TaskKind::Shell,
            parameters: None,
            enabled: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        assert!(!TemplateStorage::update(&storage, &template).await.unwrap());

        TemplateStorage::insert(&storage, &template).await.unwrap();
        assert!(TemplateStorage::update(&storage, &template).await.unwrap());
    }

    #[tokio::test]
    async fn it_keeps_artifact_and_template_spaces_separate() {
        let storage = MemoryStorage::new();
        let artifact = Artifact::new(json!(1), None, 0);

        ArtifactStorage::insert(&storage, &artifact).await.unwrap();

        assert!(TemplateStorage::get(&storage, &artifact.id).await.unwrap().is_none());
        assert!(ArtifactStorage::get(&storage, &artifact.id).await.unwrap().is_some());
    }
}
