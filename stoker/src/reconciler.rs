//! Startup reconciliation of function templates against the registry
//!
//! Deletes nothing: an orphaned template is flipped to disabled and stays
//! visible, so it can be re-enabled once the missing name is registered
//! again.

use crate::error::Error;
use crate::registry::Callables;
use crate::task::{TaskFilter, TaskKind, TaskPatch, Tasks};

/// Disables every enabled `function` template whose command does not
/// resolve in the registry. Returns the number of templates disabled.
///
/// Intended to run once from the host's startup hook, after the registry
/// is populated and before the scheduler admits work.
pub async fn reconcile(tasks: &Tasks, registry: &Callables) -> Result<usize, Error> {
    let templates = tasks.list(&TaskFilter::default()).await?;
    let mut disabled = 0;

    for template in templates {
        if template.kind != TaskKind::Function || !template.enabled {
            continue;
        }
        if registry.contains(&template.command) {
            continue;
        }

        tracing::warn!(
            task = %template.id,
            command = %template.command,
            "disabling task: command does not resolve to a registered callable");

        tasks
            .update(&template.id, TaskPatch {
                enabled: Some(false),
                ..Default::default()
            })
            .await?;
        disabled += 1;
    }

    if disabled > 0 {
        tracing::info!(count = disabled, "reconciliation disabled orphaned tasks");
    }
    Ok(disabled)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use super::*;
    use crate::storage::Db;
    use crate::task::NewTask;

    #[tokio::test]
    async fn it_disables_orphaned_function_template() {
        let db = Db::in_memory();
        let registry = Callables::new();

        let orphan = db.tasks()
            .create(NewTask::function("vanished", None))
            .await
            .unwrap();

        let disabled = reconcile(&db.tasks(), &registry).await.unwrap();
        assert_eq!(disabled, 1);

        let template = db.tasks().get(&orphan.id).await.unwrap();
        assert!(!template.enabled);
    }

    #[tokio::test]
    async fn it_keeps_resolved_function_template_enabled() {
        let db = Db::in_memory();
        let registry = Callables::new();
        registry.register("add", || async { json!(42) }).unwrap();

        let task = db.tasks()
            .create(NewTask::function("add", None))
            .await
            .unwrap();

        let disabled = reconcile(&db.tasks(), &registry).await.unwrap();
        assert_eq!(disabled, 0);
        assert!(db.tasks().get(&task.id).await.unwrap().enabled);
    }

    #[tokio::test]
    async fn it_ignores_shell_templates() {
        let db = Db::in_memory();
        let registry = Callables::new();

        let task = db.tasks()
            .create(NewTask::shell("definitely-not-a-callable"))
            .await
            .unwrap();

        let disabled = reconcile(&db.tasks(), &registry).await.unwrap();
        assert_eq!(disabled, 0);
        assert!(db.tasks().get(&task.id).await.unwrap().enabled);
    }

    #[tokio::test]
    async fn it_leaves_already_disabled_templates_untouched() {
        let db = Db::in_memory();
        let registry = Callables::new();

        let task = db.tasks()
            .create(NewTask::function("vanished", None).disabled())
            .await
            .unwrap();
        let before = db.tasks().get(&task.id).await.unwrap();

        let disabled = reconcile(&db.tasks(), &registry).await.unwrap();
        assert_eq!(disabled, 0);

        let after = db.tasks().get(&task.id).await.unwrap();
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn it_allows_reenabling_after_name_is_restored() {
        let db = Db::in_memory();
        let registry = Callables::new();

        let task = db.tasks()
            .create(NewTask::function("late", None))
            .await
            .unwrap();

        reconcile(&db.tasks(), &registry).await.unwrap();
        assert!(!db.tasks().get(&task.id).await.unwrap().enabled);

        registry.register("late", || async { json!("here now") }).unwrap();
        db.tasks()
            .update(&task.id, TaskPatch {
                enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let disabled = reconcile(&db.tasks(), &registry).await.unwrap();
        assert_eq!(disabled, 0);
        assert!(db.tasks().get(&task.id).await.unwrap().enabled);
    }
}
