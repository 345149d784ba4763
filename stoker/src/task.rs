//! Task templates and their store

use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::{Error, ErrorKind};
use crate::id::Id;
use crate::storage::TemplateStorage;

/// How a task template's `command` is interpreted.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// The command is a shell invocation.
    #[default]
    Shell,

    /// The command names a registered callable.
    Function,
}

/// A reusable, mutable description of what to run.
///
/// `id` and `created_at` are fixed on creation; everything else can change
/// through [`Tasks::update`]. A `function` template whose command does not
/// resolve in the registry is still storable — the startup reconciler and
/// the executor re-check the binding when it matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// The template identifier.
    pub id: Id,

    /// A shell invocation or a registered callable name.
    pub command: String,

    /// How the command is interpreted.
    pub kind: TaskKind,

    /// Caller parameters, interpreted only for `function` templates.
    pub parameters: Option<Value>,

    /// Whether the template may be executed.
    pub enabled: bool,

    /// When the template was created.
    pub created_at: DateTime<Utc>,

    /// When the template was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a task template
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    /// A shell invocation or a registered callable name.
    pub command: String,

    /// How the command is interpreted; shell by default.
    #[serde(default)]
    pub kind: TaskKind,

    /// Caller parameters for `function` templates.
    #[serde(default)]
    pub parameters: Option<Value>,

    /// Whether the template may be executed; `true` by default.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

/// Fields accepted when updating a task template.
///
/// Absent fields are left untouched; passing `parameters: null` clears them.
#[derive(Default, Debug, Clone, Deserialize)]
pub struct TaskPatch {
    /// A new command, if any.
    pub command: Option<String>,

    /// A new kind, if any.
    pub kind: Option<TaskKind>,

    /// New parameters; `Value::Null` clears the stored ones.
    pub parameters: Option<Value>,

    /// A new enabled flag, if any.
    pub enabled: Option<bool>,
}

/// Listing filter for task templates
#[derive(Default, Debug, Clone)]
pub struct TaskFilter {
    /// Keep only templates whose `enabled` flag matches.
    pub enabled: Option<bool>,

    /// Skip this many templates.
    pub offset: usize,

    /// Return at most this many templates.
    pub limit: Option<usize>,
}

fn enabled_default() -> bool {
    true
}

impl NewTask {
    /// Creates a new shell task definition
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            kind: TaskKind::Shell,
            parameters: None,
            enabled: true,
        }
    }

    /// Creates a new function task definition
    pub fn function(command: impl Into<String>, parameters: Option<Value>) -> Self {
        Self {
            command: command.into(),
            kind: TaskKind::Function,
            parameters,
            enabled: true,
        }
    }

    /// Overrides the `enabled` flag
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl TaskFilter {
    /// Keeps only templates whose `enabled` flag matches
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Applies offset/limit pagination
    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    pub(crate) fn matches(&self, template: &TaskTemplate) -> bool {
        self.enabled.is_none_or(|enabled| template.enabled == enabled)
    }
}

impl TaskTemplate {
    fn create(new: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: Id::new(),
            command: new.command,
            kind: new.kind,
            parameters: new.parameters,
            enabled: new.enabled,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(&mut self, patch: TaskPatch) {
        if let Some(command) = patch.command {
            self.command = command;
        }
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        match patch.parameters {
            Some(Value::Null) => self.parameters = None,
            Some(parameters) => self.parameters = Some(parameters),
            None => {}
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        self.updated_at = Utc::now();
    }
}

fn validate_command(command: &str) -> Result<(), Error> {
    if command.trim().is_empty() {
        return Err(Error::new(ErrorKind::Validation, "command must not be empty"));
    }
    Ok(())
}

fn validate_parameters(parameters: &Option<Value>) -> Result<(), Error> {
    match parameters {
        Some(value) if !value.is_object() => Err(Error::new(
            ErrorKind::Validation,
            "parameters must be a JSON object")),
        _ => Ok(())
    }
}

/// A handle to the task template store.
///
/// Cloning is cheap; all clones share the same backend.
#[derive(Clone)]
pub struct Tasks {
    storage: Arc<dyn TemplateStorage>,
}

impl Tasks {
    /// Creates a new [`Tasks`] facade over a storage backend
    #[inline]
    pub fn new(storage: Arc<dyn TemplateStorage>) -> Self {
        Self { storage }
    }

    /// Persists a new task template
    pub async fn create(&self, new: NewTask) -> Result<TaskTemplate, Error> {
        validate_command(&new.command)?;
        validate_parameters(&new.parameters)?;

        let template = TaskTemplate::create(new);
        self.storage.insert(&template).await?;

        tracing::debug!(task = %template.id, command = %template.command, "task created");
        Ok(template)
    }

    /// Loads a template by id, failing with `not-found` when absent
    pub async fn get(&self, id: &Id) -> Result<TaskTemplate, Error> {
        self.storage
            .get(id)
            .await?
            .ok_or_else(|| Error::new(
                ErrorKind::NotFound,
                format!("task not found: {id}")))
    }

    /// Applies a patch to a stored template and returns the updated value
    pub async fn update(&self, id: &Id, patch: TaskPatch) -> Result<TaskTemplate, Error> {
        if let Some(command) = &patch.command {
            validate_command(command)?;
        }
        if patch.parameters.as_ref().is_some_and(|p| !p.is_null()) {
            validate_parameters(&patch.parameters)?;
        }

        let mut template = self.get(id).await?;
        template.apply(patch);
        self.storage.update(&template).await?;

        Ok(template)
    }

    /// Deletes a template by id, failing with `not-found` when absent
    pub async fn delete(&self, id: &Id) -> Result<(), Error> {
        if self.storage.remove(id).await? {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::NotFound,
                format!("task not found: {id}")))
        }
    }

    /// Lists templates ordered by creation time ascending
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskTemplate>, Error> {
        self.storage.list(filter).await
    }
}
