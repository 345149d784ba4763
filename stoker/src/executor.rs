//! Task execution pipeline
//!
//! Turns a stored task template into a scheduled work unit: the template is
//! value-snapshotted, the work unit runs the shell command or the bound
//! callable, and exactly one artifact captures the outcome. A business
//! error inside the work still counts as `completed`; only scheduler-level
//! failures (spawn errors, artifact-write errors) fail the job.

use std::process::Stdio;
use std::sync::Arc;
use serde_json::{Value, json};
use tokio::process::Command;
use crate::artifact::Artifacts;
use crate::binder::{Frame, Injections};
use crate::error::{Error, ErrorKind};
use crate::id::Id;
use crate::registry::{CallError, Callables};
use crate::scheduler::{Completion, JobContext, Scheduler};
use crate::storage::Db;
use crate::task::{TaskKind, TaskTemplate, Tasks};

/// Executes task templates by submitting work units to the scheduler.
///
/// The scheduler and the artifact store are wired in explicitly; executing
/// without them fails with `conflict`.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use stoker::{Callables, Db, NewTask, Scheduler, TaskExecutor};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), stoker::Error> {
/// let db = Db::in_memory();
/// let executor = TaskExecutor::new(db.tasks(), Arc::new(Callables::new()))
///     .with_scheduler(Scheduler::new())
///     .with_artifacts(db.artifacts());
///
/// let task = db.tasks().create(NewTask::shell("echo hi")).await?;
/// let job_id = executor.execute(&task.id).await?;
/// # Ok(())
/// # }
/// ```
pub struct TaskExecutor {
    tasks: Tasks,
    registry: Arc<Callables>,
    scheduler: Option<Scheduler>,
    artifacts: Option<Artifacts>,
    db: Option<Db>,
}

impl TaskExecutor {
    /// Creates a new [`TaskExecutor`] over a template store and a registry
    pub fn new(tasks: Tasks, registry: Arc<Callables>) -> Self {
        Self {
            tasks,
            registry,
            scheduler: None,
            artifacts: None,
            db: None,
        }
    }

    /// Wires in the job scheduler
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Wires in the artifact store
    pub fn with_artifacts(mut self, artifacts: Artifacts) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Wires in the database handle, making `Db` and `Session`
    /// injectable into callables
    pub fn with_db(mut self, db: Db) -> Self {
        self.db = Some(db);
        self
    }

    /// Snapshots the template behind `id` and submits it for execution,
    /// returning the job id immediately.
    ///
    /// Fails synchronously with `not-found` when the template is absent,
    /// `validation-failed` when it is disabled and `conflict` when the
    /// scheduler or the artifact store is not wired in; no job is created
    /// in any of those cases.
    pub async fn execute(&self, id: &Id) -> Result<Id, Error> {
        let template = self.tasks.get(id).await?;
        if !template.enabled {
            return Err(Error::new(
                ErrorKind::Validation,
                "cannot execute disabled task"));
        }

        let scheduler = self.scheduler
            .clone()
            .ok_or_else(|| Error::new(
                ErrorKind::Conflict,
                "scheduler is not available"))?;
        let artifacts = self.artifacts
            .clone()
            .ok_or_else(|| Error::new(
                ErrorKind::Conflict,
                "artifact store is not available"))?;

        let mut injections = Injections::new()
            .with_artifacts(artifacts.clone())
            .with_scheduler(scheduler.clone());
        if let Some(db) = self.db.clone() {
            injections = injections.with_db(db);
        }

        let registry = self.registry.clone();
        let task_id = template.id;
        // Value snapshot: later template mutations never reach this work unit.
        let snapshot = template;

        let job_id = scheduler.submit(move |ctx| async move {
            let payload = match snapshot.kind {
                TaskKind::Shell => run_shell(&snapshot, &ctx).await?,
                TaskKind::Function => {
                    run_function(&snapshot, &registry, injections, &ctx).await?
                }
            };

            // canceled work writes no artifact
            let Some(data) = payload else {
                return Ok(Completion::Canceled);
            };

            let artifact = artifacts.save(data, None, 0).await?;
            ctx.attach_artifact(artifact.id);
            Ok(Completion::Finished)
        })?;

        tracing::info!(task = %task_id, job = %job_id, "task execution submitted");
        Ok(job_id)
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

/// Runs a shell template to completion, capturing both streams and the
/// exit code. Returns `None` when the job was canceled mid-flight; the
/// child is killed on drop in that case.
async fn run_shell(
    template: &TaskTemplate,
    ctx: &JobContext
) -> Result<Option<Value>, Error> {
    let mut command = shell_command(&template.command);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // A spawn failure is the only shell outcome that fails the job;
    // a non-zero exit code is recorded, not raised.
    let child = command
        .spawn()
        .map_err(|err| Error::new(
            ErrorKind::Internal,
            format!("failed to spawn `{}`: {err}", template.command)))?;

    let output = tokio::select! {
        output = child.wait_with_output() => output?,
        _ = ctx.cancelled() => {
            tracing::debug!(job = %ctx.id(), "shell task canceled");
            return Ok(None);
        }
    };

    Ok(Some(json!({
        "task": serde_json::to_value(template)?,
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
        "exit_code": output.status.code().unwrap_or(-1),
    })))
}

/// Resolves and invokes a registered callable, rendering every
/// business-level failure into the error payload. Returns `None` when the
/// job was canceled and the callable observed it.
async fn run_function(
    template: &TaskTemplate,
    registry: &Callables,
    caps: Injections,
    ctx: &JobContext
) -> Result<Option<Value>, Error> {
    let task = serde_json::to_value(template)?;

    // re-check the binding at execution time
    let callable = match registry.get(&template.command) {
        Ok(callable) => callable,
        Err(err) => {
            tracing::warn!(
                job = %ctx.id(),
                command = %template.command,
                "command does not resolve to a registered callable");
            return Ok(Some(error_payload(task, &CallError::from(err))));
        }
    };

    if ctx.is_canceled() {
        return Ok(None);
    }

    let frame = Frame::new(template.parameters.clone(), caps, ctx.token());
    let outcome = callable.invoke(frame).await;

    if ctx.is_canceled() {
        return Ok(None);
    }

    Ok(Some(match outcome {
        Ok(result) => json!({ "task": task, "result": result, "error": null }),
        Err(err) => error_payload(task, &err),
    }))
}

fn error_payload(task: Value, error: &CallError) -> Value {
    json!({ "task": task, "result": null, "error": error })
}
