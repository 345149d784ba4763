//! # Stoker
//! Bounded-concurrency job scheduling and task execution core for
//! service toolkits
//!
//! Task templates describe what to run — a shell command or a registered
//! in-process callable. Executing one snapshots the template, submits a
//! work unit to the scheduler and captures the outcome in an immutable
//! artifact.
//!
//! ## Dependencies
//! ```toml
//! [dependencies]
//! stoker = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::Deserialize;
//! use serde_json::json;
//! use stoker::{Args, Callables, Db, NewTask, Scheduler, TaskExecutor};
//!
//! #[derive(Deserialize)]
//! struct AddParams {
//!     a: i64,
//!     b: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), stoker::Error> {
//!     let db = Db::in_memory();
//!     let scheduler = Scheduler::new();
//!
//!     let callables = Arc::new(Callables::new());
//!     callables.register("add", |params: Args<AddParams>| async move {
//!         json!({ "result": params.a + params.b })
//!     })?;
//!
//!     let executor = TaskExecutor::new(db.tasks(), callables)
//!         .with_scheduler(scheduler.clone())
//!         .with_artifacts(db.artifacts())
//!         .with_db(db.clone());
//!
//!     let task = db.tasks()
//!         .create(NewTask::function("add", Some(json!({ "a": 10, "b": 32 }))))
//!         .await?;
//!
//!     let job_id = executor.execute(&task.id).await?;
//!     let job = scheduler.get(&job_id)?;
//!     println!("job {} is {:?}", job.id, job.status);
//!     Ok(())
//! }
//! ```

pub use artifact::{Artifact, Artifacts};
pub use binder::{
    Args, Capability, Frame, FromFrame,
    Injections, InputSource, InputSpec, Session
};
pub use error::{Error, ErrorKind};
pub use executor::TaskExecutor;
pub use id::Id;
pub use reconciler::reconcile;
pub use registry::{
    BlockingHandler, CallError, Callable,
    Callables, IntoOutcome, TaskHandler
};
pub use scheduler::{
    Completion, Job, JobContext, JobFilter,
    JobStatus, Scheduler, SchedulerOptions
};
pub use storage::Db;
pub use task::{NewTask, TaskFilter, TaskKind, TaskPatch, TaskTemplate, Tasks};

pub mod artifact;
pub mod binder;
pub mod error;
pub mod executor;
pub mod id;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod task;
