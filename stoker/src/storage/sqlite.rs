//! SQLite storage backend
//!
//! Single-file persistence for the two core tables. Schema creation runs on
//! open; every operation executes in its own implicit transaction.

use std::path::Path;
use std::str::FromStr;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use crate::artifact::Artifact;
use crate::error::{Error, ErrorKind};
use crate::id::Id;
use crate::storage::{ArtifactStorage, TemplateStorage};
use crate::task::{TaskFilter, TaskKind, TaskTemplate};

/// SQLite-backed storage for both stores
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Opens (or creates) a database file and prepares the schema
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    /// Opens a private in-memory database shared across pool connections
    pub async fn in_memory() -> Result<Self, Error> {
        let uri = format!("file:{}?mode=memory&cache=shared", ulid::Ulid::new());
        let options = SqliteConnectOptions::from_str(&uri).map_err(db_err)?;
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), Error> {
        tracing::debug!("preparing sqlite schema");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_templates (
                id TEXT PRIMARY KEY,
                command TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'shell',
                parameters TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                parent_id TEXT,
                level INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_task_templates_enabled \
             ON task_templates (enabled, created_at, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_artifacts_list \
             ON artifacts (created_at, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

fn db_err(err: sqlx::Error) -> Error {
    Error::new(ErrorKind::Internal, err)
}

fn kind_to_str(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Shell => "shell",
        TaskKind::Function => "function",
    }
}

fn str_to_kind(s: &str) -> Result<TaskKind, Error> {
    match s {
        "shell" => Ok(TaskKind::Shell),
        "function" => Ok(TaskKind::Function),
        other => Err(Error::new(
            ErrorKind::Internal,
            format!("unknown task kind in storage: {other}"))),
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| Error::new(ErrorKind::Internal, err))
}

fn row_to_template(row: SqliteRow) -> Result<TaskTemplate, Error> {
    let parameters = row
        .get::<Option<String>, _>("parameters")
        .map(|raw| serde_json::from_str(&raw))
        .transpose()?;

    Ok(TaskTemplate {
        id: row.get::<String, _>("id").parse()?,
        command: row.get("command"),
        kind: str_to_kind(&row.get::<String, _>("kind"))?,
        parameters,
        enabled: row.get("enabled"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}

fn row_to_artifact(row: SqliteRow) -> Result<Artifact, Error> {
    let parent_id = row
        .get::<Option<String>, _>("parent_id")
        .map(|raw| raw.parse())
        .transpose()?;

    Ok(Artifact {
        id: row.get::<String, _>("id").parse()?,
        parent_id,
        level: row.get::<i64, _>("level") as u32,
        data: serde_json::from_str(&row.get::<String, _>("data"))?,
        created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"))?,
    })
}

#[async_trait]
impl ArtifactStorage for SqliteStorage {
    async fn insert(&self, artifact: &Artifact) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO artifacts (id, parent_id, level, data, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(artifact.id.to_string())
        .bind(artifact.parent_id.map(|id| id.to_string()))
        .bind(artifact.level as i64)
        .bind(serde_json::to_string(&artifact.data)?)
        .bind(artifact.created_at.to_rfc3339())
        .bind(artifact.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: &Id) -> Result<Option<Artifact>, Error> {
        sqlx::query("SELECT * FROM artifacts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(row_to_artifact)
            .transpose()
    }

    async fn remove(&self, id: &Id) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM artifacts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<Artifact>, Error> {
        sqlx::query("SELECT * FROM artifacts ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(row_to_artifact)
            .collect()
    }
}

#[async_trait]
impl TemplateStorage for SqliteStorage {
    async fn insert(&self, template: &TaskTemplate) -> Result<(), Error> {
        let parameters = template
            .parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO task_templates \
             (id, command, kind, parameters, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(template.id.to_string())
        .bind(&template.command)
        .bind(kind_to_str(template.kind))
        .bind(parameters)
        .bind(template.enabled)
        .bind(template.created_at.to_rfc3339())
        .bind(template.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: &Id) -> Result<Option<TaskTemplate>, Error> {
        sqlx::query("SELECT * FROM task_templates WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .map(row_to_template)
            .transpose()
    }

    async fn update(&self, template: &TaskTemplate) -> Result<bool, Error> {
        let parameters = template
            .parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            "UPDATE task_templates \
             SET command = ?, kind = ?, parameters = ?, enabled = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&template.command)
        .bind(kind_to_str(template.kind))
        .bind(parameters)
        .bind(template.enabled)
        .bind(template.updated_at.to_rfc3339())
        .bind(template.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: &Id) -> Result<bool, Error> {
        let result = sqlx::query("DELETE FROM task_templates WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskTemplate>, Error> {
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = filter.offset as i64;

        let rows = match filter.enabled {
            Some(enabled) => {
                sqlx::query(
                    "SELECT * FROM task_templates WHERE enabled = ? \
                     ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
                )
                .bind(enabled)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM task_templates \
                     ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
        };

        rows.map_err(db_err)?
            .into_iter()
            .map(row_to_template)
            .collect()
    }
}
