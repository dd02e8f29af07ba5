use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::model::{
    Execution, ExecutionError, ExecutionEvent, ExecutionId, ExecutionStatus, TaskRun, TaskRunId,
    TaskRunStatus, Workflow, WorkflowDefinition, WorkflowId, WorkflowStatus,
};

use super::schema::SCHEMA_SQL;
use super::{
    ExecutionSnapshot, ExecutionTransitionFields, Store, StoreError, TaskRunTransitionFields,
    WorkflowFilter,
};

/// SQLite-backed `Store`, grounded on this codebase's WAL-mode connection
/// pattern. All four orchestration tables share one pool and one file.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(database_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(sqlx::Error::Io(e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn status_str<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value)? {
        Value::String(s) => Ok(s),
        other => Err(StoreError::Serialization(serde::de::Error::custom(
            format!("expected string status, got {other}"),
        ))),
    }
}

fn status_from_str<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::String(s.to_string()))?)
}

fn ts_to_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn millis_to_ts(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn error_to_json(err: &Option<ExecutionError>) -> Result<Option<String>, StoreError> {
    match err {
        Some(e) => Ok(Some(serde_json::to_string(e)?)),
        None => Ok(None),
    }
}

fn error_from_json(s: Option<String>) -> Result<Option<ExecutionError>, StoreError> {
    match s {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let definition = serde_json::to_string(&workflow.definition)?;
        let status = status_str(&workflow.status)?;
        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, owner, definition, status, created_at, updated_at, timeout_seconds, max_retries_default)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(&workflow.owner)
        .bind(definition)
        .bind(status)
        .bind(workflow.created_at.timestamp_millis())
        .bind(workflow.updated_at.timestamp_millis())
        .bind(workflow.timeout_seconds.map(|v| v as i64))
        .bind(workflow.max_retries_default.map(|v| v as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, owner, definition, status, created_at, updated_at, timeout_seconds, max_retries_default FROM workflows WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_workflow(&row)?))
    }

    async fn list_workflows(
        &self,
        owner: &str,
        filter: &WorkflowFilter,
    ) -> Result<Vec<Workflow>, StoreError> {
        let rows = if let Some(status) = filter.status {
            let status = status_str(&status)?;
            sqlx::query(
                "SELECT id, name, owner, definition, status, created_at, updated_at, timeout_seconds, max_retries_default FROM workflows WHERE owner = ? AND status = ? ORDER BY created_at DESC",
            )
            .bind(owner)
            .bind(status)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, name, owner, definition, status, created_at, updated_at, timeout_seconds, max_retries_default FROM workflows WHERE owner = ? ORDER BY created_at DESC",
            )
            .bind(owner)
            .fetch_all(&self.pool)
            .await?
        };

        rows.iter().map(row_to_workflow).collect()
    }

    async fn update_workflow_status(
        &self,
        id: WorkflowId,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        let status_value = status_str(&status)?;
        let result = sqlx::query("UPDATE workflows SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status_value)
            .bind(Utc::now().timestamp_millis())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let inputs = serde_json::to_string(&execution.inputs)?;
        let output = serde_json::to_string(&execution.output)?;
        let status = status_str(&execution.status)?;
        let error = error_to_json(&execution.error)?;
        sqlx::query(
            r#"
            INSERT INTO executions (id, workflow_id, status, trigger_type, inputs, started_at, completed_at, duration_ms, output, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.workflow_id.to_string())
        .bind(status)
        .bind(&execution.trigger_type)
        .bind(inputs)
        .bind(ts_to_millis(execution.started_at))
        .bind(ts_to_millis(execution.completed_at))
        .bind(execution.duration_ms)
        .bind(output)
        .bind(error)
        .bind(execution.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_execution(
        &self,
        id: ExecutionId,
        expected_from: ExecutionStatus,
        to: ExecutionStatus,
        fields: ExecutionTransitionFields,
    ) -> Result<(), StoreError> {
        let from_str = status_str(&expected_from)?;
        let to_str = status_str(&to)?;
        let output = match &fields.output {
            Some(output) => serde_json::to_string(output)?,
            None => serde_json::to_string(&BTreeMap::<String, Value>::new())?,
        };
        let error = error_to_json(&fields.error)?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?,
                started_at = COALESCE(?, started_at),
                completed_at = COALESCE(?, completed_at),
                duration_ms = COALESCE(?, duration_ms),
                output = CASE WHEN ? THEN ? ELSE output END,
                error = COALESCE(?, error)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to_str)
        .bind(ts_to_millis(fields.started_at))
        .bind(ts_to_millis(fields.completed_at))
        .bind(fields.duration_ms)
        .bind(fields.output.is_some())
        .bind(output)
        .bind(error)
        .bind(id.to_string())
        .bind(from_str.clone())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StateConflict {
                expected: from_str,
                actual: current_execution_status(&self.pool, id).await?,
            });
        }
        Ok(())
    }

    async fn create_task_run(&self, task_run: &TaskRun) -> Result<(), StoreError> {
        let parameters_resolved = serde_json::to_string(&task_run.parameters_resolved)?;
        let output = match &task_run.output {
            Some(v) => Some(serde_json::to_string(v)?),
            None => None,
        };
        let status = status_str(&task_run.status)?;
        let error = error_to_json(&task_run.error)?;
        sqlx::query(
            r#"
            INSERT INTO task_runs (id, execution_id, task_name, agent_type, action, status, attempt, retry_count_limit, started_at, completed_at, duration_ms, parameters_resolved, output, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(task_run.id.to_string())
        .bind(task_run.execution_id.to_string())
        .bind(&task_run.task_name)
        .bind(&task_run.agent_type)
        .bind(&task_run.action)
        .bind(status)
        .bind(task_run.attempt as i64)
        .bind(task_run.retry_count_limit as i64)
        .bind(ts_to_millis(task_run.started_at))
        .bind(ts_to_millis(task_run.completed_at))
        .bind(task_run.duration_ms)
        .bind(parameters_resolved)
        .bind(output)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_task_run(
        &self,
        id: TaskRunId,
        expected_from: TaskRunStatus,
        to: TaskRunStatus,
        fields: TaskRunTransitionFields,
    ) -> Result<(), StoreError> {
        let from_str = status_str(&expected_from)?;
        let to_str = status_str(&to)?;
        let output = match &fields.output {
            Some(v) => Some(serde_json::to_string(v)?),
            None => None,
        };
        let error = error_to_json(&fields.error)?;

        let result = sqlx::query(
            r#"
            UPDATE task_runs
            SET status = ?,
                started_at = COALESCE(?, started_at),
                completed_at = COALESCE(?, completed_at),
                duration_ms = COALESCE(?, duration_ms),
                output = COALESCE(?, output),
                error = COALESCE(?, error),
                attempt = COALESCE(?, attempt)
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to_str)
        .bind(ts_to_millis(fields.started_at))
        .bind(ts_to_millis(fields.completed_at))
        .bind(fields.duration_ms)
        .bind(output)
        .bind(error)
        .bind(fields.attempt.map(|a| a as i64))
        .bind(id.to_string())
        .bind(from_str.clone())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StateConflict {
                expected: from_str,
                actual: current_task_run_status(&self.pool, id).await?,
            });
        }
        Ok(())
    }

    async fn append_event(&self, event: &ExecutionEvent) -> Result<u64, StoreError> {
        let kind = status_str(&event.kind)?;
        let error = error_to_json(&event.error)?;
        let result = sqlx::query(
            r#"
            INSERT INTO execution_events (execution_id, ts, kind, task_name, attempt, error, output_digest)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.execution_id.to_string())
        .bind(event.ts.timestamp_millis())
        .bind(kind)
        .bind(&event.task_name)
        .bind(event.attempt.map(|a| a as i64))
        .bind(error)
        .bind(&event.output_digest)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid() as u64)
    }

    async fn load_execution(&self, id: ExecutionId) -> Result<ExecutionSnapshot, StoreError> {
        let row = sqlx::query(
            "SELECT id, workflow_id, status, trigger_type, inputs, started_at, completed_at, duration_ms, output, error, created_at FROM executions WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        let execution = row_to_execution(&row)?;

        let task_run_rows = sqlx::query(
            "SELECT id, execution_id, task_name, agent_type, action, status, attempt, retry_count_limit, started_at, completed_at, duration_ms, parameters_resolved, output, error FROM task_runs WHERE execution_id = ?",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let task_runs = task_run_rows
            .iter()
            .map(row_to_task_run)
            .collect::<Result<Vec<_>, _>>()?;

        let event_rows = sqlx::query(
            "SELECT execution_id, seq, ts, kind, task_name, attempt, error, output_digest FROM execution_events WHERE execution_id = ? ORDER BY seq ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let events = event_rows
            .iter()
            .map(row_to_event)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ExecutionSnapshot {
            execution,
            task_runs,
            events,
        })
    }

    async fn list_incomplete_executions(&self) -> Result<Vec<Execution>, StoreError> {
        let running = status_str(&ExecutionStatus::Running)?;
        let cancelling = status_str(&ExecutionStatus::Cancelling)?;
        let rows = sqlx::query(
            "SELECT id, workflow_id, status, trigger_type, inputs, started_at, completed_at, duration_ms, output, error, created_at FROM executions WHERE status = ? OR status = ?",
        )
        .bind(running)
        .bind(cancelling)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_execution).collect()
    }
}

async fn current_execution_status(pool: &SqlitePool, id: ExecutionId) -> Result<String, StoreError> {
    let row = sqlx::query("SELECT status FROM executions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row
        .map(|r| r.get::<String, _>("status"))
        .unwrap_or_else(|| "unknown".to_string()))
}

async fn current_task_run_status(pool: &SqlitePool, id: TaskRunId) -> Result<String, StoreError> {
    let row = sqlx::query("SELECT status FROM task_runs WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row
        .map(|r| r.get::<String, _>("status"))
        .unwrap_or_else(|| "unknown".to_string()))
}

fn row_to_workflow(row: &sqlx::sqlite::SqliteRow) -> Result<Workflow, StoreError> {
    let id: String = row.get("id");
    let definition: String = row.get("definition");
    let status: String = row.get("status");
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");
    let timeout_seconds: Option<i64> = row.get("timeout_seconds");
    let max_retries_default: Option<i64> = row.get("max_retries_default");

    Ok(Workflow {
        id: id.parse().map_err(|_| StoreError::NotFound(id.clone()))?,
        name: row.get("name"),
        owner: row.get("owner"),
        definition: serde_json::from_str::<WorkflowDefinition>(&definition)?,
        status: status_from_str(&status)?,
        created_at: millis_to_ts(Some(created_at)).unwrap_or_else(Utc::now),
        updated_at: millis_to_ts(Some(updated_at)).unwrap_or_else(Utc::now),
        timeout_seconds: timeout_seconds.map(|v| v as u64),
        max_retries_default: max_retries_default.map(|v| v as u32),
    })
}

fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> Result<Execution, StoreError> {
    let id: String = row.get("id");
    let workflow_id: String = row.get("workflow_id");
    let status: String = row.get("status");
    let inputs: String = row.get("inputs");
    let output: String = row.get("output");
    let error: Option<String> = row.get("error");
    let created_at: i64 = row.get("created_at");

    Ok(Execution {
        id: id.parse().map_err(|_| StoreError::NotFound(id.clone()))?,
        workflow_id: workflow_id
            .parse()
            .map_err(|_| StoreError::NotFound(workflow_id.clone()))?,
        status: status_from_str(&status)?,
        trigger_type: row.get("trigger_type"),
        inputs: serde_json::from_str(&inputs)?,
        started_at: millis_to_ts(row.get("started_at")),
        completed_at: millis_to_ts(row.get("completed_at")),
        duration_ms: row.get("duration_ms"),
        output: serde_json::from_str(&output)?,
        error: error_from_json(error)?,
        created_at: millis_to_ts(Some(created_at)).unwrap_or_else(Utc::now),
    })
}

fn row_to_task_run(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRun, StoreError> {
    let id: String = row.get("id");
    let execution_id: String = row.get("execution_id");
    let status: String = row.get("status");
    let attempt: i64 = row.get("attempt");
    let retry_count_limit: i64 = row.get("retry_count_limit");
    let parameters_resolved: String = row.get("parameters_resolved");
    let output: Option<String> = row.get("output");
    let error: Option<String> = row.get("error");

    Ok(TaskRun {
        id: id.parse().map_err(|_| StoreError::NotFound(id.clone()))?,
        execution_id: execution_id
            .parse()
            .map_err(|_| StoreError::NotFound(execution_id.clone()))?,
        task_name: row.get("task_name"),
        agent_type: row.get("agent_type"),
        action: row.get("action"),
        status: status_from_str(&status)?,
        attempt: attempt as u32,
        retry_count_limit: retry_count_limit as u32,
        started_at: millis_to_ts(row.get("started_at")),
        completed_at: millis_to_ts(row.get("completed_at")),
        duration_ms: row.get("duration_ms"),
        parameters_resolved: serde_json::from_str(&parameters_resolved)?,
        output: match output {
            Some(o) => Some(serde_json::from_str(&o)?),
            None => None,
        },
        error: error_from_json(error)?,
    })
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionEvent, StoreError> {
    let execution_id: String = row.get("execution_id");
    let seq: i64 = row.get("seq");
    let ts: i64 = row.get("ts");
    let kind: String = row.get("kind");
    let attempt: Option<i64> = row.get("attempt");
    let error: Option<String> = row.get("error");

    Ok(ExecutionEvent {
        execution_id: execution_id
            .parse()
            .map_err(|_| StoreError::NotFound(execution_id.clone()))?,
        seq: seq as u64,
        ts: millis_to_ts(Some(ts)).unwrap_or_else(Utc::now),
        kind: status_from_str(&kind)?,
        task_name: row.get("task_name"),
        attempt: attempt.map(|a| a as u32),
        error: error_from_json(error)?,
        output_digest: row.get("output_digest"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Execution, OnError, TaskSpec, Workflow, WorkflowDefinition};
    use std::collections::BTreeMap;

    fn sample_workflow() -> Workflow {
        let definition = WorkflowDefinition {
            tasks: vec![TaskSpec {
                name: "open".to_string(),
                agent_type: "browser".to_string(),
                action: "navigate".to_string(),
                parameters: serde_json::json!({ "url": "https://example.com" }),
                depends_on: vec![],
                timeout_seconds: None,
                retry_count: None,
                on_error: None,
            }],
            variables: BTreeMap::new(),
            on_error: OnError::Stop,
        };
        Workflow::new("demo".to_string(), "alice".to_string(), definition, None, None)
    }

    #[tokio::test]
    async fn round_trips_a_workflow() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let workflow = sample_workflow();
        store.create_workflow(&workflow).await.unwrap();

        let fetched = store.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, workflow.name);
        assert_eq!(fetched.definition.tasks.len(), 1);
    }

    #[tokio::test]
    async fn cas_transition_detects_conflict() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let workflow = sample_workflow();
        store.create_workflow(&workflow).await.unwrap();

        let execution = Execution::new(workflow.id, BTreeMap::new(), "manual".to_string());
        store.create_execution(&execution).await.unwrap();

        store
            .transition_execution(
                execution.id,
                ExecutionStatus::Queued,
                ExecutionStatus::Running,
                ExecutionTransitionFields {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let conflict = store
            .transition_execution(
                execution.id,
                ExecutionStatus::Queued,
                ExecutionStatus::Running,
                ExecutionTransitionFields::default(),
            )
            .await;
        assert!(matches!(conflict, Err(StoreError::StateConflict { .. })));
    }

    #[tokio::test]
    async fn append_event_assigns_increasing_sequence_numbers() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let workflow = sample_workflow();
        store.create_workflow(&workflow).await.unwrap();
        let execution = Execution::new(workflow.id, BTreeMap::new(), "manual".to_string());
        store.create_execution(&execution).await.unwrap();

        let seq1 = store
            .append_event(&ExecutionEvent::new(
                execution.id,
                crate::model::EventKind::ExecutionStarted,
            ))
            .await
            .unwrap();
        let seq2 = store
            .append_event(&ExecutionEvent::new(
                execution.id,
                crate::model::EventKind::ExecutionCompleted,
            ))
            .await
            .unwrap();
        assert!(seq2 > seq1);

        let snapshot = store.load_execution(execution.id).await.unwrap();
        assert_eq!(snapshot.events.len(), 2);
    }
}
