//! Storage for per-contact sequence executions.

use super::StorageResult;
use crate::errors::StorageError;
use crate::sequence::types::{ExecutionLogEntry, ExecutionStatus, SequenceExecution};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, instrument};

#[async_trait]
pub trait ExecutionStorage: Send + Sync {
    async fn get(&self, execution_id: &str) -> StorageResult<Option<SequenceExecution>>;

    /// The live (non-terminal) execution for a `(sequence, contact)` pair.
    ///
    /// At most one such execution exists at any time; `start_sequence` relies
    /// on this lookup to enforce that invariant.
    async fn get_active(
        &self,
        sequence_id: &str,
        contact_id: &str,
    ) -> StorageResult<Option<SequenceExecution>>;

    /// All executions for a contact in `Active` status. Paused executions are
    /// excluded: they must not take part in rule matching.
    async fn list_active_for_contact(
        &self,
        contact_id: &str,
    ) -> StorageResult<Vec<SequenceExecution>>;

    /// Insert or replace an execution record.
    async fn save(&self, execution: &SequenceExecution) -> StorageResult<()>;

    async fn append_log(
        &self,
        execution_id: &str,
        entry: &ExecutionLogEntry,
    ) -> StorageResult<()>;
}

pub struct PostgresExecutionStorage {
    pool: PgPool,
}

impl PostgresExecutionStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &sqlx::postgres::PgRow) -> StorageResult<SequenceExecution> {
        let status_raw: String = row.get("status");
        let status =
            ExecutionStatus::parse(&status_raw).ok_or_else(|| StorageError::DecodeFailed {
                data_type: "SequenceExecution".to_string(),
                details: format!("unknown status: {status_raw}"),
            })?;

        let variables: Value = row.get("variables");
        let variables = match variables {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let log_value: Value = row.get("execution_log");
        let execution_log: Vec<ExecutionLogEntry> =
            serde_json::from_value(log_value).map_err(|e| StorageError::DecodeFailed {
                data_type: "ExecutionLogEntry".to_string(),
                details: e.to_string(),
            })?;

        Ok(SequenceExecution {
            id: row.get("id"),
            sequence_id: row.get("sequence_id"),
            contact_id: row.get("contact_id"),
            status,
            current_step: row.get::<i32, _>("current_step") as u32,
            total_steps: row.get::<i32, _>("total_steps") as u32,
            started_at: row.get("started_at"),
            last_action_at: row.get("last_action_at"),
            completed_at: row.get("completed_at"),
            variables,
            execution_log,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, sequence_id, contact_id, status, current_step, total_steps,
           started_at, last_action_at, completed_at, variables, execution_log
    FROM sequence_executions
"#;

#[async_trait]
impl ExecutionStorage for PostgresExecutionStorage {
    #[instrument(skip(self), fields(db.operation = "get_execution", execution.id = %execution_id))]
    async fn get(&self, execution_id: &str) -> StorageResult<Option<SequenceExecution>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = ?e, execution = %execution_id, "Failed to get execution");
                StorageError::QueryFailed { source: e }
            })?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    #[instrument(skip(self), fields(db.operation = "get_active_execution"))]
    async fn get_active(
        &self,
        sequence_id: &str,
        contact_id: &str,
    ) -> StorageResult<Option<SequenceExecution>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE sequence_id = $1 AND contact_id = $2 AND status IN ('active', 'paused')"
        ))
        .bind(sequence_id)
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, sequence = %sequence_id, contact = %contact_id, "Failed to get active execution");
            StorageError::QueryFailed { source: e }
        })?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    #[instrument(skip(self), fields(db.operation = "list_active_executions", contact.id = %contact_id))]
    async fn list_active_for_contact(
        &self,
        contact_id: &str,
    ) -> StorageResult<Vec<SequenceExecution>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE contact_id = $1 AND status = 'active' ORDER BY started_at"
        ))
        .bind(contact_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, contact = %contact_id, "Failed to list active executions");
            StorageError::QueryFailed { source: e }
        })?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    #[instrument(skip(self, execution), fields(db.operation = "save_execution", execution.id = %execution.id))]
    async fn save(&self, execution: &SequenceExecution) -> StorageResult<()> {
        let log_value =
            serde_json::to_value(&execution.execution_log).map_err(|e| StorageError::InvalidInput {
                details: format!("execution log serialization failed: {e}"),
            })?;

        sqlx::query(
            r#"
            INSERT INTO sequence_executions
                (id, sequence_id, contact_id, status, current_step, total_steps,
                 started_at, last_action_at, completed_at, variables, execution_log)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                current_step = EXCLUDED.current_step,
                last_action_at = EXCLUDED.last_action_at,
                completed_at = EXCLUDED.completed_at,
                variables = EXCLUDED.variables,
                execution_log = EXCLUDED.execution_log
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.sequence_id)
        .bind(&execution.contact_id)
        .bind(execution.status.as_str())
        .bind(execution.current_step as i32)
        .bind(execution.total_steps as i32)
        .bind(execution.started_at)
        .bind(execution.last_action_at)
        .bind(execution.completed_at)
        .bind(Value::Object(execution.variables.clone()))
        .bind(log_value)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, execution = %execution.id, "Failed to save execution");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    #[instrument(skip(self, entry), fields(db.operation = "append_execution_log", execution.id = %execution_id))]
    async fn append_log(
        &self,
        execution_id: &str,
        entry: &ExecutionLogEntry,
    ) -> StorageResult<()> {
        let entry_value = serde_json::to_value(entry).map_err(|e| StorageError::InvalidInput {
            details: format!("log entry serialization failed: {e}"),
        })?;

        sqlx::query(
            r#"
            UPDATE sequence_executions
            SET execution_log = execution_log || $2::jsonb
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(entry_value)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, execution = %execution_id, "Failed to append execution log");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }
}

/// In-memory execution store for tests and single-process deployments.
pub struct MemoryExecutionStorage {
    executions: Arc<tokio::sync::RwLock<HashMap<String, SequenceExecution>>>,
}

impl MemoryExecutionStorage {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryExecutionStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStorage for MemoryExecutionStorage {
    async fn get(&self, execution_id: &str) -> StorageResult<Option<SequenceExecution>> {
        let executions = self.executions.read().await;
        Ok(executions.get(execution_id).cloned())
    }

    async fn get_active(
        &self,
        sequence_id: &str,
        contact_id: &str,
    ) -> StorageResult<Option<SequenceExecution>> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .find(|e| {
                e.sequence_id == sequence_id
                    && e.contact_id == contact_id
                    && !e.status.is_terminal()
            })
            .cloned())
    }

    async fn list_active_for_contact(
        &self,
        contact_id: &str,
    ) -> StorageResult<Vec<SequenceExecution>> {
        let executions = self.executions.read().await;
        let mut active: Vec<SequenceExecution> = executions
            .values()
            .filter(|e| e.contact_id == contact_id && e.status == ExecutionStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|e| e.started_at);
        Ok(active)
    }

    async fn save(&self, execution: &SequenceExecution) -> StorageResult<()> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn append_log(
        &self,
        execution_id: &str,
        entry: &ExecutionLogEntry,
    ) -> StorageResult<()> {
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(execution_id) {
            execution.execution_log.push(entry.clone());
        }
        Ok(())
    }
}
