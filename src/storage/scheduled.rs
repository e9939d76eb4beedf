//! Storage for delayed rule execution units.
//!
//! A scheduled unit carries everything needed to re-evaluate a delayed rule
//! when its fire time arrives: the rule and contact identities and a
//! snapshot of the triggering event. Conditions are re-evaluated at fire
//! time, not schedule time, because contact state may have changed in the
//! interim.
//!
//! The in-memory store loses pending units on restart; the PostgreSQL store
//! is the durable option.

use super::StorageResult;
use crate::errors::StorageError;
use crate::sequence::types::Trigger;
use crate::storage::automation_rule::AutomationAction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

/// The deferred work itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduledJob {
    /// Re-evaluate and execute one sequence rule for a contact.
    SequenceRule {
        sequence_id: String,
        rule_id: String,
        contact_id: String,
        execution_id: String,
        trigger: Trigger,
        event: Value,
    },
    /// Resume an automation rule's remaining actions after a wait.
    AutomationResume {
        campaign_id: String,
        event_type: crate::events::EmailEventType,
        actions: Vec<AutomationAction>,
        event: Value,
    },
}

/// A schedulable, cancellable unit of delayed work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledUnit {
    pub id: String,
    pub fire_at: DateTime<Utc>,
    pub attempt: u32,
    pub job: ScheduledJob,
}

impl ScheduledUnit {
    pub fn new(fire_at: DateTime<Utc>, job: ScheduledJob) -> Self {
        Self {
            id: format!("sched_{}", Uuid::new_v4()),
            fire_at,
            attempt: 0,
            job,
        }
    }
}

#[async_trait]
pub trait ScheduledWorkStorage: Send + Sync {
    async fn save(&self, unit: &ScheduledUnit) -> StorageResult<()>;

    /// Units whose fire time has passed, ordered by fire time.
    async fn get_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<ScheduledUnit>>;

    async fn delete(&self, unit_id: &str) -> StorageResult<()>;

    async fn get_all(&self) -> StorageResult<Vec<ScheduledUnit>>;
}

pub struct PostgresScheduledWorkStorage {
    pool: PgPool,
}

impl PostgresScheduledWorkStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_unit(row: &sqlx::postgres::PgRow) -> StorageResult<ScheduledUnit> {
        let job: Value = row.get("job");
        let job: ScheduledJob =
            serde_json::from_value(job).map_err(|e| StorageError::DecodeFailed {
                data_type: "ScheduledJob".to_string(),
                details: e.to_string(),
            })?;

        Ok(ScheduledUnit {
            id: row.get("id"),
            fire_at: row.get("fire_at"),
            attempt: row.get::<i32, _>("attempt") as u32,
            job,
        })
    }
}

#[async_trait]
impl ScheduledWorkStorage for PostgresScheduledWorkStorage {
    #[instrument(skip(self, unit), fields(db.operation = "save_scheduled_unit", unit.id = %unit.id))]
    async fn save(&self, unit: &ScheduledUnit) -> StorageResult<()> {
        let job = serde_json::to_value(&unit.job).map_err(|e| StorageError::InvalidInput {
            details: format!("job serialization failed: {e}"),
        })?;

        sqlx::query(
            r#"
            INSERT INTO scheduled_work (id, fire_at, attempt, job)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                fire_at = EXCLUDED.fire_at,
                attempt = EXCLUDED.attempt,
                job = EXCLUDED.job
            "#,
        )
        .bind(&unit.id)
        .bind(unit.fire_at)
        .bind(unit.attempt as i32)
        .bind(job)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, unit = %unit.id, "Failed to save scheduled unit");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(db.operation = "get_due_scheduled_units"))]
    async fn get_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<ScheduledUnit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, fire_at, attempt, job
            FROM scheduled_work
            WHERE fire_at <= $1
            ORDER BY fire_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, "Failed to fetch due scheduled units");
            StorageError::QueryFailed { source: e }
        })?;

        rows.iter().map(Self::row_to_unit).collect()
    }

    #[instrument(skip(self), fields(db.operation = "delete_scheduled_unit", unit.id = %unit_id))]
    async fn delete(&self, unit_id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM scheduled_work WHERE id = $1")
            .bind(unit_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = ?e, unit = %unit_id, "Failed to delete scheduled unit");
                StorageError::QueryFailed { source: e }
            })?;

        Ok(())
    }

    #[instrument(skip(self), fields(db.operation = "get_all_scheduled_units"))]
    async fn get_all(&self) -> StorageResult<Vec<ScheduledUnit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, fire_at, attempt, job
            FROM scheduled_work
            ORDER BY fire_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, "Failed to fetch scheduled units");
            StorageError::QueryFailed { source: e }
        })?;

        rows.iter().map(Self::row_to_unit).collect()
    }
}

/// In-memory scheduled-work store. Pending units do not survive a restart.
pub struct MemoryScheduledWorkStorage {
    units: Arc<tokio::sync::RwLock<HashMap<String, ScheduledUnit>>>,
}

impl MemoryScheduledWorkStorage {
    pub fn new() -> Self {
        Self {
            units: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryScheduledWorkStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduledWorkStorage for MemoryScheduledWorkStorage {
    async fn save(&self, unit: &ScheduledUnit) -> StorageResult<()> {
        let mut units = self.units.write().await;
        units.insert(unit.id.clone(), unit.clone());
        Ok(())
    }

    async fn get_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<ScheduledUnit>> {
        let units = self.units.read().await;
        let mut due: Vec<ScheduledUnit> = units
            .values()
            .filter(|u| u.fire_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|u| u.fire_at);
        Ok(due)
    }

    async fn delete(&self, unit_id: &str) -> StorageResult<()> {
        let mut units = self.units.write().await;
        units.remove(unit_id);
        Ok(())
    }

    async fn get_all(&self) -> StorageResult<Vec<ScheduledUnit>> {
        let units = self.units.read().await;
        let mut all: Vec<ScheduledUnit> = units.values().cloned().collect();
        all.sort_by_key(|u| u.fire_at);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn unit_at(fire_at: DateTime<Utc>) -> ScheduledUnit {
        ScheduledUnit::new(
            fire_at,
            ScheduledJob::SequenceRule {
                sequence_id: "SEQ-WELCOME-001".to_string(),
                rule_id: "WELCOME-EMAIL-02-OPENED".to_string(),
                contact_id: "c-1".to_string(),
                execution_id: "exec-1".to_string(),
                trigger: Trigger::OnEmailOpened,
                event: json!({"to": ["ana@example.com"]}),
            },
        )
    }

    #[tokio::test]
    async fn due_returns_only_elapsed_units_in_order() {
        let storage = MemoryScheduledWorkStorage::new();
        let now = Utc::now();

        let past_far = unit_at(now - Duration::hours(2));
        let past_near = unit_at(now - Duration::minutes(5));
        let future = unit_at(now + Duration::hours(1));

        storage.save(&past_near).await.unwrap();
        storage.save(&future).await.unwrap();
        storage.save(&past_far).await.unwrap();

        let due = storage.get_due(now).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, past_far.id);
        assert_eq!(due[1].id, past_near.id);
    }

    #[tokio::test]
    async fn delete_removes_unit() {
        let storage = MemoryScheduledWorkStorage::new();
        let unit = unit_at(Utc::now());
        storage.save(&unit).await.unwrap();
        storage.delete(&unit.id).await.unwrap();
        assert!(storage.get_all().await.unwrap().is_empty());
    }

    #[test]
    fn job_serde_round_trip() {
        let unit = unit_at(Utc::now());
        let value = serde_json::to_value(&unit).unwrap();
        assert_eq!(value["job"]["kind"], json!("sequence_rule"));
        let back: ScheduledUnit = serde_json::from_value(value).unwrap();
        match back.job {
            ScheduledJob::SequenceRule { rule_id, .. } => {
                assert_eq!(rule_id, "WELCOME-EMAIL-02-OPENED");
            }
            _ => panic!("wrong job kind"),
        }
    }
}
