//! Campaign-scoped automation rules and their storage.
//!
//! Automation rules are the simpler rule flavor: a flat AND-only condition
//! list and an ordered action list, attached to a campaign and keyed by the
//! triggering event type.

use super::StorageResult;
use crate::engine::condition::Condition;
use crate::errors::StorageError;
use crate::events::EmailEventType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, instrument};

fn default_wait_hours() -> u64 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SendEmailConfig {
    pub template_id: String,
    #[serde(default)]
    pub delay_hours: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateContentConfig {
    pub field: String,
    pub new_value: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagConfig {
    pub tag: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_wait_hours")]
    pub duration_hours: u64,
}

/// One automation action with its typed configuration.
///
/// `Unknown` absorbs action types from newer writers; the processor executes
/// it as a warned no-op.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum AutomationAction {
    SendEmail(SendEmailConfig),
    UpdateContent(UpdateContentConfig),
    AddTag(TagConfig),
    RemoveTag(TagConfig),
    Wait(WaitConfig),
    #[serde(other)]
    Unknown,
}

impl AutomationAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendEmail(_) => "send_email",
            Self::UpdateContent(_) => "update_content",
            Self::AddTag(_) => "add_tag",
            Self::RemoveTag(_) => "remove_tag",
            Self::Wait(_) => "wait",
            Self::Unknown => "unknown",
        }
    }
}

/// A campaign automation rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: String,
    pub campaign_id: String,
    pub trigger_event: EmailEventType,
    /// Flat AND-only conditions; empty means the rule always fires.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<AutomationAction>,
    pub is_active: bool,
}

#[async_trait]
pub trait AutomationStorage: Send + Sync {
    /// Active rules whose trigger event matches.
    async fn get_active_rules(
        &self,
        event_type: EmailEventType,
    ) -> StorageResult<Vec<AutomationRule>>;

    async fn insert_rule(&self, rule: &AutomationRule) -> StorageResult<()>;

    /// Set one named field on a campaign record (the `update_content`
    /// action).
    async fn update_campaign_field(
        &self,
        campaign_id: &str,
        field: &str,
        value: &Value,
    ) -> StorageResult<()>;
}

pub struct PostgresAutomationStorage {
    pool: PgPool,
}

impl PostgresAutomationStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AutomationStorage for PostgresAutomationStorage {
    #[instrument(skip(self), fields(db.operation = "get_active_automation_rules", event = %event_type))]
    async fn get_active_rules(
        &self,
        event_type: EmailEventType,
    ) -> StorageResult<Vec<AutomationRule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, campaign_id, trigger_event, conditions, actions, is_active
            FROM automation_rules
            WHERE trigger_event = $1 AND is_active = true
            "#,
        )
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, event = %event_type, "Failed to fetch automation rules");
            StorageError::QueryFailed { source: e }
        })?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let conditions: Value = row.get("conditions");
            let conditions: Vec<Condition> =
                serde_json::from_value(conditions).map_err(|e| StorageError::DecodeFailed {
                    data_type: "AutomationRule.conditions".to_string(),
                    details: e.to_string(),
                })?;

            let actions: Value = row.get("actions");
            let actions: Vec<AutomationAction> =
                serde_json::from_value(actions).map_err(|e| StorageError::DecodeFailed {
                    data_type: "AutomationRule.actions".to_string(),
                    details: e.to_string(),
                })?;

            rules.push(AutomationRule {
                id: row.get("id"),
                campaign_id: row.get("campaign_id"),
                trigger_event: event_type,
                conditions,
                actions,
                is_active: row.get("is_active"),
            });
        }

        Ok(rules)
    }

    #[instrument(skip(self, rule), fields(db.operation = "insert_automation_rule", rule.id = %rule.id))]
    async fn insert_rule(&self, rule: &AutomationRule) -> StorageResult<()> {
        let conditions =
            serde_json::to_value(&rule.conditions).map_err(|e| StorageError::InvalidInput {
                details: format!("conditions serialization failed: {e}"),
            })?;
        let actions =
            serde_json::to_value(&rule.actions).map_err(|e| StorageError::InvalidInput {
                details: format!("actions serialization failed: {e}"),
            })?;

        sqlx::query(
            r#"
            INSERT INTO automation_rules (id, campaign_id, trigger_event, conditions, actions, is_active)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                conditions = EXCLUDED.conditions,
                actions = EXCLUDED.actions,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(&rule.id)
        .bind(&rule.campaign_id)
        .bind(rule.trigger_event.as_str())
        .bind(conditions)
        .bind(actions)
        .bind(rule.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, rule = %rule.id, "Failed to insert automation rule");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    #[instrument(skip(self, value), fields(db.operation = "update_campaign_field", campaign.id = %campaign_id, field = %field))]
    async fn update_campaign_field(
        &self,
        campaign_id: &str,
        field: &str,
        value: &Value,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET fields = jsonb_set(COALESCE(fields, '{}'::jsonb), ARRAY[$2], $3)
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, campaign = %campaign_id, "Failed to update campaign field");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }
}

/// In-memory automation store for tests and single-process deployments.
pub struct MemoryAutomationStorage {
    rules: Arc<tokio::sync::RwLock<Vec<AutomationRule>>>,
    campaign_fields: Arc<tokio::sync::RwLock<HashMap<String, HashMap<String, Value>>>>,
}

impl MemoryAutomationStorage {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(tokio::sync::RwLock::new(Vec::new())),
            campaign_fields: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    pub async fn campaign_field(&self, campaign_id: &str, field: &str) -> Option<Value> {
        let fields = self.campaign_fields.read().await;
        fields
            .get(campaign_id)
            .and_then(|f| f.get(field))
            .cloned()
    }
}

impl Default for MemoryAutomationStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AutomationStorage for MemoryAutomationStorage {
    async fn get_active_rules(
        &self,
        event_type: EmailEventType,
    ) -> StorageResult<Vec<AutomationRule>> {
        let rules = self.rules.read().await;
        Ok(rules
            .iter()
            .filter(|r| r.is_active && r.trigger_event == event_type)
            .cloned()
            .collect())
    }

    async fn insert_rule(&self, rule: &AutomationRule) -> StorageResult<()> {
        let mut rules = self.rules.write().await;
        rules.push(rule.clone());
        Ok(())
    }

    async fn update_campaign_field(
        &self,
        campaign_id: &str,
        field: &str,
        value: &Value,
    ) -> StorageResult<()> {
        let mut fields = self.campaign_fields.write().await;
        fields
            .entry(campaign_id.to_string())
            .or_default()
            .insert(field.to_string(), value.clone());
        Ok(())
    }
}
