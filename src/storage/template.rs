//! Storage for organization email templates.
//!
//! Organization templates override the built-in definitions that live in the
//! mailer. The reserved `_header` and `_footer` entries, when enabled, wrap
//! rendered content for branding.

use super::StorageResult;
use crate::errors::StorageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredTemplate {
    pub subject: String,
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_fallback: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[async_trait]
pub trait TemplateStorage: Send + Sync {
    /// All templates for an organization, keyed by template name.
    async fn get_organization_templates(
        &self,
        organization_id: &str,
    ) -> StorageResult<HashMap<String, StoredTemplate>>;
}

pub struct PostgresTemplateStorage {
    pool: PgPool,
}

impl PostgresTemplateStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStorage for PostgresTemplateStorage {
    #[instrument(skip(self), fields(db.operation = "get_organization_templates", organization = %organization_id))]
    async fn get_organization_templates(
        &self,
        organization_id: &str,
    ) -> StorageResult<HashMap<String, StoredTemplate>> {
        let rows = sqlx::query(
            r#"
            SELECT name, subject_template, html_template, text_template, enabled
            FROM email_templates
            WHERE organization_id = $1
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, organization = %organization_id, "Failed to load organization templates");
            StorageError::QueryFailed { source: e }
        })?;

        let templates: HashMap<String, StoredTemplate> = rows
            .into_iter()
            .map(|row| {
                let name: String = row.get("name");
                let template = StoredTemplate {
                    subject: row.get("subject_template"),
                    html: row.get("html_template"),
                    text_fallback: row.get("text_template"),
                    enabled: row.get("enabled"),
                };
                (name, template)
            })
            .collect();

        debug!(count = templates.len(), "Loaded organization templates");
        Ok(templates)
    }
}

/// In-memory template store for tests and single-process deployments.
pub struct MemoryTemplateStorage {
    templates: Arc<tokio::sync::RwLock<HashMap<String, HashMap<String, StoredTemplate>>>>,
}

impl MemoryTemplateStorage {
    pub fn new() -> Self {
        Self {
            templates: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(
        &self,
        organization_id: &str,
        name: &str,
        template: StoredTemplate,
    ) {
        let mut templates = self.templates.write().await;
        templates
            .entry(organization_id.to_string())
            .or_default()
            .insert(name.to_string(), template);
    }
}

impl Default for MemoryTemplateStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TemplateStorage for MemoryTemplateStorage {
    async fn get_organization_templates(
        &self,
        organization_id: &str,
    ) -> StorageResult<HashMap<String, StoredTemplate>> {
        let templates = self.templates.read().await;
        Ok(templates.get(organization_id).cloned().unwrap_or_default())
    }
}
