use super::StorageResult;
use crate::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Delivery standing of a contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Active,
    Unsubscribed,
    Bounced,
    Complained,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Unsubscribed => "unsubscribed",
            Self::Bounced => "bounced",
            Self::Complained => "complained",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "unsubscribed" => Some(Self::Unsubscribed),
            "bounced" => Some(Self::Bounced),
            "complained" => Some(Self::Complained),
            _ => None,
        }
    }
}

/// A contact record.
///
/// The tag list is set-like: adds are idempotent and removes are
/// absent-safe. Tag membership doubles as sequence-step state for the
/// sequence engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: ContactStatus,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(id: impl Into<String>, email: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            name,
            tags: Vec::new(),
            status: ContactStatus::Active,
            custom_fields: Map::new(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ContactStorage: Send + Sync {
    async fn get_by_email(&self, email: &str) -> StorageResult<Option<Contact>>;
    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Contact>>;
    async fn insert(&self, contact: &Contact) -> StorageResult<()>;
    /// Replace the full tag list.
    async fn update_tags(&self, id: &str, tags: &[String]) -> StorageResult<()>;
    /// Set one named custom field.
    async fn update_field(&self, id: &str, field: &str, value: &Value) -> StorageResult<()>;
    async fn update_status(&self, id: &str, status: ContactStatus) -> StorageResult<()>;
}

pub struct PostgresContactStorage {
    pool: PgPool,
}

impl PostgresContactStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_contact(row: &sqlx::postgres::PgRow) -> StorageResult<Contact> {
        let status_raw: String = row.get("status");
        let status =
            ContactStatus::parse(&status_raw).ok_or_else(|| StorageError::DecodeFailed {
                data_type: "Contact".to_string(),
                details: format!("unknown status: {status_raw}"),
            })?;

        let custom_fields: Value = row.get("custom_fields");
        let custom_fields = match custom_fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(Contact {
            id: row.get("id"),
            email: row.get("email"),
            name: row.get("name"),
            tags: row.get("tags"),
            status,
            custom_fields,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ContactStorage for PostgresContactStorage {
    #[instrument(skip(self), fields(db.operation = "get_contact_by_email"))]
    async fn get_by_email(&self, email: &str) -> StorageResult<Option<Contact>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, name, tags, status, custom_fields, created_at
            FROM contacts
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, "Failed to get contact by email");
            StorageError::QueryFailed { source: e }
        })?;

        row.as_ref().map(Self::row_to_contact).transpose()
    }

    #[instrument(skip(self), fields(db.operation = "get_contact_by_id", contact.id = %id))]
    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Contact>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, name, tags, status, custom_fields, created_at
            FROM contacts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, contact = %id, "Failed to get contact by id");
            StorageError::QueryFailed { source: e }
        })?;

        row.as_ref().map(Self::row_to_contact).transpose()
    }

    #[instrument(skip(self, contact), fields(db.operation = "insert_contact", contact.id = %contact.id))]
    async fn insert(&self, contact: &Contact) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO contacts (id, email, name, tags, status, custom_fields, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                name = EXCLUDED.name,
                tags = EXCLUDED.tags,
                status = EXCLUDED.status,
                custom_fields = EXCLUDED.custom_fields
            "#,
        )
        .bind(&contact.id)
        .bind(&contact.email)
        .bind(&contact.name)
        .bind(&contact.tags)
        .bind(contact.status.as_str())
        .bind(Value::Object(contact.custom_fields.clone()))
        .bind(contact.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, contact = %contact.id, "Failed to insert contact");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    #[instrument(skip(self, tags), fields(db.operation = "update_contact_tags", contact.id = %id))]
    async fn update_tags(&self, id: &str, tags: &[String]) -> StorageResult<()> {
        let result = sqlx::query("UPDATE contacts SET tags = $2 WHERE id = $1")
            .bind(id)
            .bind(tags)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = ?e, contact = %id, "Failed to update contact tags");
                StorageError::QueryFailed { source: e }
            })?;

        debug!(rows_affected = result.rows_affected(), "Contact tags updated");
        Ok(())
    }

    #[instrument(skip(self, value), fields(db.operation = "update_contact_field", contact.id = %id, field = %field))]
    async fn update_field(&self, id: &str, field: &str, value: &Value) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE contacts
            SET custom_fields = jsonb_set(COALESCE(custom_fields, '{}'::jsonb), ARRAY[$2], $3)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(error = ?e, contact = %id, field = %field, "Failed to update contact field");
            StorageError::QueryFailed { source: e }
        })?;

        Ok(())
    }

    #[instrument(skip(self), fields(db.operation = "update_contact_status", contact.id = %id))]
    async fn update_status(&self, id: &str, status: ContactStatus) -> StorageResult<()> {
        sqlx::query("UPDATE contacts SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = ?e, contact = %id, "Failed to update contact status");
                StorageError::QueryFailed { source: e }
            })?;

        Ok(())
    }
}

/// In-memory contact store for tests and single-process deployments.
pub struct MemoryContactStorage {
    contacts: Arc<tokio::sync::RwLock<HashMap<String, Contact>>>,
}

impl MemoryContactStorage {
    pub fn new() -> Self {
        Self {
            contacts: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
        }
    }

    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        let map = contacts.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            contacts: Arc::new(tokio::sync::RwLock::new(map)),
        }
    }
}

impl Default for MemoryContactStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContactStorage for MemoryContactStorage {
    async fn get_by_email(&self, email: &str) -> StorageResult<Option<Contact>> {
        let contacts = self.contacts.read().await;
        Ok(contacts.values().find(|c| c.email == email).cloned())
    }

    async fn get_by_id(&self, id: &str) -> StorageResult<Option<Contact>> {
        let contacts = self.contacts.read().await;
        Ok(contacts.get(id).cloned())
    }

    async fn insert(&self, contact: &Contact) -> StorageResult<()> {
        let mut contacts = self.contacts.write().await;
        contacts.insert(contact.id.clone(), contact.clone());
        Ok(())
    }

    async fn update_tags(&self, id: &str, tags: &[String]) -> StorageResult<()> {
        let mut contacts = self.contacts.write().await;
        if let Some(contact) = contacts.get_mut(id) {
            contact.tags = tags.to_vec();
        }
        Ok(())
    }

    async fn update_field(&self, id: &str, field: &str, value: &Value) -> StorageResult<()> {
        let mut contacts = self.contacts.write().await;
        if let Some(contact) = contacts.get_mut(id) {
            contact
                .custom_fields
                .insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    async fn update_status(&self, id: &str, status: ContactStatus) -> StorageResult<()> {
        let mut contacts = self.contacts.write().await;
        if let Some(contact) = contacts.get_mut(id) {
            contact.status = status;
        }
        Ok(())
    }
}
