//! Normalized provider email-lifecycle events and the inbound event router.
//!
//! Webhook payloads arrive already parsed as `{type, data}`. The router maps
//! the raw type string onto the closed [`EmailEventType`] enum (unknown types
//! are logged and skipped, never errors), applies contact-status side effects
//! for bounces and complaints, and fans the event out to the automation
//! processor and the sequence engine. Each event produces a per-item
//! [`EventOutcome`] so batch callers never fail wholesale on one bad event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::automation::AutomationProcessor;
use crate::sequence::engine::SequenceEngine;
use crate::storage::contact::{ContactStatus, ContactStorage};

/// Provider email lifecycle event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmailEventType {
    #[serde(rename = "email.sent")]
    Sent,
    #[serde(rename = "email.delivered")]
    Delivered,
    #[serde(rename = "email.delivery_delayed")]
    DeliveryDelayed,
    #[serde(rename = "email.complained")]
    Complained,
    #[serde(rename = "email.bounced")]
    Bounced,
    #[serde(rename = "email.opened")]
    Opened,
    #[serde(rename = "email.clicked")]
    Clicked,
    #[serde(rename = "email.failed")]
    Failed,
}

impl EmailEventType {
    /// Parse a provider type string. Returns `None` for unrecognized types so
    /// the dispatcher stays forward-compatible with new provider events.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "email.sent" => Some(Self::Sent),
            "email.delivered" => Some(Self::Delivered),
            "email.delivery_delayed" => Some(Self::DeliveryDelayed),
            "email.complained" => Some(Self::Complained),
            "email.bounced" => Some(Self::Bounced),
            "email.opened" => Some(Self::Opened),
            "email.clicked" => Some(Self::Clicked),
            "email.failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "email.sent",
            Self::Delivered => "email.delivered",
            Self::DeliveryDelayed => "email.delivery_delayed",
            Self::Complained => "email.complained",
            Self::Bounced => "email.bounced",
            Self::Opened => "email.opened",
            Self::Clicked => "email.clicked",
            Self::Failed => "email.failed",
        }
    }
}

impl fmt::Display for EmailEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Click detail attached to `email.clicked` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClickData {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Bounce detail attached to `email.bounced` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BounceData {
    #[serde(rename = "type")]
    pub bounce_type: String,
    pub reason: String,
}

/// Normalized provider event payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventData {
    pub email_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub click: Option<ClickData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounce: Option<BounceData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_delayed: Option<Value>,
}

/// A complete inbound lifecycle event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmailEvent {
    #[serde(rename = "type")]
    pub event_type: EmailEventType,
    pub data: Value,
}

/// Extract the recipient address from event data: first `to[]` entry, falling
/// back to a flat `email` field.
pub fn recipient_email(data: &Value) -> Option<String> {
    if let Some(to) = data.get("to").and_then(|v| v.as_array()) {
        if let Some(first) = to.first().and_then(|v| v.as_str()) {
            return Some(first.to_string());
        }
    }
    data.get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Per-event processing result for batch callers.
#[derive(Clone, Debug, Serialize)]
pub struct EventOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventOutcome {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
        }
    }
}

/// Routes inbound lifecycle events to both rule consumers.
///
/// The automation processor and the sequence engine are independent consumers
/// of the same event; a failure in one does not keep the other from running.
pub struct EventRouter {
    contacts: Arc<dyn ContactStorage>,
    automation: Arc<AutomationProcessor>,
    sequences: Arc<SequenceEngine>,
}

impl EventRouter {
    pub fn new(
        contacts: Arc<dyn ContactStorage>,
        automation: Arc<AutomationProcessor>,
        sequences: Arc<SequenceEngine>,
    ) -> Self {
        Self {
            contacts,
            automation,
            sequences,
        }
    }

    /// Process one inbound event given its raw provider type string.
    ///
    /// Unknown event types are a warned no-op. Contact-status side effects
    /// (bounce, complaint) are applied before rule processing; a failure
    /// there is logged but does not stop dispatch.
    #[instrument(skip(self, data), fields(event_type = %raw_type))]
    pub async fn process(&self, raw_type: &str, data: &Value) -> EventOutcome {
        let event_type = match EmailEventType::parse(raw_type) {
            Some(event_type) => event_type,
            None => {
                warn!(raw_type = %raw_type, "Unhandled provider event type, skipping");
                return EventOutcome::ok();
            }
        };

        self.apply_status_side_effects(event_type, data).await;

        let mut errors: Vec<String> = Vec::new();

        if let Err(e) = self.automation.process_event(event_type, data).await {
            warn!(error = ?e, "Automation processing failed for event");
            errors.push(e.to_string());
        }

        if let Err(e) = self.sequences.process_email_event(event_type, data).await {
            warn!(error = ?e, "Sequence processing failed for event");
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            EventOutcome::ok()
        } else {
            EventOutcome::failed(errors.join("; "))
        }
    }

    /// Process a batch of `(type, data)` events, returning per-item results.
    pub async fn process_batch(&self, events: &[(String, Value)]) -> Vec<EventOutcome> {
        let mut outcomes = Vec::with_capacity(events.len());
        for (raw_type, data) in events {
            outcomes.push(self.process(raw_type, data).await);
        }
        outcomes
    }

    /// Bounces and complaints mark the contact record before any rules run.
    async fn apply_status_side_effects(&self, event_type: EmailEventType, data: &Value) {
        let status = match event_type {
            EmailEventType::Bounced => ContactStatus::Bounced,
            EmailEventType::Complained => ContactStatus::Complained,
            _ => return,
        };

        let Some(email) = recipient_email(data) else {
            debug!("Event has no recipient, skipping status update");
            return;
        };

        match self.contacts.get_by_email(&email).await {
            Ok(Some(contact)) => {
                if let Err(e) = self.contacts.update_status(&contact.id, status).await {
                    warn!(error = ?e, contact = %contact.id, "Failed to update contact status");
                }
            }
            Ok(None) => {
                debug!(email = %email, "No contact for status update");
            }
            Err(e) => {
                warn!(error = ?e, email = %email, "Contact lookup failed during status update");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_event_types() {
        assert_eq!(
            EmailEventType::parse("email.opened"),
            Some(EmailEventType::Opened)
        );
        assert_eq!(
            EmailEventType::parse("email.delivery_delayed"),
            Some(EmailEventType::DeliveryDelayed)
        );
        assert_eq!(EmailEventType::parse("email.new_thing"), None);
    }

    #[test]
    fn event_type_round_trips_through_serde() {
        let json = serde_json::to_string(&EmailEventType::Bounced).unwrap();
        assert_eq!(json, "\"email.bounced\"");
        let back: EmailEventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EmailEventType::Bounced);
    }

    #[test]
    fn provider_payload_deserializes() {
        let payload = json!({
            "type": "email.clicked",
            "data": {
                "email_id": "em-1",
                "from": "noreply@mailflow.dev",
                "to": ["ana@example.com"],
                "subject": "Oferta",
                "timestamp": "2026-08-06T12:00:00Z",
                "click": {"url": "https://example.com/x", "ip_address": "10.0.0.1"}
            }
        });

        let event: EmailEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.event_type, EmailEventType::Clicked);

        let data: EventData = serde_json::from_value(event.data).unwrap();
        assert_eq!(data.to, vec!["ana@example.com".to_string()]);
        assert_eq!(data.click.unwrap().url, "https://example.com/x");
        assert!(data.bounce.is_none());
    }

    #[test]
    fn recipient_prefers_to_array() {
        let data = json!({"to": ["a@example.com", "b@example.com"], "email": "c@example.com"});
        assert_eq!(recipient_email(&data), Some("a@example.com".to_string()));

        let data = json!({"email": "c@example.com"});
        assert_eq!(recipient_email(&data), Some("c@example.com".to_string()));

        let data = json!({"subject": "no recipient"});
        assert_eq!(recipient_email(&data), None);
    }
}
