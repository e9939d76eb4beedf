//! Sequence definitions and per-contact execution state.
//!
//! A [`Sequence`] is an ordered, reusable set of rules applied per contact
//! over time. Definitions are immutable after load; per-contact progress
//! lives in [`SequenceExecution`] records owned by the sequence engine and
//! persisted through the execution storage collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::engine::action::{Action, Timing};
use crate::engine::condition::ConditionSet;

/// Named conditions under which a sequence rule becomes eligible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    OnEmailSent,
    OnEmailOpened,
    OnEmailClicked,
    OnEmailBounced,
    OnEmailComplained,
    OnEmailDelivered,
    OnEmailFailed,
    OnContactCreated,
    OnSequenceStarted,
    OnTimeElapsed,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnEmailSent => "onEmailSent",
            Self::OnEmailOpened => "onEmailOpened",
            Self::OnEmailClicked => "onEmailClicked",
            Self::OnEmailBounced => "onEmailBounced",
            Self::OnEmailComplained => "onEmailComplained",
            Self::OnEmailDelivered => "onEmailDelivered",
            Self::OnEmailFailed => "onEmailFailed",
            Self::OnContactCreated => "onContactCreated",
            Self::OnSequenceStarted => "onSequenceStarted",
            Self::OnTimeElapsed => "onTimeElapsed",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event-condition-action rule inside a sequence.
///
/// The action enum is flattened so a serialized rule carries flat
/// `action` / `values` keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub priority: i32,
    pub trigger: Trigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionSet>,
    #[serde(flatten)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
}

impl Rule {
    /// Whether this rule defers execution rather than running synchronously.
    pub fn is_delayed(&self) -> bool {
        self.timing
            .as_ref()
            .map(|t| !t.delay.is_immediate())
            .unwrap_or(false)
    }

    pub fn delay_duration(&self) -> Option<Duration> {
        self.timing.as_ref().and_then(|t| t.delay.duration())
    }
}

mod opt_duration {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(s) => humantime::parse_duration(&s)
                .map(Some)
                .map_err(D::Error::custom),
            None => Ok(None),
        }
    }
}

/// Allowed send hours for a sequence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendingWindow {
    /// Window opening, `"HH:MM"`.
    pub start: String,
    /// Window closing, `"HH:MM"`.
    pub end: String,
    /// ISO weekday numbers, 1 = Monday.
    pub days: Vec<u8>,
}

/// Sequence-level policy knobs.
///
/// `max_duration` and `max_emails` are not enforced automatically; cleanup
/// rules inside the sequence consult them explicitly.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceConfig {
    #[serde(default, with = "opt_duration", skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_emails: Option<u32>,
    #[serde(default, with = "opt_duration", skip_serializing_if = "Option::is_none")]
    pub cooldown_period: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sending_window: Option<SendingWindow>,
}

/// An immutable sequence definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sequence {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    pub config: SequenceConfig,
    pub rules: Vec<Rule>,
}

/// Lifecycle states of a sequence execution.
///
/// `Active` is the only state rule matching proceeds from; `Paused` can
/// return to `Active`; the remaining states are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for one rule execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failed,
    Skipped,
}

/// Append-only record of what a rule did to an execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub rule_id: String,
    pub action: String,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One contact's live progress through a sequence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceExecution {
    pub id: String,
    pub sequence_id: String,
    pub contact_id: String,
    pub status: ExecutionStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub execution_log: Vec<ExecutionLogEntry>,
}

impl SequenceExecution {
    pub fn new(
        sequence_id: impl Into<String>,
        contact_id: impl Into<String>,
        total_steps: u32,
        variables: Map<String, Value>,
    ) -> Self {
        Self {
            id: format!("exec_{}", Uuid::new_v4()),
            sequence_id: sequence_id.into(),
            contact_id: contact_id.into(),
            status: ExecutionStatus::Active,
            current_step: 0,
            total_steps,
            started_at: Utc::now(),
            last_action_at: None,
            completed_at: None,
            variables,
            execution_log: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::action::{Delay, SendEmailParams};
    use serde_json::json;

    #[test]
    fn trigger_names_are_camel_case() {
        assert_eq!(
            serde_json::to_value(Trigger::OnEmailOpened).unwrap(),
            json!("onEmailOpened")
        );
        assert_eq!(
            serde_json::to_value(Trigger::OnSequenceStarted).unwrap(),
            json!("onSequenceStarted")
        );
    }

    #[test]
    fn rule_serializes_with_flattened_action() {
        let rule = Rule {
            id: "WELCOME-EMAIL-01".to_string(),
            name: "Email de Bienvenida".to_string(),
            description: String::new(),
            enabled: true,
            priority: 1,
            trigger: Trigger::OnContactCreated,
            conditions: None,
            action: Action::SendSequenceEmail(SendEmailParams {
                template_id: "WEL-001".to_string(),
                ..Default::default()
            }),
            timing: Some(Timing::immediate()),
        };

        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["action"], json!("sendSequenceEmail"));
        assert_eq!(value["values"]["templateId"], json!("WEL-001"));
        assert_eq!(value["timing"]["delay"], json!("immediate"));

        let back: Rule = serde_json::from_value(value).unwrap();
        assert!(!back.is_delayed());
        assert_eq!(back.action.kind(), "sendSequenceEmail");
    }

    #[test]
    fn delayed_rule_reports_duration() {
        let rule = Rule {
            id: "r".to_string(),
            name: "r".to_string(),
            description: String::new(),
            enabled: true,
            priority: 10,
            trigger: Trigger::OnTimeElapsed,
            conditions: None,
            action: Action::AddContactTag(crate::engine::action::AddTagParams {
                tags_to_add: vec!["t".to_string()],
            }),
            timing: Some(Timing::delayed(Delay::hours(48))),
        };

        assert!(rule.is_delayed());
        assert_eq!(
            rule.delay_duration(),
            Some(std::time::Duration::from_secs(48 * 3600))
        );
    }

    #[test]
    fn execution_status_transitions_and_terminality() {
        assert!(!ExecutionStatus::Active.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert_eq!(ExecutionStatus::parse("paused"), Some(ExecutionStatus::Paused));
        assert_eq!(ExecutionStatus::parse("unknown"), None);
    }

    #[test]
    fn sequence_config_parses_duration_strings() {
        let value = json!({
            "maxDuration": "14d",
            "maxEmails": 4,
            "cooldownPeriod": "6h",
            "timezone": "America/Argentina/Buenos_Aires",
            "sendingWindow": {"start": "09:00", "end": "18:00", "days": [1, 2, 3, 4, 5]}
        });
        let config: SequenceConfig = serde_json::from_value(value).unwrap();
        assert_eq!(
            config.max_duration,
            Some(std::time::Duration::from_secs(14 * 86_400))
        );
        assert_eq!(
            config.cooldown_period,
            Some(std::time::Duration::from_secs(6 * 3600))
        );
        assert_eq!(config.sending_window.unwrap().days, vec![1, 2, 3, 4, 5]);
    }
}
