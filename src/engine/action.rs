//! Typed rule actions and execution timing.
//!
//! Actions are a closed, tagged enum: every variant carries the parameter
//! struct for its action kind, so parameter completeness is checked when a
//! rule is built or parsed rather than at execution time. The serialized
//! shape (`action` tag + `values` payload) matches how rules are stored and
//! logged.

use humantime::{format_duration, parse_duration};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::Duration;

/// When a rule executes relative to its trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delay {
    Immediate,
    After(Duration),
}

impl Delay {
    pub fn hours(hours: u64) -> Self {
        Self::After(Duration::from_secs(hours * 3600))
    }

    pub fn days(days: u64) -> Self {
        Self::After(Duration::from_secs(days * 86_400))
    }

    /// Parse `"immediate"` or a humantime duration string (`"24h"`, `"2d"`,
    /// `"1w"`).
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw == "immediate" {
            return Ok(Self::Immediate);
        }
        parse_duration(raw)
            .map(Self::After)
            .map_err(|e| format!("invalid delay {raw:?}: {e}"))
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate)
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Immediate => None,
            Self::After(d) => Some(*d),
        }
    }
}

impl Serialize for Delay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Immediate => serializer.serialize_str("immediate"),
            Self::After(d) => serializer.serialize_str(&format_duration(*d).to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for Delay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(D::Error::custom)
    }
}

/// Execution timing attached to a rule.
///
/// A rule with a non-immediate delay must never run synchronously: it is
/// scheduled and its conditions are re-evaluated when the delay elapses.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub delay: Delay,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<Delay>,
}

impl Timing {
    pub fn immediate() -> Self {
        Self {
            delay: Delay::Immediate,
            max_retries: None,
            retry_delay: None,
        }
    }

    pub fn delayed(delay: Delay) -> Self {
        Self {
            delay,
            max_retries: None,
            retry_delay: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailParams {
    pub template_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub personalizations: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_to_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_to_remove: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTagParams {
    pub tags_to_add: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTagParams {
    pub tags_to_remove: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFieldParams {
    pub field_name: String,
    pub field_value: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSequenceParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_to_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags_to_remove: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PauseParams {}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveToSequenceParams {
    pub target_sequence_id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

/// The closed set of sequence rule actions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", content = "values", rename_all = "camelCase")]
pub enum Action {
    SendSequenceEmail(SendEmailParams),
    AddContactTag(AddTagParams),
    RemoveContactTag(RemoveTagParams),
    UpdateContactField(UpdateFieldParams),
    EndSequence(EndSequenceParams),
    PauseSequence(PauseParams),
    MoveToSequence(MoveToSequenceParams),
}

impl Action {
    /// Stable action name for logs and execution records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendSequenceEmail(_) => "sendSequenceEmail",
            Self::AddContactTag(_) => "addContactTag",
            Self::RemoveContactTag(_) => "removeContactTag",
            Self::UpdateContactField(_) => "updateContactField",
            Self::EndSequence(_) => "endSequence",
            Self::PauseSequence(_) => "pauseSequence",
            Self::MoveToSequence(_) => "moveToSequence",
        }
    }
}
