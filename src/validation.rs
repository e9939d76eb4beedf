//! Load-time validation for sequence definitions and automation rules.
//!
//! The typed action enums already guarantee structural shape; this layer
//! checks what the type system cannot: non-empty identifiers and parameter
//! lists, unique rule ids, and sending-window sanity. Definitions are
//! validated once when loaded, not on every execution.

use crate::engine::action::Action;
use crate::errors::ValidationError;
use crate::sequence::types::{Rule, SendingWindow, Sequence};
use crate::storage::automation_rule::{AutomationAction, AutomationRule};
use std::collections::HashSet;

pub struct Validator;

impl Validator {
    /// Validate a sequence definition and every rule in it.
    pub fn validate_sequence(sequence: &Sequence) -> Result<(), ValidationError> {
        if sequence.id.is_empty() {
            return Err(ValidationError::MissingRequiredField {
                field_name: "id".to_string(),
                context: "sequence".to_string(),
            });
        }

        if sequence.rules.is_empty() {
            return Err(ValidationError::SequenceValidationFailed {
                sequence_id: sequence.id.clone(),
                details: "sequence has no rules".to_string(),
            });
        }

        let mut seen_ids = HashSet::new();
        for rule in &sequence.rules {
            if !seen_ids.insert(rule.id.as_str()) {
                return Err(ValidationError::SequenceValidationFailed {
                    sequence_id: sequence.id.clone(),
                    details: format!("duplicate rule id: {}", rule.id),
                });
            }
            Self::validate_rule(rule)?;
        }

        if let Some(window) = &sequence.config.sending_window {
            Self::validate_sending_window(window)?;
        }

        Ok(())
    }

    /// Validate one sequence rule's identity and action parameters.
    pub fn validate_rule(rule: &Rule) -> Result<(), ValidationError> {
        if rule.id.is_empty() {
            return Err(ValidationError::MissingRequiredField {
                field_name: "id".to_string(),
                context: "rule".to_string(),
            });
        }

        match &rule.action {
            Action::SendSequenceEmail(params) => {
                if params.template_id.is_empty() {
                    return Err(ValidationError::RuleValidationFailed {
                        rule_id: rule.id.clone(),
                        details: "sendSequenceEmail requires a templateId".to_string(),
                    });
                }
            }
            Action::AddContactTag(params) => {
                if params.tags_to_add.is_empty() {
                    return Err(ValidationError::RuleValidationFailed {
                        rule_id: rule.id.clone(),
                        details: "addContactTag requires tagsToAdd".to_string(),
                    });
                }
            }
            Action::RemoveContactTag(params) => {
                if params.tags_to_remove.is_empty() {
                    return Err(ValidationError::RuleValidationFailed {
                        rule_id: rule.id.clone(),
                        details: "removeContactTag requires tagsToRemove".to_string(),
                    });
                }
            }
            Action::UpdateContactField(params) => {
                if params.field_name.is_empty() {
                    return Err(ValidationError::RuleValidationFailed {
                        rule_id: rule.id.clone(),
                        details: "updateContactField requires a fieldName".to_string(),
                    });
                }
            }
            Action::MoveToSequence(params) => {
                if params.target_sequence_id.is_empty() {
                    return Err(ValidationError::RuleValidationFailed {
                        rule_id: rule.id.clone(),
                        details: "moveToSequence requires a targetSequenceId".to_string(),
                    });
                }
            }
            Action::EndSequence(_) | Action::PauseSequence(_) => {}
        }

        Ok(())
    }

    /// Validate an automation rule's identity and action parameters.
    pub fn validate_automation_rule(rule: &AutomationRule) -> Result<(), ValidationError> {
        if rule.id.is_empty() {
            return Err(ValidationError::MissingRequiredField {
                field_name: "id".to_string(),
                context: "automation rule".to_string(),
            });
        }

        if rule.actions.is_empty() {
            return Err(ValidationError::AutomationRuleValidationFailed {
                rule_id: rule.id.clone(),
                details: "rule has no actions".to_string(),
            });
        }

        for action in &rule.actions {
            match action {
                AutomationAction::SendEmail(config) => {
                    if config.template_id.is_empty() {
                        return Err(ValidationError::AutomationRuleValidationFailed {
                            rule_id: rule.id.clone(),
                            details: "send_email requires a template_id".to_string(),
                        });
                    }
                }
                AutomationAction::AddTag(config) | AutomationAction::RemoveTag(config) => {
                    if config.tag.is_empty() {
                        return Err(ValidationError::AutomationRuleValidationFailed {
                            rule_id: rule.id.clone(),
                            details: "tag actions require a tag".to_string(),
                        });
                    }
                }
                AutomationAction::UpdateContent(config) => {
                    if config.field.is_empty() {
                        return Err(ValidationError::AutomationRuleValidationFailed {
                            rule_id: rule.id.clone(),
                            details: "update_content requires a field".to_string(),
                        });
                    }
                }
                // Unknown actions pass validation; they execute as warned
                // no-ops to stay forward-compatible.
                AutomationAction::Wait(_) | AutomationAction::Unknown => {}
            }
        }

        Ok(())
    }

    /// Check `HH:MM` bounds and ISO weekday numbers on a sending window.
    pub fn validate_sending_window(window: &SendingWindow) -> Result<(), ValidationError> {
        for (label, value) in [("start", &window.start), ("end", &window.end)] {
            if !is_valid_time_of_day(value) {
                return Err(ValidationError::InvalidSendingWindow {
                    details: format!("{label} must be HH:MM, got {value:?}"),
                });
            }
        }

        if window.days.is_empty() {
            return Err(ValidationError::InvalidSendingWindow {
                details: "days must not be empty".to_string(),
            });
        }

        if let Some(bad) = window.days.iter().find(|d| **d < 1 || **d > 7) {
            return Err(ValidationError::InvalidSendingWindow {
                details: format!("day out of range 1-7: {bad}"),
            });
        }

        Ok(())
    }
}

fn is_valid_time_of_day(value: &str) -> bool {
    let Some((hours, minutes)) = value.split_once(':') else {
        return false;
    };
    let Ok(hours) = hours.parse::<u8>() else {
        return false;
    };
    let Ok(minutes) = minutes.parse::<u8>() else {
        return false;
    };
    hours < 24 && minutes < 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::action::{AddTagParams, SendEmailParams};
    use crate::events::EmailEventType;
    use crate::sequence::types::{SequenceConfig, Trigger};

    fn rule_with(action: Action) -> Rule {
        Rule {
            id: "r-1".to_string(),
            name: "r".to_string(),
            description: String::new(),
            enabled: true,
            priority: 1,
            trigger: Trigger::OnEmailOpened,
            conditions: None,
            action,
            timing: None,
        }
    }

    #[test]
    fn send_rule_requires_template_id() {
        let rule = rule_with(Action::SendSequenceEmail(SendEmailParams::default()));
        assert!(Validator::validate_rule(&rule).is_err());

        let rule = rule_with(Action::SendSequenceEmail(SendEmailParams {
            template_id: "WEL-001".to_string(),
            ..Default::default()
        }));
        assert!(Validator::validate_rule(&rule).is_ok());
    }

    #[test]
    fn tag_rule_requires_tags() {
        let rule = rule_with(Action::AddContactTag(AddTagParams {
            tags_to_add: vec![],
        }));
        assert!(Validator::validate_rule(&rule).is_err());
    }

    #[test]
    fn duplicate_rule_ids_fail_sequence_validation() {
        let rule = rule_with(Action::AddContactTag(AddTagParams {
            tags_to_add: vec!["t".to_string()],
        }));
        let sequence = Sequence {
            id: "SEQ-X".to_string(),
            name: "x".to_string(),
            description: String::new(),
            enabled: true,
            config: SequenceConfig::default(),
            rules: vec![rule.clone(), rule],
        };
        let err = Validator::validate_sequence(&sequence).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id"));
    }

    #[test]
    fn sending_window_bounds_are_checked() {
        let valid = SendingWindow {
            start: "09:00".to_string(),
            end: "18:00".to_string(),
            days: vec![1, 2, 3, 4, 5],
        };
        assert!(Validator::validate_sending_window(&valid).is_ok());

        let bad_time = SendingWindow {
            start: "25:00".to_string(),
            end: "18:00".to_string(),
            days: vec![1],
        };
        assert!(Validator::validate_sending_window(&bad_time).is_err());

        let bad_day = SendingWindow {
            start: "09:00".to_string(),
            end: "18:00".to_string(),
            days: vec![0],
        };
        assert!(Validator::validate_sending_window(&bad_day).is_err());
    }

    #[test]
    fn automation_rule_requires_actions() {
        let rule = AutomationRule {
            id: "r-1".to_string(),
            campaign_id: "c".to_string(),
            trigger_event: EmailEventType::Bounced,
            conditions: vec![],
            actions: vec![],
            is_active: true,
        };
        assert!(Validator::validate_automation_rule(&rule).is_err());
    }
}
