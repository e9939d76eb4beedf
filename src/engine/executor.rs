//! Action execution.
//!
//! One side-effecting operation per action kind, performed through the
//! storage and mailer collaborators. Outcomes are returned, not thrown: a
//! failed or skipped action never aborts sibling rule executions for the
//! same trigger.
//!
//! Tag adjustments attached to a send apply only after the transport
//! confirms the send. Send-then-tag is still not atomic; a tag write
//! failure after a confirmed send is logged and left as-is.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::action::Action;
use crate::errors::EngineError;
use crate::mailer::{Recipient, TemplateMailer};
use crate::sequence::contact_state::ContactState;
use crate::sequence::types::{ExecutionStatus, LogStatus};
use crate::storage::StorageResult;
use crate::storage::contact::{Contact, ContactStorage};
use crate::storage::execution::ExecutionStorage;

/// What a single action execution produced.
#[derive(Clone, Debug)]
pub struct ActionOutcome {
    pub status: LogStatus,
    pub error: Option<String>,
    pub details: Option<Value>,
    /// Work the engine must carry out after this action (the executor never
    /// starts sequences itself).
    pub follow_up: Option<FollowUp>,
}

impl ActionOutcome {
    pub fn success() -> Self {
        Self {
            status: LogStatus::Success,
            error: None,
            details: None,
            follow_up: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: LogStatus::Failed,
            error: Some(error.into()),
            details: None,
            follow_up: None,
        }
    }

    pub fn skipped(details: impl Into<String>) -> Self {
        Self {
            status: LogStatus::Skipped,
            error: None,
            details: Some(Value::String(details.into())),
            follow_up: None,
        }
    }

    fn with_follow_up(mut self, follow_up: FollowUp) -> Self {
        self.follow_up = Some(follow_up);
        self
    }
}

/// Deferred engine work reported by an action.
#[derive(Clone, Debug)]
pub enum FollowUp {
    StartSequence {
        sequence_id: String,
        variables: Map<String, Value>,
    },
}

/// Context an action executes in.
pub struct ActionContext<'a> {
    pub contact: &'a Contact,
    pub event: &'a Value,
    pub sequence_id: &'a str,
}

/// Apply tag additions and removals to a contact through the
/// [`ContactState`] view: read current tags, mutate, write the full list
/// back. Not transactional; concurrent writers for the same contact can
/// lose an update (single-writer-per-contact assumption).
pub async fn apply_tag_changes(
    contacts: &dyn ContactStorage,
    contact_id: &str,
    to_add: &[String],
    to_remove: &[String],
) -> StorageResult<()> {
    if to_add.is_empty() && to_remove.is_empty() {
        return Ok(());
    }

    let Some(mut contact) = contacts.get_by_id(contact_id).await? else {
        warn!(contact = %contact_id, "Contact not found for tag update");
        return Ok(());
    };

    let mut state = ContactState::new(&mut contact.tags);
    for tag in to_add {
        state.mark(tag);
    }
    for tag in to_remove {
        state.clear(tag);
    }

    contacts.update_tags(contact_id, &contact.tags).await?;
    debug!(contact = %contact_id, added = ?to_add, removed = ?to_remove, "Contact tags updated");
    Ok(())
}

pub struct ActionExecutor {
    contacts: Arc<dyn ContactStorage>,
    executions: Arc<dyn ExecutionStorage>,
    mailer: Arc<TemplateMailer>,
    organization_id: String,
}

impl ActionExecutor {
    pub fn new(
        contacts: Arc<dyn ContactStorage>,
        executions: Arc<dyn ExecutionStorage>,
        mailer: Arc<TemplateMailer>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            contacts,
            executions,
            mailer,
            organization_id: organization_id.into(),
        }
    }

    /// Execute one action. Never returns `Err`: every failure mode is folded
    /// into the outcome so sibling rules keep running.
    pub async fn execute(&self, action: &Action, ctx: &ActionContext<'_>) -> ActionOutcome {
        debug!(action = action.kind(), contact = %ctx.contact.id, "Executing action");

        match action {
            Action::SendSequenceEmail(params) => self.send_sequence_email(params, ctx).await,
            Action::AddContactTag(params) => {
                self.tag_outcome(ctx, &params.tags_to_add, &[]).await
            }
            Action::RemoveContactTag(params) => {
                self.tag_outcome(ctx, &[], &params.tags_to_remove).await
            }
            Action::UpdateContactField(params) => {
                match self
                    .contacts
                    .update_field(&ctx.contact.id, &params.field_name, &params.field_value)
                    .await
                {
                    Ok(()) => ActionOutcome::success(),
                    Err(e) => ActionOutcome::failed(e.to_string()),
                }
            }
            Action::EndSequence(params) => {
                let outcome = self
                    .finish_execution(ctx, ExecutionStatus::Completed)
                    .await;
                if outcome.status == LogStatus::Success {
                    if let Err(e) = apply_tag_changes(
                        self.contacts.as_ref(),
                        &ctx.contact.id,
                        &params.tags_to_add,
                        &params.tags_to_remove,
                    )
                    .await
                    {
                        warn!(error = ?e, "Final tag adjustment failed after ending sequence");
                    }
                }
                outcome
            }
            Action::PauseSequence(_) => self.finish_execution(ctx, ExecutionStatus::Paused).await,
            Action::MoveToSequence(params) => {
                if params.target_sequence_id.is_empty() {
                    let error = EngineError::MissingActionParameter {
                        parameter: "targetSequenceId".to_string(),
                        action: "moveToSequence".to_string(),
                    };
                    return ActionOutcome::failed(error.to_string());
                }

                let outcome = self
                    .finish_execution(ctx, ExecutionStatus::Completed)
                    .await;
                if outcome.status == LogStatus::Failed {
                    return outcome;
                }

                // Variables carry over only when the rule names them.
                outcome.with_follow_up(FollowUp::StartSequence {
                    sequence_id: params.target_sequence_id.clone(),
                    variables: params.variables.clone(),
                })
            }
        }
    }

    async fn send_sequence_email(
        &self,
        params: &crate::engine::action::SendEmailParams,
        ctx: &ActionContext<'_>,
    ) -> ActionOutcome {
        if params.template_id.is_empty() {
            let error = EngineError::MissingActionParameter {
                parameter: "templateId".to_string(),
                action: "sendSequenceEmail".to_string(),
            };
            return ActionOutcome::failed(error.to_string());
        }

        let contact_value = match serde_json::to_value(ctx.contact) {
            Ok(value) => value,
            Err(e) => return ActionOutcome::failed(format!("contact serialization failed: {e}")),
        };

        let mut variables = Map::new();
        variables.insert("contact".to_string(), contact_value);
        for (key, value) in &params.personalizations {
            variables.insert(key.clone(), value.clone());
        }
        for (key, value) in &params.variables {
            variables.insert(key.clone(), value.clone());
        }

        let recipient = Recipient {
            email: ctx.contact.email.clone(),
            name: ctx.contact.name.clone(),
            contact_id: Some(ctx.contact.id.clone()),
        };

        match self
            .mailer
            .send_templated(
                &params.template_id,
                &recipient,
                &self.organization_id,
                &Value::Object(variables),
            )
            .await
        {
            Ok(receipt) => {
                // Tags record delivery state, so they change only once the
                // provider has accepted the send.
                if let Err(e) = apply_tag_changes(
                    self.contacts.as_ref(),
                    &ctx.contact.id,
                    &params.tags_to_add,
                    &params.tags_to_remove,
                )
                .await
                {
                    warn!(error = ?e, contact = %ctx.contact.id, "Tag update failed after confirmed send");
                }

                let mut outcome = ActionOutcome::success();
                outcome.details = Some(serde_json::json!({"messageId": receipt.message_id}));
                outcome
            }
            Err(e) => ActionOutcome::failed(e.to_string()),
        }
    }

    async fn tag_outcome(
        &self,
        ctx: &ActionContext<'_>,
        to_add: &[String],
        to_remove: &[String],
    ) -> ActionOutcome {
        match apply_tag_changes(self.contacts.as_ref(), &ctx.contact.id, to_add, to_remove).await {
            Ok(()) => ActionOutcome::success(),
            Err(e) => ActionOutcome::failed(e.to_string()),
        }
    }

    /// Transition the live execution for this sequence/contact pair.
    async fn finish_execution(
        &self,
        ctx: &ActionContext<'_>,
        target: ExecutionStatus,
    ) -> ActionOutcome {
        let execution = match self
            .executions
            .get_active(ctx.sequence_id, &ctx.contact.id)
            .await
        {
            Ok(Some(execution)) => execution,
            Ok(None) => {
                debug!(
                    sequence = %ctx.sequence_id,
                    contact = %ctx.contact.id,
                    "No live execution to transition"
                );
                return ActionOutcome::skipped("no live execution");
            }
            Err(e) => return ActionOutcome::failed(e.to_string()),
        };

        let mut execution = execution;
        execution.status = target;
        if target.is_terminal() {
            execution.completed_at = Some(Utc::now());
        }

        match self.executions.save(&execution).await {
            Ok(()) => ActionOutcome::success(),
            Err(e) => ActionOutcome::failed(e.to_string()),
        }
    }
}
