//! The sequence engine.
//!
//! Event-entry point for multi-step sequences: maps provider events to
//! internal triggers, runs the rule matcher and action executor against each
//! of the contact's active executions, schedules delayed rules, and starts
//! new sequences when a contact becomes eligible.
//!
//! Execution state machine: `Active` is the only state rules match from.
//! `Paused` suppresses matching until resumed; `Completed`, `Failed`, and
//! `Cancelled` are terminal. Delayed rules re-check the execution status and
//! re-evaluate their conditions at fire time, so pausing a sequence
//! neutralizes its already-scheduled work.

use chrono::Utc;
use serde_json::{Map, Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::constants::{SEQ_WELCOME, TAG_WELCOME_SEQUENCE};
use crate::engine::condition::{ConditionSet, build_context};
use crate::engine::executor::{ActionContext, ActionExecutor, FollowUp};
use crate::engine::matcher::match_rules;
use crate::errors::EngineError;
use crate::events::{EmailEventType, recipient_email};
use crate::sequence::catalog::SequenceCatalog;
use crate::sequence::types::{
    ExecutionLogEntry, ExecutionStatus, LogStatus, Rule, Sequence, SequenceExecution, Trigger,
};
use crate::storage::contact::{Contact, ContactStorage};
use crate::storage::execution::ExecutionStorage;
use crate::storage::scheduled::{ScheduledJob, ScheduledUnit, ScheduledWorkStorage};

type EngineResult<T> = Result<T, EngineError>;

/// Declarative eligibility rule for auto-starting a sequence.
///
/// The dispatch loop never changes to add eligibility: new entries extend
/// this list.
#[derive(Clone, Debug)]
pub struct StartRule {
    pub id: String,
    pub trigger: Trigger,
    pub conditions: ConditionSet,
    pub sequence_id: String,
}

/// The shipped eligibility set: a contact's first open enrolls them in the
/// welcome series.
pub fn default_start_rules() -> Vec<StartRule> {
    use crate::engine::condition::{Condition, Operator};

    vec![StartRule {
        id: "START-WELCOME-ON-OPEN".to_string(),
        trigger: Trigger::OnEmailOpened,
        conditions: ConditionSet::all_of(vec![Condition::new(
            "contact.tags",
            Operator::NotContains,
            json!(TAG_WELCOME_SEQUENCE),
        )]),
        sequence_id: SEQ_WELCOME.to_string(),
    }]
}

pub struct SequenceEngine {
    catalog: Arc<SequenceCatalog>,
    contacts: Arc<dyn ContactStorage>,
    executions: Arc<dyn ExecutionStorage>,
    scheduled: Arc<dyn ScheduledWorkStorage>,
    executor: Arc<ActionExecutor>,
    start_rules: Vec<StartRule>,
}

impl SequenceEngine {
    pub fn new(
        catalog: Arc<SequenceCatalog>,
        contacts: Arc<dyn ContactStorage>,
        executions: Arc<dyn ExecutionStorage>,
        scheduled: Arc<dyn ScheduledWorkStorage>,
        executor: Arc<ActionExecutor>,
    ) -> Self {
        Self {
            catalog,
            contacts,
            executions,
            scheduled,
            executor,
            start_rules: default_start_rules(),
        }
    }

    pub fn with_start_rules(mut self, start_rules: Vec<StartRule>) -> Self {
        self.start_rules = start_rules;
        self
    }

    /// Map a provider event to an internal trigger. Delivery delays count as
    /// a temporary failure; unmapped events return `None` and are ignored.
    pub fn map_event_to_trigger(event_type: EmailEventType) -> Option<Trigger> {
        match event_type {
            EmailEventType::Sent => Some(Trigger::OnEmailSent),
            EmailEventType::Delivered => Some(Trigger::OnEmailDelivered),
            EmailEventType::Opened => Some(Trigger::OnEmailOpened),
            EmailEventType::Clicked => Some(Trigger::OnEmailClicked),
            EmailEventType::Bounced => Some(Trigger::OnEmailBounced),
            EmailEventType::Complained => Some(Trigger::OnEmailComplained),
            EmailEventType::Failed => Some(Trigger::OnEmailFailed),
            EmailEventType::DeliveryDelayed => Some(Trigger::OnEmailFailed),
        }
    }

    /// Process one inbound lifecycle event.
    #[instrument(skip(self, data), fields(event = %event_type))]
    pub async fn process_email_event(
        &self,
        event_type: EmailEventType,
        data: &Value,
    ) -> EngineResult<()> {
        let Some(trigger) = Self::map_event_to_trigger(event_type) else {
            debug!("No trigger mapping for event");
            return Ok(());
        };

        let Some(email) = recipient_email(data) else {
            debug!("Event carries no recipient, nothing to do");
            return Ok(());
        };

        let Some(contact) = self.contacts.get_by_email(&email).await? else {
            debug!(email = %email, "No contact for event recipient");
            return Ok(());
        };

        let active_executions = self.executions.list_active_for_contact(&contact.id).await?;
        for execution in &active_executions {
            let Some(sequence) = self.catalog.get(&execution.sequence_id) else {
                warn!(sequence = %execution.sequence_id, "Active execution references unknown sequence");
                continue;
            };
            if !sequence.enabled {
                debug!(sequence = %sequence.id, "Sequence disabled, skipping");
                continue;
            }
            self.process_sequence_trigger(sequence, trigger, &contact, data)
                .await;
        }

        self.check_for_new_sequences(trigger, &contact, data).await;
        Ok(())
    }

    /// Start a sequence for a contact.
    ///
    /// Enforces the at-most-one-live-execution invariant: if an execution
    /// already exists for the pair, its id is returned and nothing changes.
    /// A fresh start immediately evaluates rules for `onSequenceStarted`.
    #[instrument(skip(self, variables), fields(sequence = %sequence_id, contact = %contact_id))]
    pub async fn start_sequence(
        &self,
        sequence_id: &str,
        contact_id: &str,
        variables: Map<String, Value>,
    ) -> EngineResult<String> {
        if let Some(existing) = self.executions.get_active(sequence_id, contact_id).await? {
            info!(execution = %existing.id, "Sequence already live for contact");
            return Ok(existing.id);
        }

        let sequence = self
            .catalog
            .get(sequence_id)
            .ok_or_else(|| EngineError::SequenceNotFound {
                sequence_id: sequence_id.to_string(),
            })?;

        let execution = SequenceExecution::new(
            sequence_id,
            contact_id,
            sequence.rules.len() as u32,
            variables,
        );
        self.executions.save(&execution).await?;
        info!(execution = %execution.id, "Started sequence execution");

        match self.contacts.get_by_id(contact_id).await? {
            Some(contact) => {
                let start_event = json!({
                    "sequenceId": sequence_id,
                    "contactId": contact_id,
                });
                self.process_sequence_trigger(
                    sequence,
                    Trigger::OnSequenceStarted,
                    &contact,
                    &start_event,
                )
                .await;
            }
            None => {
                warn!(contact = %contact_id, "Contact vanished before start trigger");
            }
        }

        Ok(execution.id)
    }

    /// Cancel the live execution for a pair. Returns the execution id, or
    /// `None` when nothing was live.
    pub async fn stop_sequence(
        &self,
        sequence_id: &str,
        contact_id: &str,
    ) -> EngineResult<Option<String>> {
        let Some(mut execution) = self.executions.get_active(sequence_id, contact_id).await? else {
            return Ok(None);
        };

        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        self.executions.save(&execution).await?;
        info!(execution = %execution.id, "Sequence execution cancelled");
        Ok(Some(execution.id))
    }

    /// Pause the live execution for a pair. A paused execution stops
    /// matching rules; its scheduled delayed rules no-op at fire time.
    pub async fn pause_sequence(
        &self,
        sequence_id: &str,
        contact_id: &str,
    ) -> EngineResult<Option<String>> {
        let Some(mut execution) = self.executions.get_active(sequence_id, contact_id).await? else {
            return Ok(None);
        };

        if execution.status != ExecutionStatus::Active {
            return Ok(Some(execution.id));
        }

        execution.status = ExecutionStatus::Paused;
        self.executions.save(&execution).await?;
        info!(execution = %execution.id, "Sequence execution paused");
        Ok(Some(execution.id))
    }

    /// Resume a paused execution. Only `Paused -> Active` is a valid
    /// transition; anything else is left untouched.
    pub async fn resume_sequence(
        &self,
        sequence_id: &str,
        contact_id: &str,
    ) -> EngineResult<Option<String>> {
        let Some(mut execution) = self.executions.get_active(sequence_id, contact_id).await? else {
            return Ok(None);
        };

        if execution.status != ExecutionStatus::Paused {
            return Ok(Some(execution.id));
        }

        execution.status = ExecutionStatus::Active;
        self.executions.save(&execution).await?;
        info!(execution = %execution.id, "Sequence execution resumed");
        Ok(Some(execution.id))
    }

    /// Execute a previously scheduled rule now that its delay has elapsed.
    ///
    /// The execution must still be `Active` and the rule's conditions must
    /// hold against current contact state; both are re-checked here, not at
    /// schedule time.
    #[instrument(skip(self, event), fields(sequence = %sequence_id, rule = %rule_id, contact = %contact_id))]
    pub async fn execute_scheduled_rule(
        &self,
        sequence_id: &str,
        rule_id: &str,
        contact_id: &str,
        execution_id: &str,
        event: &Value,
    ) -> EngineResult<()> {
        let Some(sequence) = self.catalog.get(sequence_id) else {
            warn!("Scheduled rule references unknown sequence");
            return Ok(());
        };

        let Some(rule) = sequence.rules.iter().find(|r| r.id == rule_id) else {
            warn!("Scheduled rule no longer defined");
            return Ok(());
        };

        if !rule.enabled {
            debug!("Scheduled rule disabled, dropping");
            return Ok(());
        }

        match self.executions.get(execution_id).await? {
            Some(execution) if execution.status == ExecutionStatus::Active => {}
            Some(execution) => {
                debug!(status = %execution.status, "Execution no longer active, dropping scheduled rule");
                return Ok(());
            }
            None => {
                debug!("Execution record gone, dropping scheduled rule");
                return Ok(());
            }
        }

        let Some(contact) = self.contacts.get_by_id(contact_id).await? else {
            debug!("Contact gone, dropping scheduled rule");
            return Ok(());
        };

        let contact_value = serde_json::to_value(&contact).unwrap_or(Value::Null);
        let context = build_context(&contact_value, event);
        let conditions_hold = rule
            .conditions
            .as_ref()
            .map(|c| c.evaluate(&context))
            .unwrap_or(true);

        if !conditions_hold {
            debug!("Conditions no longer hold at fire time, skipping rule");
            let entry = ExecutionLogEntry {
                timestamp: Utc::now(),
                rule_id: rule.id.clone(),
                action: rule.action.kind().to_string(),
                status: LogStatus::Skipped,
                details: Some(json!({"reason": "conditions not met at fire time"})),
                error: None,
            };
            if let Err(e) = self.executions.append_log(execution_id, &entry).await {
                warn!(error = ?e, "Failed to append skip entry to execution log");
            }
            return Ok(());
        }

        self.execute_rule(sequence, rule, &contact, event).await;
        Ok(())
    }

    /// Run matching rules of one sequence for a trigger. Immediate rules
    /// execute inline; delayed rules are handed to the scheduler.
    async fn process_sequence_trigger(
        &self,
        sequence: &Sequence,
        trigger: Trigger,
        contact: &Contact,
        event: &Value,
    ) {
        let contact_value = serde_json::to_value(contact).unwrap_or(Value::Null);
        let context = build_context(&contact_value, event);
        let matched = match_rules(trigger, &sequence.rules, &context);

        if matched.is_empty() {
            debug!(sequence = %sequence.id, trigger = %trigger, "No rules matched");
            return;
        }

        for rule in matched {
            if rule.is_delayed() {
                if let Err(e) = self.schedule_rule(sequence, rule, contact, event).await {
                    warn!(error = ?e, rule = %rule.id, "Failed to schedule delayed rule");
                }
            } else {
                self.execute_rule(sequence, rule, contact, event).await;
            }
        }
    }

    /// Execute one rule inline and record the outcome on the live execution.
    async fn execute_rule(
        &self,
        sequence: &Sequence,
        rule: &Rule,
        contact: &Contact,
        event: &Value,
    ) {
        // Capture the live execution before the action runs: end/move
        // actions transition it, and the log still belongs on that record.
        let live = match self.executions.get_active(&sequence.id, &contact.id).await {
            Ok(live) => live,
            Err(e) => {
                warn!(error = ?e, "Execution lookup failed before rule execution");
                None
            }
        };

        info!(rule = %rule.id, contact = %contact.id, "Executing rule");
        let ctx = ActionContext {
            contact,
            event,
            sequence_id: &sequence.id,
        };
        let outcome = self.executor.execute(&rule.action, &ctx).await;

        if let Some(error) = &outcome.error {
            warn!(rule = %rule.id, error = %error, "Rule execution failed");
        }

        if let Some(pre) = live {
            self.record_outcome(&pre.id, rule, &outcome).await;
        }

        if let Some(FollowUp::StartSequence {
            sequence_id,
            variables,
        }) = outcome.follow_up
        {
            if let Err(e) = self
                .start_sequence_boxed(&sequence_id, &contact.id, variables)
                .await
            {
                warn!(error = ?e, target = %sequence_id, "Follow-up sequence start failed");
            }
        }
    }

    /// Append the log entry and advance step bookkeeping on an execution.
    async fn record_outcome(
        &self,
        execution_id: &str,
        rule: &Rule,
        outcome: &crate::engine::executor::ActionOutcome,
    ) {
        let entry = ExecutionLogEntry {
            timestamp: Utc::now(),
            rule_id: rule.id.clone(),
            action: rule.action.kind().to_string(),
            status: outcome.status,
            details: outcome.details.clone(),
            error: outcome.error.clone(),
        };

        let fresh = match self.executions.get(execution_id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                warn!(execution = %execution_id, "Execution disappeared before log append");
                return;
            }
            Err(e) => {
                warn!(error = ?e, execution = %execution_id, "Execution fetch failed for log append");
                return;
            }
        };

        let mut fresh = fresh;
        fresh.execution_log.push(entry);
        fresh.last_action_at = Some(Utc::now());
        if outcome.status == LogStatus::Success {
            fresh.current_step = (fresh.current_step + 1).min(fresh.total_steps);
        }

        if let Err(e) = self.executions.save(&fresh).await {
            // The action already happened; losing the bookkeeping write is
            // logged, not propagated.
            warn!(error = ?e, execution = %execution_id, "Failed to record rule outcome");
        }
    }

    /// Hand a delayed rule to the scheduler with an event snapshot.
    async fn schedule_rule(
        &self,
        sequence: &Sequence,
        rule: &Rule,
        contact: &Contact,
        event: &Value,
    ) -> EngineResult<()> {
        let Some(delay) = rule.delay_duration() else {
            return Ok(());
        };

        let Some(execution) = self.executions.get_active(&sequence.id, &contact.id).await? else {
            debug!(rule = %rule.id, "No live execution, not scheduling delayed rule");
            return Ok(());
        };

        let delay = chrono::Duration::from_std(delay).map_err(|e| {
            EngineError::SchedulingFailed {
                details: e.to_string(),
            }
        })?;
        let fire_at = Utc::now() + delay;

        let unit = ScheduledUnit::new(
            fire_at,
            ScheduledJob::SequenceRule {
                sequence_id: sequence.id.clone(),
                rule_id: rule.id.clone(),
                contact_id: contact.id.clone(),
                execution_id: execution.id.clone(),
                trigger: rule.trigger,
                event: event.clone(),
            },
        );

        self.scheduled.save(&unit).await?;
        info!(rule = %rule.id, fire_at = %fire_at, "Scheduled delayed rule");
        Ok(())
    }

    /// Evaluate the start-eligibility rules and launch any sequence the
    /// contact just qualified for.
    async fn check_for_new_sequences(&self, trigger: Trigger, contact: &Contact, event: &Value) {
        let contact_value = serde_json::to_value(contact).unwrap_or(Value::Null);
        let context = build_context(&contact_value, event);

        for start_rule in &self.start_rules {
            if start_rule.trigger != trigger || !start_rule.conditions.evaluate(&context) {
                continue;
            }

            info!(
                start_rule = %start_rule.id,
                sequence = %start_rule.sequence_id,
                contact = %contact.id,
                "Contact eligible for sequence"
            );
            if let Err(e) = self
                .start_sequence_boxed(&start_rule.sequence_id, &contact.id, Map::new())
                .await
            {
                warn!(error = ?e, sequence = %start_rule.sequence_id, "Eligible sequence failed to start");
            }
        }
    }

    /// Boxed indirection for the `execute rule -> start sequence -> process
    /// trigger -> execute rule` cycle.
    fn start_sequence_boxed<'a>(
        &'a self,
        sequence_id: &'a str,
        contact_id: &'a str,
        variables: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = EngineResult<String>> + Send + 'a>> {
        Box::pin(self.start_sequence(sequence_id, contact_id, variables))
    }
}
