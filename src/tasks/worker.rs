//! Worker task that executes scheduled units pulled from the queue.
//!
//! Each unit is dispatched to the engine that owns it: sequence rules go
//! through the sequence engine (which re-checks execution status and
//! re-evaluates conditions before acting), automation continuations go back
//! to the automation processor.

use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::automation::AutomationProcessor;
use crate::queue_adapter::QueueAdapter;
use crate::sequence::engine::SequenceEngine;
use crate::storage::scheduled::{ScheduledJob, ScheduledUnit};

/// Worker task errors following the error-mailflow-<domain>-<number> format
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("error-mailflow-worker-1 Scheduled unit execution failed: {unit_id}: {details}")]
    UnitExecutionFailed { unit_id: String, details: String },
}

pub struct WorkerTask {
    queue_adapter: Arc<dyn QueueAdapter<ScheduledUnit>>,
    sequences: Arc<SequenceEngine>,
    automation: Arc<AutomationProcessor>,
    cancel_token: CancellationToken,
}

impl WorkerTask {
    pub fn new(
        queue_adapter: Arc<dyn QueueAdapter<ScheduledUnit>>,
        sequences: Arc<SequenceEngine>,
        automation: Arc<AutomationProcessor>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            queue_adapter,
            sequences,
            automation,
            cancel_token,
        }
    }

    /// Run the worker loop until cancelled.
    #[instrument(skip_all)]
    pub async fn run(self) -> Result<(), WorkerError> {
        info!("Starting scheduled-work worker task");

        while !self.cancel_token.is_cancelled() {
            tokio::select! {
                maybe_unit = self.queue_adapter.pull() => {
                    let Some(unit) = maybe_unit else {
                        info!("Work queue closed, stopping worker");
                        break;
                    };

                    self.execute_unit(unit.clone()).await;
                    if let Err(e) = self.queue_adapter.ack(&unit).await {
                        debug!(error = ?e, unit = %unit.id, "Work acknowledgement failed");
                    }
                }
                () = self.cancel_token.cancelled() => {
                    info!("Worker task cancelled");
                    break;
                }
            }
        }

        info!("Worker task stopped");
        Ok(())
    }

    /// Execute one unit. Failures are logged, never propagated: a bad unit
    /// must not take the worker down.
    pub async fn execute_unit(&self, unit: ScheduledUnit) {
        debug!(unit = %unit.id, "Executing scheduled unit");

        match unit.job {
            ScheduledJob::SequenceRule {
                sequence_id,
                rule_id,
                contact_id,
                execution_id,
                trigger: _,
                event,
            } => {
                if let Err(e) = self
                    .sequences
                    .execute_scheduled_rule(
                        &sequence_id,
                        &rule_id,
                        &contact_id,
                        &execution_id,
                        &event,
                    )
                    .await
                {
                    error!(error = ?e, unit = %unit.id, rule = %rule_id, "Scheduled sequence rule failed");
                }
            }
            ScheduledJob::AutomationResume {
                campaign_id,
                event_type,
                actions,
                event,
            } => {
                self.automation
                    .execute_scheduled(&campaign_id, event_type, &actions, &event)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::engine::action::{Action, Delay, SendEmailParams, Timing};
    use crate::engine::executor::ActionExecutor;
    use crate::mailer::TemplateMailer;
    use crate::queue_adapter::MpscQueueAdapter;
    use crate::sequence::catalog::SequenceCatalog;
    use crate::sequence::types::{Rule, Sequence, SequenceConfig, Trigger};
    use crate::storage::automation_rule::MemoryAutomationStorage;
    use crate::storage::contact::{Contact, ContactStorage, MemoryContactStorage};
    use crate::storage::execution::MemoryExecutionStorage;
    use crate::storage::scheduled::MemoryScheduledWorkStorage;
    use crate::storage::template::MemoryTemplateStorage;
    use crate::transport::CaptureTransport;
    use chrono::Utc;
    use serde_json::{Map, json};
    use std::time::Duration;

    struct Fixture {
        transport: Arc<CaptureTransport>,
        sequences: Arc<SequenceEngine>,
        worker: WorkerTask,
        queue: Arc<MpscQueueAdapter<ScheduledUnit>>,
        contacts: Arc<MemoryContactStorage>,
    }

    fn delayed_send_sequence() -> Sequence {
        Sequence {
            id: "SEQ-TEST-001".to_string(),
            name: "Test".to_string(),
            description: String::new(),
            enabled: true,
            config: SequenceConfig::default(),
            rules: vec![Rule {
                id: "DELAYED-SEND".to_string(),
                name: "Delayed send".to_string(),
                description: String::new(),
                enabled: true,
                priority: 10,
                trigger: Trigger::OnEmailOpened,
                conditions: None,
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "welcome".to_string(),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::hours(24))),
            }],
        }
    }

    fn fixture() -> Fixture {
        let contacts = Arc::new(MemoryContactStorage::new());
        let executions = Arc::new(MemoryExecutionStorage::new());
        let scheduled = Arc::new(MemoryScheduledWorkStorage::new());
        let transport = Arc::new(CaptureTransport::new());
        let mailer = Arc::new(TemplateMailer::new(
            Arc::new(MemoryTemplateStorage::new()),
            transport.clone(),
            "Mailflow <noreply@mailflow.dev>",
            "redirect@mailflow.dev",
            Environment::Production,
        ));
        let executor = Arc::new(ActionExecutor::new(
            contacts.clone(),
            executions.clone(),
            mailer.clone(),
            "default",
        ));
        let sequences = Arc::new(SequenceEngine::new(
            Arc::new(SequenceCatalog::new(vec![delayed_send_sequence()])),
            contacts.clone(),
            executions.clone(),
            scheduled.clone(),
            executor,
        ));
        let automation = Arc::new(AutomationProcessor::new(
            Arc::new(MemoryAutomationStorage::new()),
            contacts.clone(),
            mailer,
            scheduled,
            "default",
        ));
        let queue = Arc::new(MpscQueueAdapter::<ScheduledUnit>::new(10));
        let worker = WorkerTask::new(
            queue.clone(),
            sequences.clone(),
            automation,
            CancellationToken::new(),
        );
        Fixture {
            transport,
            sequences,
            worker,
            queue,
            contacts,
        }
    }

    #[tokio::test]
    async fn sequence_unit_executes_through_engine() {
        let fix = fixture();
        let contact = Contact::new("c-1", "ana@real-domain.com", Some("Ana".to_string()));
        fix.contacts.insert(&contact).await.unwrap();

        let execution_id = fix
            .sequences
            .start_sequence("SEQ-TEST-001", "c-1", Map::new())
            .await
            .unwrap();

        let unit = ScheduledUnit::new(
            Utc::now(),
            ScheduledJob::SequenceRule {
                sequence_id: "SEQ-TEST-001".to_string(),
                rule_id: "DELAYED-SEND".to_string(),
                contact_id: "c-1".to_string(),
                execution_id,
                trigger: Trigger::OnEmailOpened,
                event: json!({"to": ["ana@real-domain.com"]}),
            },
        );

        fix.worker.execute_unit(unit).await;
        assert_eq!(fix.transport.sent_count().await, 1);
    }

    #[tokio::test]
    async fn run_drains_queue_until_cancelled() {
        let fix = fixture();
        let contact = Contact::new("c-1", "ana@real-domain.com", Some("Ana".to_string()));
        fix.contacts.insert(&contact).await.unwrap();

        let execution_id = fix
            .sequences
            .start_sequence("SEQ-TEST-001", "c-1", Map::new())
            .await
            .unwrap();

        let unit = ScheduledUnit::new(
            Utc::now(),
            ScheduledJob::SequenceRule {
                sequence_id: "SEQ-TEST-001".to_string(),
                rule_id: "DELAYED-SEND".to_string(),
                contact_id: "c-1".to_string(),
                execution_id,
                trigger: Trigger::OnEmailOpened,
                event: json!({"to": ["ana@real-domain.com"]}),
            },
        );
        fix.queue.push(unit).await.unwrap();

        let cancel_token = fix.worker.cancel_token.clone();
        let handle = tokio::spawn(fix.worker.run());

        // Give the worker a moment to drain the queue, then stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop after cancellation")
            .unwrap()
            .unwrap();

        assert_eq!(fix.transport.sent_count().await, 1);
    }
}
