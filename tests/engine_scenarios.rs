//! End-to-end scenarios over the fully wired engine stack: in-memory
//! storages, the capturing transport, and the real router, engines,
//! scheduler, and worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use mailflow::automation::AutomationProcessor;
use mailflow::config::Environment;
use mailflow::engine::executor::ActionExecutor;
use mailflow::events::{EmailEventType, EventRouter};
use mailflow::mailer::TemplateMailer;
use mailflow::queue_adapter::{MpscQueueAdapter, QueueAdapter};
use mailflow::sequence::catalog::SequenceCatalog;
use mailflow::sequence::engine::SequenceEngine;
use mailflow::storage::automation_rule::{
    AutomationAction, AutomationRule, AutomationStorage, MemoryAutomationStorage, SendEmailConfig,
};
use mailflow::storage::contact::{Contact, ContactStatus, ContactStorage, MemoryContactStorage};
use mailflow::storage::execution::{ExecutionStorage, MemoryExecutionStorage};
use mailflow::storage::scheduled::{
    MemoryScheduledWorkStorage, ScheduledUnit, ScheduledWorkStorage,
};
use mailflow::storage::template::MemoryTemplateStorage;
use mailflow::tasks::{SchedulerTask, WorkerTask};
use mailflow::transport::CaptureTransport;

const WELCOME_SEQUENCE: &str = "SEQ-WELCOME-001";
const WELCOME_TAG: &str = "Secuencia Welcome";

struct Stack {
    contacts: Arc<MemoryContactStorage>,
    executions: Arc<MemoryExecutionStorage>,
    automation_rules: Arc<MemoryAutomationStorage>,
    scheduled: Arc<MemoryScheduledWorkStorage>,
    transport: Arc<CaptureTransport>,
    sequences: Arc<SequenceEngine>,
    automation: Arc<AutomationProcessor>,
    router: EventRouter,
}

fn stack() -> Stack {
    let contacts = Arc::new(MemoryContactStorage::new());
    let executions = Arc::new(MemoryExecutionStorage::new());
    let automation_rules = Arc::new(MemoryAutomationStorage::new());
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
        Arc::new(SequenceCatalog::predefined()),
        contacts.clone(),
        executions.clone(),
        scheduled.clone(),
        executor,
    ));

    let automation = Arc::new(AutomationProcessor::new(
        automation_rules.clone(),
        contacts.clone(),
        mailer,
        scheduled.clone(),
        "default",
    ));

    let router = EventRouter::new(contacts.clone(), automation.clone(), sequences.clone());

    Stack {
        contacts,
        executions,
        automation_rules,
        scheduled,
        transport,
        sequences,
        automation,
        router,
    }
}

async fn seed_contact(stack: &Stack, id: &str, email: &str) {
    let contact = Contact::new(id, email, Some("Ana".to_string()));
    stack.contacts.insert(&contact).await.unwrap();
}

fn opened_event(email: &str) -> serde_json::Value {
    json!({
        "email_id": "em-1",
        "from": "noreply@mailflow.dev",
        "to": [email],
        "subject": "Nuestra oferta",
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[tokio::test]
async fn first_open_enrolls_contact_in_welcome_sequence_once() {
    let stack = stack();
    seed_contact(&stack, "c-1", "ana@real-domain.com").await;

    let event = opened_event("ana@real-domain.com");
    let outcome = stack.router.process("email.opened", &event).await;
    assert!(outcome.success);

    let execution = stack
        .executions
        .get_active(WELCOME_SEQUENCE, "c-1")
        .await
        .unwrap()
        .expect("welcome execution should be started");

    // The same event again must not create a second execution.
    let outcome = stack.router.process("email.opened", &event).await;
    assert!(outcome.success);
    let second = stack
        .executions
        .get_active(WELCOME_SEQUENCE, "c-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.id, second.id);
}

#[tokio::test]
async fn tagged_contact_is_not_re_enrolled() {
    let stack = stack();
    let mut contact = Contact::new("c-1", "ana@real-domain.com", Some("Ana".to_string()));
    contact.tags = vec![WELCOME_TAG.to_string()];
    stack.contacts.insert(&contact).await.unwrap();

    stack
        .router
        .process("email.opened", &opened_event("ana@real-domain.com"))
        .await;

    assert!(stack
        .executions
        .get_active(WELCOME_SEQUENCE, "c-1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn unconditional_bounce_rule_always_fires_and_contact_is_marked() {
    let stack = stack();
    seed_contact(&stack, "c-1", "ana@real-domain.com").await;

    stack
        .automation_rules
        .insert_rule(&AutomationRule {
            id: "r-bounce".to_string(),
            campaign_id: "camp-1".to_string(),
            trigger_event: EmailEventType::Bounced,
            conditions: vec![],
            actions: vec![AutomationAction::AddTag(
                mailflow::storage::automation_rule::TagConfig {
                    tag: "Rebotado".to_string(),
                },
            )],
            is_active: true,
        })
        .await
        .unwrap();

    // Payload contents beyond the recipient are irrelevant to an empty
    // condition list.
    let event = json!({"to": ["ana@real-domain.com"], "whatever": 42});
    let outcome = stack.router.process("email.bounced", &event).await;
    assert!(outcome.success);

    let contact = stack.contacts.get_by_id("c-1").await.unwrap().unwrap();
    assert!(contact.tags.contains(&"Rebotado".to_string()));
    assert_eq!(contact.status, ContactStatus::Bounced);
}

#[tokio::test]
async fn unknown_event_type_is_a_successful_noop() {
    let stack = stack();
    seed_contact(&stack, "c-1", "ana@real-domain.com").await;

    let outcome = stack
        .router
        .process("email.shiny_new_thing", &opened_event("ana@real-domain.com"))
        .await;
    assert!(outcome.success);
    assert_eq!(stack.transport.sent_count().await, 0);
}

#[tokio::test]
async fn opened_follow_up_is_adapted_but_sent_is_not() {
    let stack = stack();
    seed_contact(&stack, "c-1", "ana@real-domain.com").await;

    for (rule_id, trigger) in [
        ("r-opened", EmailEventType::Opened),
        ("r-sent", EmailEventType::Sent),
    ] {
        stack
            .automation_rules
            .insert_rule(&AutomationRule {
                id: rule_id.to_string(),
                campaign_id: "camp-1".to_string(),
                trigger_event: trigger,
                conditions: vec![],
                actions: vec![AutomationAction::SendEmail(SendEmailConfig {
                    template_id: "welcome".to_string(),
                    delay_hours: 0,
                })],
                is_active: true,
            })
            .await
            .unwrap();
    }

    stack
        .automation
        .process_event(EmailEventType::Opened, &opened_event("ana@real-domain.com"))
        .await
        .unwrap();
    stack
        .automation
        .process_event(EmailEventType::Sent, &opened_event("ana@real-domain.com"))
        .await
        .unwrap();

    let sent = stack.transport.sent().await;
    assert_eq!(sent.len(), 2);
    // The opened follow-up carries the urgency marker; the plain sent event
    // leaves the template's subject untouched.
    assert!(sent[0].subject.starts_with("Still interested?"));
    assert_eq!(sent[1].subject, "¡Bienvenido Ana!");
}

#[tokio::test]
async fn delayed_rule_flows_through_scheduler_and_worker() {
    let stack = stack();
    seed_contact(&stack, "c-1", "ana@real-domain.com").await;

    // Enroll and tag the contact so the 24h welcome follow-up matches.
    stack
        .sequences
        .start_sequence(WELCOME_SEQUENCE, "c-1", serde_json::Map::new())
        .await
        .unwrap();
    stack
        .contacts
        .update_tags("c-1", &[WELCOME_TAG.to_string()])
        .await
        .unwrap();

    let event = json!({
        "to": ["ana@real-domain.com"],
        "templateId": "WEL-001",
    });
    stack
        .sequences
        .process_email_event(EmailEventType::Opened, &event)
        .await
        .unwrap();

    // The follow-up was deferred, not sent.
    assert_eq!(stack.transport.sent_count().await, 0);
    let pending = stack.scheduled.get_all().await.unwrap();
    assert_eq!(pending.len(), 1);

    // Simulate the delay elapsing, then run one scheduler pass and drain
    // the queue through the worker.
    let mut unit = pending.into_iter().next().unwrap();
    unit.fire_at = Utc::now() - chrono::Duration::minutes(1);
    stack.scheduled.save(&unit).await.unwrap();

    let queue = Arc::new(MpscQueueAdapter::<ScheduledUnit>::new(10));
    let scheduler = SchedulerTask::new(
        stack.scheduled.clone(),
        queue.clone(),
        CancellationToken::new(),
        Duration::from_secs(10),
    );
    scheduler.dispatch_due_units().await.unwrap();

    let worker = WorkerTask::new(
        queue.clone(),
        stack.sequences.clone(),
        stack.automation.clone(),
        CancellationToken::new(),
    );
    let unit = queue.pull().await.unwrap();
    worker.execute_unit(unit).await;

    // WEL-002 is not a built-in template, so the send itself fails, but the
    // attempt must be recorded on the execution log either way.
    let execution = stack
        .executions
        .get_active(WELCOME_SEQUENCE, "c-1")
        .await
        .unwrap()
        .unwrap();
    assert!(!execution.execution_log.is_empty());
    assert_eq!(execution.execution_log[0].rule_id, "WELCOME-EMAIL-02-OPENED");
}

#[tokio::test]
async fn paused_execution_suppresses_scheduled_work() {
    let stack = stack();
    seed_contact(&stack, "c-1", "ana@real-domain.com").await;

    stack
        .sequences
        .start_sequence(WELCOME_SEQUENCE, "c-1", serde_json::Map::new())
        .await
        .unwrap();
    stack
        .contacts
        .update_tags("c-1", &[WELCOME_TAG.to_string()])
        .await
        .unwrap();

    let event = json!({"to": ["ana@real-domain.com"], "templateId": "WEL-001"});
    stack
        .sequences
        .process_email_event(EmailEventType::Opened, &event)
        .await
        .unwrap();
    assert_eq!(stack.scheduled.get_all().await.unwrap().len(), 1);

    // Pause before the unit fires: at fire time the worker re-checks the
    // execution status and drops the work.
    stack
        .sequences
        .pause_sequence(WELCOME_SEQUENCE, "c-1")
        .await
        .unwrap();

    let worker = WorkerTask::new(
        Arc::new(MpscQueueAdapter::<ScheduledUnit>::new(1)),
        stack.sequences.clone(),
        stack.automation.clone(),
        CancellationToken::new(),
    );
    let unit = stack
        .scheduled
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    worker.execute_unit(unit).await;

    assert_eq!(stack.transport.sent_count().await, 0);
    let execution = stack
        .executions
        .get_active(WELCOME_SEQUENCE, "c-1")
        .await
        .unwrap()
        .unwrap();
    // Nothing executed and nothing was logged against the paused execution.
    assert!(execution.execution_log.is_empty());

    // Resuming re-arms the pair for future work.
    stack
        .sequences
        .resume_sequence(WELCOME_SEQUENCE, "c-1")
        .await
        .unwrap();
    let resumed = stack
        .executions
        .get_active(WELCOME_SEQUENCE, "c-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        resumed.status,
        mailflow::sequence::types::ExecutionStatus::Active
    );
}

#[tokio::test]
async fn batch_processing_reports_per_event_outcomes() {
    let stack = stack();
    seed_contact(&stack, "c-1", "ana@real-domain.com").await;

    let events = vec![
        (
            "email.opened".to_string(),
            opened_event("ana@real-domain.com"),
        ),
        ("email.made_up".to_string(), json!({})),
        ("email.delivered".to_string(), json!({"to": []})),
    ];

    let outcomes = stack.router.process_batch(&events).await;
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.success));
}
