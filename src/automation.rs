//! Campaign automation processing.
//!
//! The simpler of the two rule consumers: automation rules carry a flat
//! AND-only condition list evaluated directly against the event data, and an
//! ordered action list. A `wait` action defers the remainder of that rule's
//! action list through the scheduler; other rules are unaffected. Follow-up
//! email content is adapted to the triggering event before sending.

use chrono::Utc;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, instrument, warn};

use crate::engine::condition::evaluate_all;
use crate::engine::executor::apply_tag_changes;
use crate::errors::EngineError;
use crate::events::{EmailEventType, recipient_email};
use crate::mailer::{EmailSendOptions, TemplateMailer};
use crate::storage::automation_rule::{AutomationAction, AutomationStorage, SendEmailConfig};
use crate::storage::contact::ContactStorage;
use crate::storage::scheduled::{ScheduledJob, ScheduledUnit, ScheduledWorkStorage};
use crate::template::render;

pub struct AutomationProcessor {
    storage: Arc<dyn AutomationStorage>,
    contacts: Arc<dyn ContactStorage>,
    mailer: Arc<TemplateMailer>,
    scheduled: Arc<dyn ScheduledWorkStorage>,
    organization_id: String,
}

impl AutomationProcessor {
    pub fn new(
        storage: Arc<dyn AutomationStorage>,
        contacts: Arc<dyn ContactStorage>,
        mailer: Arc<TemplateMailer>,
        scheduled: Arc<dyn ScheduledWorkStorage>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            contacts,
            mailer,
            scheduled,
            organization_id: organization_id.into(),
        }
    }

    /// Run every active automation rule registered for this event type.
    ///
    /// An empty condition list is an unconditional trigger. Each matching
    /// rule's actions run in declaration order; one action's failure is
    /// logged and the rest continue.
    #[instrument(skip(self, data), fields(event = %event_type))]
    pub async fn process_event(
        &self,
        event_type: EmailEventType,
        data: &Value,
    ) -> Result<(), EngineError> {
        let rules = self.storage.get_active_rules(event_type).await?;
        debug!(count = rules.len(), "Fetched automation rules");

        for rule in rules {
            if !evaluate_all(&rule.conditions, data) {
                debug!(rule = %rule.id, "Automation conditions not met");
                continue;
            }

            info!(rule = %rule.id, campaign = %rule.campaign_id, "Executing automation rule");
            self.execute_actions(&rule.actions, event_type, data, &rule.campaign_id)
                .await;
        }

        Ok(())
    }

    /// Resume the remainder of a rule's action list after a scheduled wait.
    pub async fn execute_scheduled(
        &self,
        campaign_id: &str,
        event_type: EmailEventType,
        actions: &[AutomationAction],
        event: &Value,
    ) {
        debug!(campaign = %campaign_id, count = actions.len(), "Resuming scheduled automation actions");
        self.execute_actions(actions, event_type, event, campaign_id)
            .await;
    }

    async fn execute_actions(
        &self,
        actions: &[AutomationAction],
        event_type: EmailEventType,
        event: &Value,
        campaign_id: &str,
    ) {
        for (index, action) in actions.iter().enumerate() {
            match action {
                AutomationAction::SendEmail(config) => {
                    if config.delay_hours > 0 {
                        // Only the send itself is deferred; later actions in
                        // the list keep executing now.
                        let deferred = AutomationAction::SendEmail(SendEmailConfig {
                            template_id: config.template_id.clone(),
                            delay_hours: 0,
                        });
                        self.schedule_actions(
                            campaign_id,
                            event_type,
                            vec![deferred],
                            event,
                            config.delay_hours,
                        )
                        .await;
                    } else if let Err(e) =
                        self.send_follow_up(&config.template_id, event_type, event, campaign_id).await
                    {
                        warn!(error = %e, template = %config.template_id, "Follow-up send failed");
                    }
                }
                AutomationAction::UpdateContent(config) => {
                    if let Err(e) = self
                        .storage
                        .update_campaign_field(campaign_id, &config.field, &config.new_value)
                        .await
                    {
                        warn!(error = ?e, campaign = %campaign_id, "Campaign content update failed");
                    }
                }
                AutomationAction::AddTag(config) => {
                    self.apply_tag(event, std::slice::from_ref(&config.tag), &[])
                        .await;
                }
                AutomationAction::RemoveTag(config) => {
                    self.apply_tag(event, &[], std::slice::from_ref(&config.tag))
                        .await;
                }
                AutomationAction::Wait(config) => {
                    // Defer everything after the wait and stop walking this
                    // rule's list.
                    let remaining: Vec<AutomationAction> = actions[index + 1..].to_vec();
                    if remaining.is_empty() {
                        debug!("Wait action with no subsequent actions, nothing to schedule");
                    } else {
                        self.schedule_actions(
                            campaign_id,
                            event_type,
                            remaining,
                            event,
                            config.duration_hours,
                        )
                        .await;
                    }
                    return;
                }
                AutomationAction::Unknown => {
                    warn!("Unknown automation action type, skipping");
                }
            }
        }
    }

    async fn schedule_actions(
        &self,
        campaign_id: &str,
        event_type: EmailEventType,
        actions: Vec<AutomationAction>,
        event: &Value,
        delay_hours: u64,
    ) {
        let fire_at = Utc::now() + chrono::Duration::hours(delay_hours as i64);
        let unit = ScheduledUnit::new(
            fire_at,
            ScheduledJob::AutomationResume {
                campaign_id: campaign_id.to_string(),
                event_type,
                actions,
                event: event.clone(),
            },
        );

        match self.scheduled.save(&unit).await {
            Ok(()) => {
                info!(campaign = %campaign_id, fire_at = %fire_at, "Scheduled automation continuation");
            }
            Err(e) => {
                warn!(error = ?e, campaign = %campaign_id, "Failed to schedule automation continuation");
            }
        }
    }

    async fn apply_tag(&self, event: &Value, to_add: &[String], to_remove: &[String]) {
        let Some(email) = recipient_email(event) else {
            warn!("Tag action without recipient in event data");
            return;
        };

        let contact = match self.contacts.get_by_email(&email).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                warn!(email = %email, "Contact not found for tag action");
                return;
            }
            Err(e) => {
                warn!(error = ?e, email = %email, "Contact lookup failed for tag action");
                return;
            }
        };

        if let Err(e) =
            apply_tag_changes(self.contacts.as_ref(), &contact.id, to_add, to_remove).await
        {
            warn!(error = ?e, contact = %contact.id, "Tag action failed");
        }
    }

    /// Resolve, adapt, render, and send a follow-up email for an event.
    async fn send_follow_up(
        &self,
        template_id: &str,
        event_type: EmailEventType,
        event: &Value,
        campaign_id: &str,
    ) -> Result<(), EngineError> {
        let template = match self
            .mailer
            .resolve_template(template_id, &self.organization_id)
            .await
        {
            Ok(Some(template)) => template,
            Ok(None) => {
                warn!(template = %template_id, "Follow-up template not found");
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, template = %template_id, "Template resolution failed");
                return Ok(());
            }
        };

        let Some(email) = recipient_email(event) else {
            warn!("Follow-up event carries no recipient");
            return Ok(());
        };

        let Some(contact) = self.contacts.get_by_email(&email).await? else {
            warn!(email = %email, "Follow-up contact not found");
            return Ok(());
        };

        let (subject_template, html_template) =
            adapt_content(&template.subject, &template.html, event_type);

        let mut variables = Map::new();
        variables.insert(
            "nombre".to_string(),
            Value::String(contact.name.clone().unwrap_or_else(|| "Usuario".to_string())),
        );
        variables.insert("email".to_string(), Value::String(contact.email.clone()));
        variables.insert(
            "contact".to_string(),
            serde_json::to_value(&contact).unwrap_or(Value::Null),
        );
        variables.insert(
            "original_subject".to_string(),
            event.get("subject").cloned().unwrap_or(Value::Null),
        );
        variables.insert(
            "event_type".to_string(),
            Value::String(event_type.as_str().to_string()),
        );
        variables.insert(
            "campaign_id".to_string(),
            Value::String(campaign_id.to_string()),
        );
        let variables = Value::Object(variables);

        let mut metadata = Map::new();
        metadata.insert(
            "campaignId".to_string(),
            Value::String(campaign_id.to_string()),
        );
        metadata.insert(
            "eventType".to_string(),
            Value::String(event_type.as_str().to_string()),
        );

        let result = self
            .mailer
            .send_email(EmailSendOptions {
                to: contact.email.clone(),
                subject: render(&subject_template, &variables),
                html: render(&html_template, &variables),
                text: template.text_fallback.clone(),
                organization_id: self.organization_id.clone(),
                template_name: template_id.to_string(),
                metadata,
            })
            .await;

        if let Err(e) = result {
            warn!(error = %e, template = %template_id, to = %contact.email, "Follow-up send failed");
        }

        Ok(())
    }
}

fn click_here_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Click here").expect("static pattern compiles"))
}

fn learn_more_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Learn more").expect("static pattern compiles"))
}

fn anchor_text_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)href="([^"]*)"([^>]*>)([^<]+)<"#).expect("static pattern compiles")
    })
}

fn body_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<body[^>]*>").expect("static pattern compiles"))
}

/// Adapt follow-up content to the triggering event.
///
/// Total over the event type: unhandled events return the template
/// unchanged, so new provider events can never break the dispatcher.
pub fn adapt_content(
    subject: &str,
    html: &str,
    event_type: EmailEventType,
) -> (String, String) {
    match event_type {
        EmailEventType::Opened => {
            // Opened but not clicked: push urgency into the call to action.
            let subject = format!("Still interested? {subject}");
            let html = enhance_call_to_action(html);
            (subject, html)
        }
        EmailEventType::Clicked => (
            "Thanks for your interest! Next steps inside".to_string(),
            add_thank_you_message(html),
        ),
        EmailEventType::Bounced => ("Alternative ways to connect".to_string(), html.to_string()),
        EmailEventType::Complained => (
            "We're sorry - you've been unsubscribed".to_string(),
            apology_message(),
        ),
        _ => (subject.to_string(), html.to_string()),
    }
}

fn enhance_call_to_action(html: &str) -> String {
    let html = click_here_re().replace_all(html, "Click now - Limited time offer");
    let html = learn_more_re().replace_all(&html, "Get instant access");
    anchor_text_re()
        .replace_all(&html, r#"href="${1}"${2}${3} - Don't miss out!<"#)
        .into_owned()
}

fn add_thank_you_message(html: &str) -> String {
    let block = r#"<div style="background: #f0f9ff; padding: 20px; border-radius: 8px; margin: 20px 0;">
  <h3 style="color: #0369a1;">Thank you for your interest!</h3>
  <p>We noticed you clicked on our previous email. Here's what happens next:</p>
</div>"#;

    if body_open_re().is_match(html) {
        body_open_re()
            .replace(html, |caps: &regex::Captures| {
                format!("{}{}", &caps[0], block)
            })
            .into_owned()
    } else {
        format!("{block}{html}")
    }
}

fn apology_message() -> String {
    r#"<html>
  <body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <div style="text-align: center; padding: 40px;">
      <h2 style="color: #dc2626;">We're truly sorry</h2>
      <p>We understand that our email wasn't what you were looking for.</p>
      <p>You have been successfully unsubscribed from our mailing list.</p>
      <p style="color: #6b7280; font-size: 14px;">
        If this was a mistake, you can resubscribe at any time on our website.
      </p>
    </div>
  </body>
</html>"#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::storage::automation_rule::{
        AutomationRule, MemoryAutomationStorage, TagConfig, UpdateContentConfig, WaitConfig,
    };
    use crate::storage::contact::{Contact, MemoryContactStorage};
    use crate::storage::scheduled::MemoryScheduledWorkStorage;
    use crate::storage::template::MemoryTemplateStorage;
    use crate::transport::CaptureTransport;
    use serde_json::json;

    struct Fixture {
        storage: Arc<MemoryAutomationStorage>,
        contacts: Arc<MemoryContactStorage>,
        scheduled: Arc<MemoryScheduledWorkStorage>,
        transport: Arc<CaptureTransport>,
        processor: AutomationProcessor,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(MemoryAutomationStorage::new());
        let contacts = Arc::new(MemoryContactStorage::new());
        let scheduled = Arc::new(MemoryScheduledWorkStorage::new());
        let transport = Arc::new(CaptureTransport::new());
        let mailer = Arc::new(TemplateMailer::new(
            Arc::new(MemoryTemplateStorage::new()),
            transport.clone(),
            "Mailflow <noreply@mailflow.dev>",
            "redirect@mailflow.dev",
            Environment::Production,
        ));
        let processor = AutomationProcessor::new(
            storage.clone(),
            contacts.clone(),
            mailer,
            scheduled.clone(),
            "default",
        );
        Fixture {
            storage,
            contacts,
            scheduled,
            transport,
            processor,
        }
    }

    async fn seed_contact(fix: &Fixture) {
        let contact = Contact::new("c-1", "ana@real-domain.com", Some("Ana".to_string()));
        fix.contacts.insert(&contact).await.unwrap();
    }

    fn bounce_rule(actions: Vec<AutomationAction>) -> AutomationRule {
        AutomationRule {
            id: "r-bounce".to_string(),
            campaign_id: "camp-1".to_string(),
            trigger_event: EmailEventType::Bounced,
            conditions: vec![],
            actions,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn empty_conditions_always_execute() {
        let fix = fixture();
        seed_contact(&fix).await;
        fix.storage
            .insert_rule(&bounce_rule(vec![AutomationAction::AddTag(TagConfig {
                tag: "Rebotado".to_string(),
            })]))
            .await
            .unwrap();

        // Payload contents are irrelevant when the condition list is empty.
        let event = json!({"to": ["ana@real-domain.com"], "bounce": {"type": "hard", "reason": "x"}});
        fix.processor
            .process_event(EmailEventType::Bounced, &event)
            .await
            .unwrap();

        let contact = fix.contacts.get_by_id("c-1").await.unwrap().unwrap();
        assert!(contact.tags.contains(&"Rebotado".to_string()));
    }

    #[tokio::test]
    async fn conditions_filter_on_event_data() {
        let fix = fixture();
        seed_contact(&fix).await;

        let mut rule = bounce_rule(vec![AutomationAction::AddTag(TagConfig {
            tag: "Rebote Duro".to_string(),
        })]);
        rule.conditions = vec![crate::engine::condition::Condition::new(
            "bounce.type",
            crate::engine::condition::Operator::Equals,
            json!("hard"),
        )];
        fix.storage.insert_rule(&rule).await.unwrap();

        let soft = json!({"to": ["ana@real-domain.com"], "bounce": {"type": "soft", "reason": "x"}});
        fix.processor
            .process_event(EmailEventType::Bounced, &soft)
            .await
            .unwrap();
        let contact = fix.contacts.get_by_id("c-1").await.unwrap().unwrap();
        assert!(contact.tags.is_empty());

        let hard = json!({"to": ["ana@real-domain.com"], "bounce": {"type": "hard", "reason": "x"}});
        fix.processor
            .process_event(EmailEventType::Bounced, &hard)
            .await
            .unwrap();
        let contact = fix.contacts.get_by_id("c-1").await.unwrap().unwrap();
        assert!(contact.tags.contains(&"Rebote Duro".to_string()));
    }

    #[tokio::test]
    async fn send_email_goes_out_immediately_without_delay() {
        let fix = fixture();
        seed_contact(&fix).await;
        fix.storage
            .insert_rule(&bounce_rule(vec![AutomationAction::SendEmail(
                SendEmailConfig {
                    template_id: "welcome".to_string(),
                    delay_hours: 0,
                },
            )]))
            .await
            .unwrap();

        let event = json!({"to": ["ana@real-domain.com"], "subject": "orig"});
        fix.processor
            .process_event(EmailEventType::Bounced, &event)
            .await
            .unwrap();

        assert_eq!(fix.transport.sent_count().await, 1);
        // Bounce adaptation swaps the subject wholesale.
        assert_eq!(
            fix.transport.sent().await[0].subject,
            "Alternative ways to connect"
        );
    }

    #[tokio::test]
    async fn delayed_send_is_scheduled_not_sent() {
        let fix = fixture();
        seed_contact(&fix).await;
        fix.storage
            .insert_rule(&bounce_rule(vec![AutomationAction::SendEmail(
                SendEmailConfig {
                    template_id: "welcome".to_string(),
                    delay_hours: 4,
                },
            )]))
            .await
            .unwrap();

        let event = json!({"to": ["ana@real-domain.com"]});
        fix.processor
            .process_event(EmailEventType::Bounced, &event)
            .await
            .unwrap();

        assert_eq!(fix.transport.sent_count().await, 0);
        let pending = fix.scheduled.get_all().await.unwrap();
        assert_eq!(pending.len(), 1);
        match &pending[0].job {
            ScheduledJob::AutomationResume { actions, .. } => {
                assert_eq!(actions.len(), 1);
                assert_eq!(actions[0].kind(), "send_email");
            }
            _ => panic!("wrong job kind"),
        }
    }

    #[tokio::test]
    async fn wait_defers_remaining_actions_only() {
        let fix = fixture();
        seed_contact(&fix).await;
        fix.storage
            .insert_rule(&bounce_rule(vec![
                AutomationAction::AddTag(TagConfig {
                    tag: "Primero".to_string(),
                }),
                AutomationAction::Wait(WaitConfig { duration_hours: 2 }),
                AutomationAction::AddTag(TagConfig {
                    tag: "Después".to_string(),
                }),
            ]))
            .await
            .unwrap();

        let event = json!({"to": ["ana@real-domain.com"]});
        fix.processor
            .process_event(EmailEventType::Bounced, &event)
            .await
            .unwrap();

        // The first action ran; the one behind the wait did not.
        let contact = fix.contacts.get_by_id("c-1").await.unwrap().unwrap();
        assert!(contact.tags.contains(&"Primero".to_string()));
        assert!(!contact.tags.contains(&"Después".to_string()));

        let pending = fix.scheduled.get_all().await.unwrap();
        assert_eq!(pending.len(), 1);
        match &pending[0].job {
            ScheduledJob::AutomationResume { actions, .. } => {
                assert_eq!(actions.len(), 1);
                assert_eq!(actions[0].kind(), "add_tag");
            }
            _ => panic!("wrong job kind"),
        }
    }

    #[tokio::test]
    async fn update_content_writes_campaign_field() {
        let fix = fixture();
        fix.storage
            .insert_rule(&bounce_rule(vec![AutomationAction::UpdateContent(
                UpdateContentConfig {
                    field: "status".to_string(),
                    new_value: json!("paused"),
                },
            )]))
            .await
            .unwrap();

        let event = json!({"to": ["ana@real-domain.com"]});
        fix.processor
            .process_event(EmailEventType::Bounced, &event)
            .await
            .unwrap();

        assert_eq!(
            fix.storage.campaign_field("camp-1", "status").await,
            Some(json!("paused"))
        );
    }

    #[test]
    fn adaptation_is_total_over_event_types() {
        let subject = "Nuestra oferta";
        let html = r#"<html><body><p>Click here</p><a href="https://x.test" id="a">Learn more</a></body></html>"#;

        let (opened_subject, opened_html) =
            adapt_content(subject, html, EmailEventType::Opened);
        assert!(opened_subject.starts_with("Still interested?"));
        assert!(opened_subject.contains(subject));
        assert!(opened_html.contains("Click now - Limited time offer"));
        assert!(opened_html.contains("Don't miss out!"));
        assert_ne!(opened_html, html);

        let (clicked_subject, clicked_html) =
            adapt_content(subject, html, EmailEventType::Clicked);
        assert_eq!(clicked_subject, "Thanks for your interest! Next steps inside");
        assert!(clicked_html.contains("Thank you for your interest!"));

        let (bounced_subject, bounced_html) =
            adapt_content(subject, html, EmailEventType::Bounced);
        assert_eq!(bounced_subject, "Alternative ways to connect");
        assert_eq!(bounced_html, html);

        let (complained_subject, complained_html) =
            adapt_content(subject, html, EmailEventType::Complained);
        assert_eq!(complained_subject, "We're sorry - you've been unsubscribed");
        assert!(complained_html.contains("unsubscribed from our mailing list"));

        // The default arm leaves the template untouched.
        let (sent_subject, sent_html) = adapt_content(subject, html, EmailEventType::Sent);
        assert_eq!(sent_subject, subject);
        assert_eq!(sent_html, html);
    }

    #[test]
    fn thank_you_block_lands_after_body_tag() {
        let html = r#"<html><body style="margin:0"><p>content</p></body></html>"#;
        let adapted = add_thank_you_message(html);
        let body_pos = adapted.find("<body").unwrap();
        let block_pos = adapted.find("Thank you for your interest!").unwrap();
        let content_pos = adapted.find("<p>content</p>").unwrap();
        assert!(body_pos < block_pos);
        assert!(block_pos < content_pos);
    }
}
