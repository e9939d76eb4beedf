//! Template resolution and email dispatch.
//!
//! The mailer composes the template storage, the renderer, and the transport
//! into the single capability the engines consume: "send this template to
//! this recipient with these variables". Organization templates take
//! precedence over the built-in definitions, and organization header/footer
//! templates wrap the rendered content when enabled.
//!
//! In development, and for obvious test addresses, recipients are rewritten
//! to the configured redirect address so real mailboxes never receive
//! engine traffic.

use crate::config::Environment;
use crate::errors::MailerError;
use crate::storage::template::{StoredTemplate, TemplateStorage};
use crate::template::render;
use crate::transport::{EmailTransport, OutboundEmail, SendReceipt};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static pattern compiles"))
}

/// Recipient identity for a templated send.
#[derive(Clone, Debug)]
pub struct Recipient {
    pub email: String,
    pub name: Option<String>,
    pub contact_id: Option<String>,
}

/// A template ready for rendering, with optional branding chrome.
#[derive(Clone, Debug)]
pub struct ResolvedTemplate {
    pub subject: String,
    pub html: String,
    pub text_fallback: Option<String>,
    pub header: Option<String>,
    pub footer: Option<String>,
}

/// Options for a fully rendered send.
#[derive(Clone, Debug)]
pub struct EmailSendOptions {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    pub organization_id: String,
    pub template_name: String,
    pub metadata: Map<String, Value>,
}

/// Per-recipient result of a campaign send.
#[derive(Clone, Debug)]
pub struct RecipientSendResult {
    pub email: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

pub struct TemplateMailer {
    templates: Arc<dyn TemplateStorage>,
    transport: Arc<dyn EmailTransport>,
    from_address: String,
    redirect_address: String,
    environment: Environment,
}

impl TemplateMailer {
    pub fn new(
        templates: Arc<dyn TemplateStorage>,
        transport: Arc<dyn EmailTransport>,
        from_address: impl Into<String>,
        redirect_address: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            templates,
            transport,
            from_address: from_address.into(),
            redirect_address: redirect_address.into(),
            environment,
        }
    }

    /// Resolve a template id: organization templates first, then the
    /// built-in definitions. Returns `None` when neither knows the id.
    pub async fn resolve_template(
        &self,
        template_id: &str,
        organization_id: &str,
    ) -> Result<Option<ResolvedTemplate>, MailerError> {
        let org_templates = match self.templates.get_organization_templates(organization_id).await
        {
            Ok(templates) => templates,
            Err(e) => {
                // Branded lookup failures fall back to built-ins rather than
                // losing the send.
                warn!(error = ?e, organization = %organization_id, "Organization template lookup failed");
                HashMap::new()
            }
        };

        if let Some(template) = org_templates.get(template_id) {
            let header = org_templates
                .get("_header")
                .filter(|t| t.enabled)
                .map(|t| t.html.clone());
            let footer = org_templates
                .get("_footer")
                .filter(|t| t.enabled)
                .map(|t| t.html.clone());

            // An organization row may override only the subject; fall back to
            // the built-in body when its html is empty.
            let html = if template.html.is_empty() {
                builtin_templates()
                    .get(template_id)
                    .map(|t| t.html.clone())
                    .unwrap_or_default()
            } else {
                template.html.clone()
            };

            return Ok(Some(ResolvedTemplate {
                subject: template.subject.clone(),
                html,
                text_fallback: template.text_fallback.clone(),
                header,
                footer,
            }));
        }

        Ok(builtin_templates().get(template_id).map(|t| ResolvedTemplate {
            subject: t.subject.clone(),
            html: t.html.clone(),
            text_fallback: t.text_fallback.clone(),
            header: None,
            footer: None,
        }))
    }

    /// Resolve, render, and send a template to one recipient.
    ///
    /// The render variables are the recipient identity (`nombre`, `email`)
    /// merged under the caller's variables.
    #[instrument(skip(self, variables), fields(template = %template_id, to = %recipient.email))]
    pub async fn send_templated(
        &self,
        template_id: &str,
        recipient: &Recipient,
        organization_id: &str,
        variables: &Value,
    ) -> Result<SendReceipt, MailerError> {
        let template = self
            .resolve_template(template_id, organization_id)
            .await?
            .ok_or_else(|| MailerError::TemplateNotFound {
                template_id: template_id.to_string(),
            })?;

        let render_vars = self.build_render_variables(recipient, variables);
        let subject = render(&template.subject, &render_vars);
        let mut html = render(&template.html, &render_vars);

        if template.header.is_some() || template.footer.is_some() {
            html = wrap_with_branding(
                &html,
                template.header.as_deref().unwrap_or(""),
                template.footer.as_deref().unwrap_or(""),
            );
        }

        let mut metadata = Map::new();
        if let Some(contact_id) = &recipient.contact_id {
            metadata.insert("contactId".to_string(), Value::String(contact_id.clone()));
        }

        self.send_email(EmailSendOptions {
            to: recipient.email.clone(),
            subject,
            html,
            text: template.text_fallback,
            organization_id: organization_id.to_string(),
            template_name: template_id.to_string(),
            metadata,
        })
        .await
    }

    /// Deliver a rendered email through the transport.
    ///
    /// Validates the recipient, applies the development/test redirect, and
    /// attaches the standard tracking headers.
    #[instrument(skip(self, options), fields(to = %options.to, template = %options.template_name))]
    pub async fn send_email(
        &self,
        options: EmailSendOptions,
    ) -> Result<SendReceipt, MailerError> {
        let EmailSendOptions {
            mut to,
            subject,
            html,
            text,
            organization_id,
            template_name,
            metadata,
        } = options;

        if !email_re().is_match(&to) {
            return Err(MailerError::InvalidRecipient { address: to });
        }

        if let Some(reason) = self.redirect_reason(&to) {
            info!(
                reason = reason,
                original_to = %to,
                redirect_to = %self.redirect_address,
                "Redirecting outbound email"
            );
            to = self.redirect_address.clone();
        }

        let mut headers = HashMap::new();
        headers.insert("X-Template-Name".to_string(), template_name.clone());
        headers.insert("X-Entity-Ref-ID".to_string(), Uuid::new_v4().to_string());
        headers.insert("X-Organization-ID".to_string(), organization_id.clone());

        let email = OutboundEmail {
            from: self.from_address.clone(),
            to,
            subject,
            html,
            text,
            headers,
            tags: vec![
                ("template".to_string(), template_name.clone()),
                ("organization".to_string(), organization_id),
            ],
            metadata,
        };

        let receipt = self.transport.send(&email).await?;
        info!(message_id = %receipt.message_id, template = %template_name, "Email sent");
        Ok(receipt)
    }

    /// Send one template to many recipients, collecting per-recipient
    /// results. One failure never aborts the batch.
    pub async fn send_campaign(
        &self,
        template_id: &str,
        recipients: &[Recipient],
        organization_id: &str,
        variables: &Value,
    ) -> Vec<RecipientSendResult> {
        let mut results = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let result = self
                .send_templated(template_id, recipient, organization_id, variables)
                .await;
            results.push(match result {
                Ok(receipt) => RecipientSendResult {
                    email: recipient.email.clone(),
                    success: true,
                    message_id: Some(receipt.message_id),
                    error: None,
                },
                Err(e) => {
                    warn!(error = %e, to = %recipient.email, "Campaign send failed for recipient");
                    RecipientSendResult {
                        email: recipient.email.clone(),
                        success: false,
                        message_id: None,
                        error: Some(e.to_string()),
                    }
                }
            });
        }
        results
    }

    fn build_render_variables(&self, recipient: &Recipient, variables: &Value) -> Value {
        let mut vars = Map::new();
        vars.insert(
            "nombre".to_string(),
            Value::String(recipient.name.clone().unwrap_or_else(|| "Usuario".to_string())),
        );
        vars.insert("email".to_string(), Value::String(recipient.email.clone()));
        if let Value::Object(extra) = variables {
            for (key, value) in extra {
                vars.insert(key.clone(), value.clone());
            }
        }
        Value::Object(vars)
    }

    fn redirect_reason(&self, to: &str) -> Option<&'static str> {
        if self.environment == Environment::Development {
            return Some("development mode");
        }
        if to.contains("example.com") || to.contains("test.") || to.contains("@localhost") {
            return Some("test address detected");
        }
        None
    }
}

fn wrap_with_branding(content: &str, header: &str, footer: &str) -> String {
    format!(
        r#"<div style="font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; line-height: 1.6; color: #334155; background-color: #f8fafc; margin: 0; padding: 20px;">
  <div style="max-width: 600px; margin: 0 auto; background: white; border-radius: 12px; overflow: hidden; box-shadow: 0 4px 6px -1px rgba(0, 0, 0, 0.1);">
    {header}
    <div style="padding: 30px;">
      {content}
    </div>
    {footer}
  </div>
</div>"#
    )
}

/// Built-in template definitions used when no organization template exists.
pub fn builtin_templates() -> HashMap<&'static str, StoredTemplate> {
    let mut templates = HashMap::new();

    templates.insert(
        "welcome",
        StoredTemplate {
            subject: "¡Bienvenido {{nombre}}!".to_string(),
            html: r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h1 style="color: #333;">¡Hola {{nombre}}!</h1>
  <p>Te damos la bienvenida a nuestra plataforma de email marketing inteligente.</p>
  <div style="background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0;">
    <p><strong>Próximos pasos:</strong></p>
    <ul>
      <li>Configura tu primer template</li>
      <li>Crea tu primera campaña</li>
      <li>Revisa nuestro dashboard de analytics</li>
    </ul>
  </div>
  <p>¡Estamos aquí para ayudarte a optimizar tus campañas!</p>
</div>"#
                .to_string(),
            text_fallback: Some(
                "¡Hola {{nombre}}! Te damos la bienvenida a nuestra plataforma.".to_string(),
            ),
            enabled: true,
        },
    );

    templates.insert(
        "campaign-success",
        StoredTemplate {
            subject: "Campaña enviada exitosamente".to_string(),
            html: r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h1 style="color: #28a745;">¡Campaña enviada!</h1>
  <p>Tu campaña "{{campaign_name}}" ha sido enviada exitosamente a {{contact_count}} contactos.</p>
  <div style="background: #d4edda; padding: 20px; border-radius: 8px; margin: 20px 0; border-left: 4px solid #28a745;">
    <p><strong>Estado:</strong> Enviada</p>
    <p><strong>Contactos:</strong> {{contact_count}}</p>
    <p><strong>Fecha:</strong> {{sent_date}}</p>
  </div>
  <p>Puedes monitorear el rendimiento en tiempo real desde tu dashboard.</p>
</div>"#
                .to_string(),
            text_fallback: Some(
                "Tu campaña {{campaign_name}} ha sido enviada exitosamente.".to_string(),
            ),
            enabled: true,
        },
    );

    templates.insert(
        "automation-triggered",
        StoredTemplate {
            subject: "Automatización activada".to_string(),
            html: r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h1 style="color: #007bff;">Automatización en acción</h1>
  <p>Se ha activado una automatización basada en el evento: <strong>{{event_type}}</strong></p>
  <div style="background: #cce7ff; padding: 20px; border-radius: 8px; margin: 20px 0; border-left: 4px solid #007bff;">
    <p><strong>Contacto:</strong> {{contact_email}}</p>
    <p><strong>Evento:</strong> {{event_type}}</p>
    <p><strong>Campaña:</strong> {{campaign_name}}</p>
  </div>
  <p>El sistema está adaptando automáticamente el contenido para optimizar el engagement.</p>
</div>"#
                .to_string(),
            text_fallback: Some(
                "Automatización activada para {{contact_email}} en evento {{event_type}}"
                    .to_string(),
            ),
            enabled: true,
        },
    );

    templates
}
