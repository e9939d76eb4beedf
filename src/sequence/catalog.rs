//! Predefined sequence definitions.
//!
//! Sequences are immutable: the catalog is built once at startup and read
//! for the life of the process. Rule data (tags, template ids, delays,
//! priorities) drives everything; the engine has no sequence-specific code.

use serde_json::{Map, Value, json};

use crate::constants::{SEQ_ENGAGEMENT, SEQ_LAST_CHANCE, SEQ_URGENCY, SEQ_WELCOME};
use crate::engine::action::{
    Action, AddTagParams, Delay, EndSequenceParams, SendEmailParams, Timing,
};
use crate::engine::condition::{Condition, ConditionSet, Operator};
use crate::sequence::types::{Rule, SendingWindow, Sequence, SequenceConfig, Trigger};
use std::time::Duration;

/// Read-only registry of sequence definitions.
pub struct SequenceCatalog {
    sequences: Vec<Sequence>,
}

impl SequenceCatalog {
    pub fn new(sequences: Vec<Sequence>) -> Self {
        Self { sequences }
    }

    /// The shipped sequence set.
    pub fn predefined() -> Self {
        Self::new(vec![
            welcome_series(),
            engagement_booster(),
            urgency_conversion(),
            last_chance(),
        ])
    }

    pub fn get(&self, sequence_id: &str) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.id == sequence_id)
    }

    pub fn all(&self) -> &[Sequence] {
        &self.sequences
    }

    pub fn enabled(&self) -> Vec<&Sequence> {
        self.sequences.iter().filter(|s| s.enabled).collect()
    }
}

fn props(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn contains(fact: &str, value: &str) -> Condition {
    Condition::new(fact, Operator::Contains, json!(value))
}

fn not_contains(fact: &str, value: &str) -> Condition {
    Condition::new(fact, Operator::NotContains, json!(value))
}

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|t| t.to_string()).collect()
}

/// Four-email welcome series that adapts to recipient behavior.
fn welcome_series() -> Sequence {
    Sequence {
        id: SEQ_WELCOME.to_string(),
        name: "Serie de Bienvenida Inteligente".to_string(),
        description: "Secuencia de 4 emails que se adapta según el comportamiento del usuario"
            .to_string(),
        enabled: true,
        config: SequenceConfig {
            max_duration: Some(Duration::from_secs(14 * 86_400)),
            max_emails: Some(4),
            cooldown_period: Some(Duration::from_secs(6 * 3600)),
            timezone: Some("America/Argentina/Buenos_Aires".to_string()),
            sending_window: Some(SendingWindow {
                start: "09:00".to_string(),
                end: "18:00".to_string(),
                days: vec![1, 2, 3, 4, 5],
            }),
        },
        rules: vec![
            Rule {
                id: "WELCOME-EMAIL-01".to_string(),
                name: "Email de Bienvenida".to_string(),
                description: "Primer email enviado inmediatamente tras la suscripción".to_string(),
                enabled: true,
                priority: 1,
                trigger: Trigger::OnContactCreated,
                conditions: None,
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "WEL-001".to_string(),
                    subject: Some("¡Bienvenido/a {{contact.name}}!".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "email": "{{contact.email}}",
                        "fechaRegistro": "{{today}}"
                    })),
                    tags_to_add: tags(&["Secuencia Welcome", "Email 1 Enviado"]),
                    ..Default::default()
                }),
                timing: Some(Timing::immediate()),
            },
            Rule {
                id: "WELCOME-EMAIL-02-OPENED".to_string(),
                name: "Email de Seguimiento - Usuario Interesado".to_string(),
                description: "Segundo email para usuarios que abrieron el primer email"
                    .to_string(),
                enabled: true,
                priority: 10,
                trigger: Trigger::OnEmailOpened,
                conditions: Some(ConditionSet::all_of(vec![
                    Condition::new("email.templateId", Operator::Equals, json!("WEL-001")),
                    contains("contact.tags", "Secuencia Welcome"),
                ])),
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "WEL-002".to_string(),
                    subject: Some("{{contact.name}}, esto te va a encantar".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "contenidoPersonalizado": "{{getRecommendedContent(contact)}}"
                    })),
                    tags_to_add: tags(&["Email 2 Enviado", "Usuario Interesado"]),
                    tags_to_remove: tags(&["Email 1 Enviado"]),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::hours(24))),
            },
            Rule {
                id: "WELCOME-EMAIL-02-NOT-OPENED".to_string(),
                name: "Email de Reactivación - Usuario Pasivo".to_string(),
                description: "Email alternativo para usuarios que no abrieron el primero"
                    .to_string(),
                enabled: true,
                priority: 11,
                trigger: Trigger::OnTimeElapsed,
                conditions: Some(ConditionSet::all_of(vec![
                    contains("contact.tags", "Email 1 Enviado"),
                    Condition::new("email.openCount", Operator::Equals, json!(0)),
                ])),
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "WEL-002-ALT".to_string(),
                    subject: Some("¿Te perdiste esto? (Reabrimos para ti)".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "motivoReactivacion": "No queremos que te pierdas contenido valioso"
                    })),
                    tags_to_add: tags(&["Email Reactivación Enviado", "Usuario Pasivo"]),
                    tags_to_remove: tags(&["Email 1 Enviado"]),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::hours(48))),
            },
            Rule {
                id: "WELCOME-EMAIL-03-CLICKED".to_string(),
                name: "Email de Engagement Avanzado".to_string(),
                description: "Tercer email para usuarios que hicieron click".to_string(),
                enabled: true,
                priority: 20,
                trigger: Trigger::OnEmailClicked,
                conditions: Some(ConditionSet::all_of(vec![contains(
                    "contact.tags",
                    "Usuario Interesado",
                )])),
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "WEL-003".to_string(),
                    subject: Some("{{contact.name}}, acceso exclusivo desbloqueado".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "contenidoExclusivo": "{{getPremiumContent(contact)}}",
                        "llamadaAccion": "Únete a nuestro programa VIP"
                    })),
                    tags_to_add: tags(&["Email 3 Enviado", "Usuario Muy Interesado"]),
                    tags_to_remove: tags(&["Email 2 Enviado"]),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::hours(72))),
            },
            Rule {
                id: "WELCOME-EMAIL-04-FINAL".to_string(),
                name: "Email Final - Call to Action".to_string(),
                description: "Último email de la secuencia con CTA fuerte".to_string(),
                enabled: true,
                priority: 30,
                trigger: Trigger::OnTimeElapsed,
                conditions: Some(ConditionSet::any_of(vec![
                    contains("contact.tags", "Usuario Muy Interesado"),
                    contains("contact.tags", "Usuario Pasivo"),
                ])),
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "WEL-004".to_string(),
                    subject: Some("Última oportunidad: {{contact.name}}".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "ofertaEspecial": "{{getSpecialOffer(contact)}}",
                        "urgencia": "Solo hasta el {{getExpirationDate()}}"
                    })),
                    tags_to_add: tags(&["Secuencia Completada"]),
                    tags_to_remove: tags(&["Secuencia Welcome"]),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::days(7))),
            },
            Rule {
                id: "WELCOME-CLEANUP".to_string(),
                name: "Finalizar Secuencia Welcome".to_string(),
                description: "Limpia tags y finaliza la secuencia".to_string(),
                enabled: true,
                priority: 99,
                trigger: Trigger::OnTimeElapsed,
                conditions: Some(ConditionSet::all_of(vec![contains(
                    "contact.tags",
                    "Secuencia Welcome",
                )])),
                action: Action::EndSequence(EndSequenceParams {
                    tags_to_add: tags(&["Welcome Completado - No Convertido"]),
                    tags_to_remove: tags(&[
                        "Secuencia Welcome",
                        "Email 1 Enviado",
                        "Email 2 Enviado",
                        "Email 3 Enviado",
                    ]),
                }),
                timing: Some(Timing::delayed(Delay::days(14))),
            },
        ],
    }
}

/// Re-engagement for contacts who open but never click.
fn engagement_booster() -> Sequence {
    Sequence {
        id: SEQ_ENGAGEMENT.to_string(),
        name: "Recuperación de Engagement".to_string(),
        description: "Para usuarios que abren emails pero no hacen click".to_string(),
        enabled: true,
        config: SequenceConfig {
            max_duration: Some(Duration::from_secs(10 * 86_400)),
            max_emails: Some(3),
            cooldown_period: Some(Duration::from_secs(12 * 3600)),
            timezone: Some("America/Argentina/Buenos_Aires".to_string()),
            sending_window: None,
        },
        rules: vec![
            Rule {
                id: "ENGAGEMENT-TRIGGER".to_string(),
                name: "Detectar Usuario Pasivo".to_string(),
                description: "Detecta usuarios que abren pero no hacen click".to_string(),
                enabled: true,
                priority: 1,
                trigger: Trigger::OnTimeElapsed,
                conditions: Some(ConditionSet::all_of(vec![
                    Condition::new("email.openCount", Operator::GreaterThan, json!(0)),
                    Condition::new("email.clickCount", Operator::Equals, json!(0)),
                    not_contains("contact.tags", "Engagement Activo"),
                ])),
                action: Action::AddContactTag(AddTagParams {
                    tags_to_add: tags(&["Engagement Necesario", "Secuencia Engagement"]),
                }),
                timing: Some(Timing::delayed(Delay::hours(48))),
            },
            Rule {
                id: "ENGAGEMENT-EMAIL-01".to_string(),
                name: "Email de Valor Directo".to_string(),
                description: "Primer email con contenido muy valioso".to_string(),
                enabled: true,
                priority: 10,
                trigger: Trigger::OnTimeElapsed,
                conditions: Some(ConditionSet::all_of(vec![contains(
                    "contact.tags",
                    "Engagement Necesario",
                )])),
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "ENG-001".to_string(),
                    subject: Some("{{contact.name}}, te preparé algo especial".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "contenidoValor": "{{getHighValueContent(contact)}}",
                        "beneficioClaro": "En 5 minutos tendrás resultados concretos"
                    })),
                    tags_to_add: tags(&["Engagement Email 1 Enviado"]),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::hours(2))),
            },
            Rule {
                id: "ENGAGEMENT-EMAIL-02".to_string(),
                name: "Email de Social Proof".to_string(),
                description: "Segundo email con testimonios y casos de éxito".to_string(),
                enabled: true,
                priority: 20,
                trigger: Trigger::OnTimeElapsed,
                conditions: Some(ConditionSet::all_of(vec![contains(
                    "contact.tags",
                    "Engagement Email 1 Enviado",
                )])),
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "ENG-002".to_string(),
                    subject: Some("Mira lo que lograron otros como {{contact.name}}".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "testimonios": "{{getRelevantTestimonials(contact)}}",
                        "casosExito": "{{getSuccessStories(contact)}}"
                    })),
                    tags_to_add: tags(&["Engagement Email 2 Enviado"]),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::days(3))),
            },
            Rule {
                id: "ENGAGEMENT-EMAIL-03".to_string(),
                name: "Email de Oferta Irresistible".to_string(),
                description: "Tercer email con oferta muy atractiva".to_string(),
                enabled: true,
                priority: 30,
                trigger: Trigger::OnTimeElapsed,
                conditions: Some(ConditionSet::all_of(vec![contains(
                    "contact.tags",
                    "Engagement Email 2 Enviado",
                )])),
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "ENG-003".to_string(),
                    subject: Some("{{contact.name}}, solo para ti: 50% OFF".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "ofertaPersonalizada": "{{getPersonalizedOffer(contact)}}",
                        "descuentoEspecial": "50% de descuento válido hasta {{getOfferExpiration()}}",
                        "razonUrgencia": "Solo 24 horas para aprovechar"
                    })),
                    tags_to_add: tags(&["Oferta Especial Enviada"]),
                    tags_to_remove: tags(&["Engagement Necesario"]),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::days(5))),
            },
        ],
    }
}

/// Intensive conversion push for highly engaged contacts.
fn urgency_conversion() -> Sequence {
    Sequence {
        id: SEQ_URGENCY.to_string(),
        name: "Urgencia y Conversión".to_string(),
        description: "Para usuarios que muestran interés alto".to_string(),
        enabled: true,
        config: SequenceConfig {
            max_duration: Some(Duration::from_secs(7 * 86_400)),
            max_emails: Some(4),
            cooldown_period: Some(Duration::from_secs(4 * 3600)),
            timezone: None,
            sending_window: None,
        },
        rules: vec![
            Rule {
                id: "URGENCY-TRIGGER".to_string(),
                name: "Usuario Alta Engagement".to_string(),
                description: "Detecta usuarios con clicks múltiples".to_string(),
                enabled: true,
                priority: 1,
                trigger: Trigger::OnEmailClicked,
                conditions: Some(ConditionSet::all_of(vec![Condition::new(
                    "contact.totalClicks",
                    Operator::GreaterThan,
                    json!(2),
                )])),
                action: Action::AddContactTag(AddTagParams {
                    tags_to_add: tags(&["Alto Interés", "Secuencia Urgencia"]),
                }),
                timing: None,
            },
            Rule {
                id: "URGENCY-EMAIL-01".to_string(),
                name: "Email de Urgencia Inicial".to_string(),
                description: "Primer email creando urgencia".to_string(),
                enabled: true,
                priority: 10,
                trigger: Trigger::OnTimeElapsed,
                conditions: Some(ConditionSet::all_of(vec![contains(
                    "contact.tags",
                    "Alto Interés",
                )])),
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "URG-001".to_string(),
                    subject: Some("{{contact.name}}, quedan pocas plazas disponibles".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "plazasRestantes": "{{getAvailableSpots()}}",
                        "tiempoLimite": "Solo hasta {{getDeadline()}}"
                    })),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::hours(1))),
            },
            Rule {
                id: "URGENCY-EMAIL-02".to_string(),
                name: "Email de Urgencia Media".to_string(),
                description: "Segundo email incrementando urgencia".to_string(),
                enabled: true,
                priority: 20,
                trigger: Trigger::OnTimeElapsed,
                conditions: None,
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "URG-002".to_string(),
                    subject: Some("ÚLTIMO AVISO: {{contact.name}}, se acaba hoy".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "horasRestantes": "{{getHoursRemaining()}}",
                        "beneficiosUltimos": "{{getFinalBenefits()}}"
                    })),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::hours(24))),
            },
        ],
    }
}

/// Final win-back attempt before letting a contact go.
fn last_chance() -> Sequence {
    Sequence {
        id: SEQ_LAST_CHANCE.to_string(),
        name: "Última Oportunidad".to_string(),
        description: "Secuencia final para recuperar contactos perdidos".to_string(),
        enabled: true,
        config: SequenceConfig {
            max_duration: Some(Duration::from_secs(5 * 86_400)),
            max_emails: Some(3),
            cooldown_period: Some(Duration::from_secs(24 * 3600)),
            timezone: None,
            sending_window: None,
        },
        rules: vec![
            Rule {
                id: "LASTCHANCE-EMAIL-01".to_string(),
                name: "Email de Reconexión".to_string(),
                description: "Reestablecer conexión emocional".to_string(),
                enabled: true,
                priority: 10,
                trigger: Trigger::OnContactCreated,
                conditions: None,
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "LAST-001".to_string(),
                    subject: Some("{{contact.name}}, ¿algo salió mal?".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "mensajePersonal": "Notamos que no has interactuado con nosotros...",
                        "ofertaEspecial": "{{getWinbackOffer()}}"
                    })),
                    ..Default::default()
                }),
                timing: None,
            },
            Rule {
                id: "LASTCHANCE-EMAIL-02".to_string(),
                name: "Email de Súper Oferta".to_string(),
                description: "Oferta irresistible como último intento".to_string(),
                enabled: true,
                priority: 20,
                trigger: Trigger::OnTimeElapsed,
                conditions: None,
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "LAST-002".to_string(),
                    subject: Some("{{contact.name}}, 70% OFF - Nunca viste esto".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "superOferta": "70% de descuento exclusivo",
                        "justificacion": "Es nuestro regalo de despedida para ti"
                    })),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::hours(48))),
            },
            Rule {
                id: "LASTCHANCE-EMAIL-03".to_string(),
                name: "Email de Despedida".to_string(),
                description: "Despedida elegante y opción de mantenerse".to_string(),
                enabled: true,
                priority: 30,
                trigger: Trigger::OnTimeElapsed,
                conditions: None,
                action: Action::SendSequenceEmail(SendEmailParams {
                    template_id: "LAST-003".to_string(),
                    subject: Some("Adiós {{contact.name}}, fue un placer conocerte".to_string()),
                    personalizations: props(json!({
                        "nombre": "{{contact.name}}",
                        "mensajeDespedida": "Respetamos tu decisión de no continuar",
                        "opcionQuedar": "Si cambias de opinión, siempre tendrás las puertas abiertas"
                    })),
                    tags_to_add: tags(&["Secuencia Finalizada", "No Convertido"]),
                    tags_to_remove: tags(&["Secuencia Activa"]),
                    ..Default::default()
                }),
                timing: Some(Timing::delayed(Delay::days(3))),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Validator;

    #[test]
    fn predefined_catalog_has_four_sequences() {
        let catalog = SequenceCatalog::predefined();
        assert_eq!(catalog.all().len(), 4);
        assert!(catalog.get(SEQ_WELCOME).is_some());
        assert!(catalog.get(SEQ_ENGAGEMENT).is_some());
        assert!(catalog.get(SEQ_URGENCY).is_some());
        assert!(catalog.get(SEQ_LAST_CHANCE).is_some());
        assert!(catalog.get("SEQ-NOPE").is_none());
    }

    #[test]
    fn predefined_sequences_pass_validation() {
        let catalog = SequenceCatalog::predefined();
        for sequence in catalog.all() {
            Validator::validate_sequence(sequence)
                .unwrap_or_else(|e| panic!("{} failed validation: {e}", sequence.id));
        }
    }

    #[test]
    fn welcome_rules_are_priority_ordered_by_declaration() {
        let catalog = SequenceCatalog::predefined();
        let welcome = catalog.get(SEQ_WELCOME).unwrap();
        let priorities: Vec<i32> = welcome.rules.iter().map(|r| r.priority).collect();
        let mut sorted = priorities.clone();
        sorted.sort_unstable();
        assert_eq!(priorities, sorted);
        assert_eq!(welcome.rules.len(), 6);
    }

    #[test]
    fn delayed_rules_carry_durations() {
        let catalog = SequenceCatalog::predefined();
        let welcome = catalog.get(SEQ_WELCOME).unwrap();

        let followup = welcome
            .rules
            .iter()
            .find(|r| r.id == "WELCOME-EMAIL-02-OPENED")
            .unwrap();
        assert!(followup.is_delayed());
        assert_eq!(
            followup.delay_duration(),
            Some(Duration::from_secs(24 * 3600))
        );

        let first = welcome
            .rules
            .iter()
            .find(|r| r.id == "WELCOME-EMAIL-01")
            .unwrap();
        assert!(!first.is_delayed());
    }
}
