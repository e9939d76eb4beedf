//! Fact-based condition evaluation.
//!
//! A condition names a dot-delimited fact path into the evaluation context
//! (`"contact.tags"`, `"email.openCount"`), an operator, and an expected
//! value. Conditions act as gates: rules only execute when their condition
//! groups hold. Unknown operators and unresolvable paths fail closed (the
//! condition is false, never an error) so that rule definitions from newer
//! writers cannot crash the dispatcher.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

/// Comparison operators for a single condition.
///
/// The `Unknown` catch-all absorbs unrecognized operator strings from
/// external input; it always evaluates to false with a warning. Both the
/// camelCase names and the snake_case spellings used by campaign automation
/// rules parse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    GreaterThanEqual,
    LessThanEqual,
    In,
    NotIn,
    Exists,
    NotExists,
    Unknown,
}

impl Operator {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "equals" => Self::Equals,
            "notEquals" | "not_equals" => Self::NotEquals,
            "contains" => Self::Contains,
            "notContains" | "not_contains" => Self::NotContains,
            "greaterThan" | "greater_than" => Self::GreaterThan,
            "lessThan" | "less_than" => Self::LessThan,
            "greaterThanEqual" => Self::GreaterThanEqual,
            "lessThanEqual" => Self::LessThanEqual,
            "in" => Self::In,
            "notIn" => Self::NotIn,
            "exists" => Self::Exists,
            "notExists" => Self::NotExists,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
            Self::GreaterThan => "greaterThan",
            Self::LessThan => "lessThan",
            Self::GreaterThanEqual => "greaterThanEqual",
            Self::LessThanEqual => "lessThanEqual",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::Exists => "exists",
            Self::NotExists => "notExists",
            Self::Unknown => "unknown",
        }
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// A single fact test.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub fact: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(fact: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            fact: fact.into(),
            operator,
            value,
        }
    }
}

/// A structured condition group.
///
/// `all` must every hold and `any` must have at least one hold. An absent or
/// empty group is vacuously true; in particular an empty `any` never forces a
/// mismatch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConditionSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<Condition>,
}

impl ConditionSet {
    pub fn all_of(conditions: Vec<Condition>) -> Self {
        Self {
            all: conditions,
            any: Vec::new(),
        }
    }

    pub fn any_of(conditions: Vec<Condition>) -> Self {
        Self {
            all: Vec::new(),
            any: conditions,
        }
    }

    pub fn evaluate(&self, context: &Value) -> bool {
        if !self.all.iter().all(|c| evaluate_condition(c, context)) {
            return false;
        }
        if !self.any.is_empty() && !self.any.iter().any(|c| evaluate_condition(c, context)) {
            return false;
        }
        true
    }
}

/// Evaluate a flat AND-only condition list (the automation flavor).
/// An empty list is an unconditional trigger.
pub fn evaluate_all(conditions: &[Condition], context: &Value) -> bool {
    conditions.iter().all(|c| evaluate_condition(c, context))
}

/// Assemble the evaluation context for a contact/event pair.
///
/// Event fields are spread at the lowest precedence; the explicit `contact`,
/// `event`, and `email` keys are authoritative and overwrite any same-named
/// event field.
pub fn build_context(contact: &Value, event: &Value) -> Value {
    let mut ctx = match event {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    ctx.insert("contact".to_string(), contact.clone());
    ctx.insert("event".to_string(), event.clone());
    ctx.insert("email".to_string(), event.clone());
    Value::Object(ctx)
}

/// Resolve a dot-delimited fact path by sequential key lookup.
/// Missing intermediate keys resolve to `None`.
pub fn resolve_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

/// Evaluate one condition against the context.
pub fn evaluate_condition(condition: &Condition, context: &Value) -> bool {
    let resolved = resolve_path(context, &condition.fact);
    let expected = &condition.value;

    match condition.operator {
        Operator::Equals => resolved == Some(expected),
        Operator::NotEquals => resolved != Some(expected),
        Operator::Contains => contains(resolved, expected),
        Operator::NotContains => match resolved {
            Some(Value::Array(_)) | Some(Value::String(_)) => !contains(resolved, expected),
            _ => true,
        },
        Operator::GreaterThan => compare(resolved, expected, |a, b| a > b),
        Operator::LessThan => compare(resolved, expected, |a, b| a < b),
        Operator::GreaterThanEqual => compare(resolved, expected, |a, b| a >= b),
        Operator::LessThanEqual => compare(resolved, expected, |a, b| a <= b),
        Operator::In => match expected {
            Value::Array(candidates) => {
                resolved.is_some_and(|value| candidates.contains(value))
            }
            _ => false,
        },
        Operator::NotIn => match expected {
            // An unresolved fact is never a member, so notIn holds.
            Value::Array(candidates) => resolved.is_none_or(|value| !candidates.contains(value)),
            _ => false,
        },
        Operator::Exists => is_defined(resolved),
        Operator::NotExists => !is_defined(resolved),
        Operator::Unknown => {
            warn!(fact = %condition.fact, "Unknown condition operator, evaluating to false");
            false
        }
    }
}

/// Defined means the path resolves to a non-null value; the value's type is
/// irrelevant.
fn is_defined(resolved: Option<&Value>) -> bool {
    matches!(resolved, Some(v) if !v.is_null())
}

fn contains(resolved: Option<&Value>, expected: &Value) -> bool {
    match resolved {
        Some(Value::Array(items)) => items.contains(expected),
        Some(Value::String(haystack)) => match expected.as_str() {
            Some(needle) => haystack.contains(needle),
            None => false,
        },
        _ => false,
    }
}

/// Numeric coercion comparison: numbers pass through, strings are parsed,
/// booleans coerce to 0/1. Anything else fails the comparison.
fn compare(resolved: Option<&Value>, expected: &Value, op: fn(f64, f64) -> bool) -> bool {
    match (resolved.and_then(as_number), as_number(expected)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "contact": {
                "id": "c-1",
                "tags": ["Secuencia Welcome", "Email 1 Enviado"],
                "name": "Ana",
                "totalClicks": 3
            },
            "email": {
                "openCount": 2,
                "clickCount": 0,
                "templateId": "WEL-001"
            },
            "status": "active"
        })
    }

    #[test]
    fn equals_is_strict() {
        let c = Condition::new("status", Operator::Equals, json!("active"));
        assert!(evaluate_condition(&c, &ctx()));

        let c = Condition::new("status", Operator::Equals, json!("inactive"));
        assert!(!evaluate_condition(&c, &ctx()));

        let c = Condition::new("contact.name", Operator::NotEquals, json!("Bob"));
        assert!(evaluate_condition(&c, &ctx()));
    }

    #[test]
    fn contains_handles_arrays_and_strings() {
        let c = Condition::new(
            "contact.tags",
            Operator::Contains,
            json!("Secuencia Welcome"),
        );
        assert!(evaluate_condition(&c, &ctx()));

        let c = Condition::new("contact.name", Operator::Contains, json!("An"));
        assert!(evaluate_condition(&c, &ctx()));

        let c = Condition::new("contact.tags", Operator::NotContains, json!("Alto Interés"));
        assert!(evaluate_condition(&c, &ctx()));

        // notContains on an unresolvable path is vacuously true
        let c = Condition::new("contact.missing", Operator::NotContains, json!("x"));
        assert!(evaluate_condition(&c, &ctx()));
    }

    #[test]
    fn numeric_comparisons_coerce() {
        let c = Condition::new("email.openCount", Operator::GreaterThan, json!(0));
        assert!(evaluate_condition(&c, &ctx()));

        let c = Condition::new("email.clickCount", Operator::Equals, json!(0));
        assert!(evaluate_condition(&c, &ctx()));

        // string-to-number coercion on the expected side
        let c = Condition::new("contact.totalClicks", Operator::GreaterThanEqual, json!("3"));
        assert!(evaluate_condition(&c, &ctx()));

        let c = Condition::new("contact.name", Operator::LessThan, json!(5));
        assert!(!evaluate_condition(&c, &ctx()));
    }

    #[test]
    fn in_requires_array_value() {
        let c = Condition::new("status", Operator::In, json!(["active", "pending"]));
        assert!(evaluate_condition(&c, &ctx()));

        let c = Condition::new("status", Operator::In, json!("active"));
        assert!(!evaluate_condition(&c, &ctx()));

        let c = Condition::new("status", Operator::NotIn, json!(["archived"]));
        assert!(evaluate_condition(&c, &ctx()));

        let c = Condition::new("status", Operator::NotIn, json!("archived"));
        assert!(!evaluate_condition(&c, &ctx()));

        // An unresolved fact is not a member of anything.
        let c = Condition::new("contact.missing", Operator::NotIn, json!(["x"]));
        assert!(evaluate_condition(&c, &ctx()));
        let c = Condition::new("contact.missing", Operator::In, json!(["x"]));
        assert!(!evaluate_condition(&c, &ctx()));
    }

    #[test]
    fn exists_depends_only_on_definedness() {
        for fact in ["contact.tags", "email.clickCount", "status"] {
            let c = Condition::new(fact, Operator::Exists, Value::Null);
            assert!(evaluate_condition(&c, &ctx()), "fact {fact} should exist");
        }

        let c = Condition::new("contact.phone", Operator::Exists, Value::Null);
        assert!(!evaluate_condition(&c, &ctx()));

        let c = Condition::new("contact.phone", Operator::NotExists, Value::Null);
        assert!(evaluate_condition(&c, &ctx()));

        let null_ctx = json!({"field": null});
        let c = Condition::new("field", Operator::Exists, Value::Null);
        assert!(!evaluate_condition(&c, &null_ctx));
    }

    #[test]
    fn unknown_operator_is_false() {
        let parsed: Operator = serde_json::from_str("\"matchesRegex\"").unwrap();
        assert_eq!(parsed, Operator::Unknown);

        let c = Condition::new("status", Operator::Unknown, json!("active"));
        assert!(!evaluate_condition(&c, &ctx()));
    }

    #[test]
    fn snake_case_aliases_parse() {
        let parsed: Operator = serde_json::from_str("\"not_equals\"").unwrap();
        assert_eq!(parsed, Operator::NotEquals);
        let parsed: Operator = serde_json::from_str("\"greater_than\"").unwrap();
        assert_eq!(parsed, Operator::GreaterThan);
    }

    #[test]
    fn empty_any_never_forces_false() {
        let set = ConditionSet {
            all: vec![
                Condition::new("status", Operator::Equals, json!("active")),
                Condition::new("email.openCount", Operator::GreaterThan, json!(1)),
            ],
            any: vec![],
        };
        assert!(set.evaluate(&ctx()));

        let set = ConditionSet {
            all: vec![Condition::new("status", Operator::Equals, json!("inactive"))],
            any: vec![],
        };
        assert!(!set.evaluate(&ctx()));
    }

    #[test]
    fn any_group_requires_one_match() {
        let set = ConditionSet {
            all: vec![],
            any: vec![
                Condition::new("status", Operator::Equals, json!("archived")),
                Condition::new("contact.tags", Operator::Contains, json!("Email 1 Enviado")),
            ],
        };
        assert!(set.evaluate(&ctx()));

        let set = ConditionSet {
            all: vec![],
            any: vec![Condition::new("status", Operator::Equals, json!("archived"))],
        };
        assert!(!set.evaluate(&ctx()));
    }

    #[test]
    fn both_groups_combine_with_and() {
        let set = ConditionSet {
            all: vec![Condition::new("status", Operator::Equals, json!("active"))],
            any: vec![Condition::new("status", Operator::Equals, json!("archived"))],
        };
        assert!(!set.evaluate(&ctx()));
    }

    #[test]
    fn flat_list_is_and_only_and_empty_is_unconditional() {
        assert!(evaluate_all(&[], &ctx()));

        let conditions = vec![
            Condition::new("status", Operator::Equals, json!("active")),
            Condition::new("email.templateId", Operator::Equals, json!("WEL-001")),
        ];
        assert!(evaluate_all(&conditions, &ctx()));

        let conditions = vec![
            Condition::new("status", Operator::Equals, json!("active")),
            Condition::new("email.templateId", Operator::Equals, json!("WEL-999")),
        ];
        assert!(!evaluate_all(&conditions, &ctx()));
    }

    #[test]
    fn context_spread_is_lowest_precedence() {
        let contact = json!({"id": "c-1"});
        let event = json!({"subject": "hi", "contact": "should-be-overwritten"});
        let ctx = build_context(&contact, &event);

        assert_eq!(resolve_path(&ctx, "subject"), Some(&json!("hi")));
        assert_eq!(resolve_path(&ctx, "contact.id"), Some(&json!("c-1")));
        assert_eq!(resolve_path(&ctx, "event.subject"), Some(&json!("hi")));
        assert_eq!(resolve_path(&ctx, "email.subject"), Some(&json!("hi")));
    }
}
