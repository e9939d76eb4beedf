//! Template variable interpolation.
//!
//! Two substitution passes, first match wins per occurrence:
//!
//! 1. `{{identifier}}` is replaced with the variable's string value. A
//!    missing variable leaves the placeholder untouched so unresolved
//!    variables stay visible in delivered mail instead of silently
//!    disappearing.
//! 2. `{expression}` evaluates a deliberately tiny expression language: a
//!    ternary conditional with `===`/`!==`, a dot-path property access, a
//!    quoted string literal, or a bare variable lookup. Evaluation errors
//!    and null results leave the literal in place.
//!
//! This is intentionally not a general expression language; do not grow it.

use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("static pattern compiles"))
}

fn expression_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("static pattern compiles"))
}

fn ternary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*\?\s*(.+?)\s*:\s*(.+)$").expect("static pattern compiles"))
}

/// Render `template` against a JSON object of variables.
pub fn render(template: &str, variables: &Value) -> String {
    let pass_one = placeholder_re().replace_all(template, |caps: &Captures| {
        let key = &caps[1];
        match variables.get(key) {
            Some(value) if !value.is_null() => value_to_string(value),
            _ => caps[0].to_string(),
        }
    });

    expression_re()
        .replace_all(&pass_one, |caps: &Captures| {
            let expression = caps[1].trim();
            evaluate_expression(expression, variables).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn evaluate_expression(expression: &str, variables: &Value) -> Option<String> {
    if expression.contains('?') && expression.contains(':') {
        return evaluate_ternary(expression, variables);
    }

    if expression.contains('.') {
        return property_access(expression, variables);
    }

    match variables.get(expression) {
        Some(value) if !value.is_null() => Some(value_to_string(value)),
        _ => None,
    }
}

/// `cond ? a : b` where `cond` is an `===`/`!==` comparison or a bare
/// truthiness check.
fn evaluate_ternary(expression: &str, variables: &Value) -> Option<String> {
    let caps = ternary_re().captures(expression)?;
    let condition = caps.get(1)?.as_str().trim();
    let when_true = caps.get(2)?.as_str().trim();
    let when_false = caps.get(3)?.as_str().trim();

    let branch = if evaluate_comparison(condition, variables) {
        when_true
    } else {
        when_false
    };

    evaluate_value(branch, variables)
}

fn evaluate_comparison(condition: &str, variables: &Value) -> bool {
    if let Some((left, right)) = condition.split_once("===") {
        return evaluate_value(left.trim(), variables) == evaluate_value(right.trim(), variables);
    }
    if let Some((left, right)) = condition.split_once("!==") {
        return evaluate_value(left.trim(), variables) != evaluate_value(right.trim(), variables);
    }
    matches!(evaluate_value(condition, variables), Some(s) if !s.is_empty())
}

/// A value term: quoted string literal, dot-path access, or variable lookup
/// falling back to the literal text itself.
fn evaluate_value(value: &str, variables: &Value) -> Option<String> {
    if value.len() >= 2 {
        let quoted_single = value.starts_with('\'') && value.ends_with('\'');
        let quoted_double = value.starts_with('"') && value.ends_with('"');
        if quoted_single || quoted_double {
            return Some(value[1..value.len() - 1].to_string());
        }
    }

    if value.contains('.') {
        return property_access(value, variables);
    }

    match variables.get(value) {
        Some(v) if !v.is_null() => Some(value_to_string(v)),
        _ => Some(value.to_string()),
    }
}

fn property_access(path: &str, variables: &Value) -> Option<String> {
    let mut current = variables;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    if current.is_null() {
        return None;
    }
    Some(value_to_string(current))
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
