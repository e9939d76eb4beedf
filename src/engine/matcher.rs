//! Rule selection for a trigger.
//!
//! Filters a rule list down to enabled rules whose trigger matches and whose
//! conditions hold against the evaluation context, ordered by ascending
//! priority. The sort is stable, so rules sharing a priority tier execute in
//! declaration order.

use serde_json::Value;
use tracing::debug;

use crate::sequence::types::{Rule, Trigger};

/// Select the rules to execute for `trigger`, in execution order.
pub fn match_rules<'a>(trigger: Trigger, rules: &'a [Rule], context: &Value) -> Vec<&'a Rule> {
    let mut matched: Vec<&Rule> = rules
        .iter()
        .filter(|rule| rule.enabled && rule.trigger == trigger)
        .filter(|rule| {
            let holds = rule
                .conditions
                .as_ref()
                .map(|conditions| conditions.evaluate(context))
                .unwrap_or(true);
            if !holds {
                debug!(rule = %rule.id, "Skipping rule, conditions not met");
            }
            holds
        })
        .collect();

    matched.sort_by_key(|rule| rule.priority);
    matched
}
