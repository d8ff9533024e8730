//! Per-step execution gates.
//!
//! A condition decides whether a step runs, judged against the previous
//! step's outcome (preferred) or the root response. Conditions are parsed
//! once at plan-build time; evaluation never panics and malformed input
//! falls back to a safe default: absent conditions pass, unknown operators
//! fail.

use crate::context::{RootContext, StepOutcome};
use crate::template::dot_path;
use serde_json::Value;

/// Parsed form of a step's `condition` field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Bare number: passes when the source status equals it.
    Status(f64),
    /// Bare boolean: returned as-is.
    Literal(bool),
    /// `{source, path, op, value}` rule.
    Rule(ConditionRule),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionRule {
    pub source: Option<ConditionSource>,
    pub path: String,
    pub op: ConditionOp,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionSource {
    Prev,
    Root,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Eq,
    Neq,
    Gt,
    Lt,
    In,
    NotIn,
    Exists,
    Truthy,
    Unknown,
}

impl Condition {
    /// Parse the loosely-typed authored condition. `None` means "no
    /// condition" (the step always runs). Any present-but-malformed value
    /// parses to a rule with an unknown operator, which evaluates false.
    pub fn from_value(raw: Option<&Value>) -> Option<Condition> {
        match raw {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => n.as_f64().map(Condition::Status),
            Some(Value::Bool(b)) => Some(Condition::Literal(*b)),
            Some(Value::Object(map)) => {
                let source = match map.get("source").and_then(Value::as_str) {
                    Some("prev") => Some(ConditionSource::Prev),
                    Some("root") => Some(ConditionSource::Root),
                    _ => None,
                };
                let op = match map.get("op").and_then(Value::as_str) {
                    Some("eq") => ConditionOp::Eq,
                    Some("neq") => ConditionOp::Neq,
                    Some("gt") => ConditionOp::Gt,
                    Some("lt") => ConditionOp::Lt,
                    Some("in") => ConditionOp::In,
                    Some("notin") => ConditionOp::NotIn,
                    Some("exists") => ConditionOp::Exists,
                    None => ConditionOp::Truthy,
                    Some(_) => ConditionOp::Unknown,
                };
                Some(Condition::Rule(ConditionRule {
                    source,
                    path: map
                        .get("path")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    op,
                    value: map.get("value").cloned(),
                }))
            }
            Some(_) => Some(Condition::Rule(ConditionRule {
                source: None,
                path: String::new(),
                op: ConditionOp::Unknown,
                value: None,
            })),
        }
    }
}

/// Decide whether a step should execute.
pub fn evaluate(
    condition: Option<&Condition>,
    prev: Option<&StepOutcome>,
    root: &RootContext,
) -> bool {
    let Some(condition) = condition else {
        return true;
    };

    match condition {
        Condition::Literal(b) => *b,
        Condition::Status(expected) => {
            let status = match prev {
                Some(outcome) => Some(Value::from(outcome.status)),
                None => root.response.get("status").cloned(),
            };
            let actual = js_number(status.as_ref());
            actual == *expected
        }
        Condition::Rule(rule) => evaluate_rule(rule, prev, root),
    }
}

fn evaluate_rule(rule: &ConditionRule, prev: Option<&StepOutcome>, root: &RootContext) -> bool {
    let source = rule.source.unwrap_or(if prev.is_some() {
        ConditionSource::Prev
    } else {
        ConditionSource::Root
    });

    let source_value = match source {
        ConditionSource::Prev => prev.map(StepOutcome::to_value),
        ConditionSource::Root => Some(root.response.clone()),
    };

    let val = source_value.as_ref().and_then(|src| {
        if rule.path.is_empty() {
            Some(src.clone())
        } else {
            dot_path(src, &rule.path)
        }
    });

    match rule.op {
        ConditionOp::Eq => strict_eq(val.as_ref(), rule.value.as_ref()),
        ConditionOp::Neq => !strict_eq(val.as_ref(), rule.value.as_ref()),
        ConditionOp::Gt => js_number(val.as_ref()) > js_number(rule.value.as_ref()),
        ConditionOp::Lt => js_number(val.as_ref()) < js_number(rule.value.as_ref()),
        ConditionOp::In => members(rule.value.as_ref())
            .map(|items| items.iter().any(|v| strict_eq(val.as_ref(), Some(v))))
            .unwrap_or(false),
        ConditionOp::NotIn => members(rule.value.as_ref())
            .map(|items| !items.iter().any(|v| strict_eq(val.as_ref(), Some(v))))
            .unwrap_or(false),
        ConditionOp::Exists => val.is_some(),
        ConditionOp::Truthy => js_truthy(val.as_ref()),
        ConditionOp::Unknown => false,
    }
}

fn members(value: Option<&Value>) -> Option<&Vec<Value>> {
    match value {
        Some(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// `===` over JSON values; numbers compare by numeric value.
fn strict_eq(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x.as_f64() == y.as_f64(),
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// JS `Number()` coercion. Missing values and non-numeric shapes are NaN,
/// which makes every comparison false.
fn js_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse().unwrap_or(f64::NAN)
            }
        }
        Some(Value::Array(items)) => match items.as_slice() {
            [] => 0.0,
            [only] => js_number(Some(only)),
            _ => f64::NAN,
        },
        Some(Value::Object(_)) => f64::NAN,
    }
}

/// JS truthiness.
fn js_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}
