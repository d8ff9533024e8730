//! `{{...}}` placeholder rendering over the chain context.
//!
//! Two addressing modes are tried in order for every placeholder:
//!
//! 1. **History-indexed** — `{{1.response.body.x}}`: a leading integer
//!    selects the nth executed step (1-based), the rest is a dot-path into
//!    that history entry.
//! 2. **Back-compat scope** — a dot-path into the synthesized scope
//!    exposing `root`, `prev`, `history` and the `request`/`response`
//!    aliases (see [`ChainContext::scope`]).
//!
//! Unresolved or erroring expressions render to the empty string; rendering
//! never fails.
//!
//! Two render entry points mirror the two call sites: [`render`] walks a
//! JSON tree and substitutes a string that is exactly one placeholder with
//! the resolved value's native type, while [`render_str`] always performs
//! string interpolation. The native-type rule is a documented behavior
//! choice: only a value that is a single placeholder (modulo surrounding
//! whitespace) keeps its type; any mixed text stringifies.

use crate::context::ChainContext;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap());
static WHOLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\{\{([^{}]+)\}\}\s*$").unwrap());
static HISTORY_INDEXED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.(.+)$").unwrap());

/// Render a JSON tree against the chain context.
///
/// Strings are rendered, objects and arrays recurse, every other value
/// passes through unchanged. A string that is exactly one placeholder
/// substitutes the resolved value with its native type.
pub fn render(node: &Value, ctx: &ChainContext) -> Value {
    let scope = ctx.scope();
    render_node(node, &scope, ctx.history())
}

/// Render a single string template, always producing a string.
pub fn render_str(template: &str, ctx: &ChainContext) -> String {
    let scope = ctx.scope();
    interpolate(template, &scope, ctx.history())
}

fn render_node(node: &Value, scope: &Value, history: &[Value]) -> Value {
    match node {
        Value::String(s) => {
            if let Some(caps) = WHOLE.captures(s) {
                // Whole-placeholder value: keep the resolved native type.
                return match resolve_expr(&caps[1], scope, history) {
                    Some(v) => v,
                    None => Value::String(String::new()),
                };
            }
            Value::String(interpolate(s, scope, history))
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_node(v, scope, history)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_node(v, scope, history))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn interpolate(template: &str, scope: &Value, history: &[Value]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            resolve_expr(&caps[1], scope, history)
                .map(|v| stringify(&v))
                .unwrap_or_default()
        })
        .into_owned()
}

/// Resolve one placeholder expression. `None` means "renders empty".
fn resolve_expr(expr: &str, scope: &Value, history: &[Value]) -> Option<Value> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }

    if let Some(caps) = HISTORY_INDEXED.captures(expr) {
        let index: usize = caps[1].parse().ok()?;
        let entry = index.checked_sub(1).and_then(|i| history.get(i))?;
        return dot_path(entry, &caps[2]);
    }

    dot_path(scope, expr)
}

/// Sequential property access over a JSON value. Objects are looked up by
/// key, arrays by numeric segment. Returns `None` the moment a segment is
/// missing or an intermediate is null. A final explicit `null` is returned
/// as `Some(Null)` — it exists, it just renders empty.
pub(crate) fn dot_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// In-string form of a resolved value: scalars via their display form,
/// containers as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
