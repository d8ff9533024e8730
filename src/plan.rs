//! Plan builder: loose authored config in, strict step plan out.
//!
//! The advanced config is stored as an ordered JSON array of duck-typed
//! objects. [`build_plan`] is total: `null`, non-arrays and junk entries
//! never fail, they just produce fewer steps. Order is preserved — it is
//! the execution order.

use crate::condition::Condition;
use crate::step::{AuthMode, LogPolicy, NormalizedStep, StepTarget};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// `/<workspace>/<project>/<rest-of-path>`
static ROUTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/([^/]+)/([^/]+)(/.+)$").unwrap());

/// Normalize a raw advanced-config array into an executable step plan.
pub fn build_plan(raw: &Value) -> Vec<NormalizedStep> {
    let Some(entries) = raw.as_array() else {
        return Vec::new();
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| build_step(entry, i))
        .collect()
}

fn build_step(entry: &Value, index: usize) -> Option<NormalizedStep> {
    let entry = entry.as_object()?;

    let endpoint = entry
        .get("target_endpoint")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let target = StepTarget {
        method: entry
            .get("method")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_uppercase(),
        ..parse_endpoint(endpoint)
    };

    let log = entry.get("log").map(parse_log).unwrap_or_default();

    let auth = match entry
        .get("auth")
        .and_then(|a| a.get("mode"))
        .and_then(Value::as_str)
    {
        None | Some("same-user") => AuthMode::SameUser,
        Some(_) => AuthMode::Anonymous,
    };

    Some(NormalizedStep {
        name: step_name(entry, index),
        target,
        payload: entry.get("body").cloned().unwrap_or(Value::Null),
        headers: entry.get("headers").cloned().unwrap_or(Value::Null),
        condition: Condition::from_value(entry.get("condition")),
        delay_ms: duration_field(entry, "delay_ms", "delayMs"),
        timeout_ms: duration_field(entry, "timeout_ms", "timeoutMs"),
        log,
        auth,
    })
}

/// Split the authored `target_endpoint` into an external URL or a
/// workspace/project/logical-path triple. An unmatched value leaves all
/// fields unset; the resolver fails such a step at runtime.
fn parse_endpoint(endpoint: &str) -> StepTarget {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        // Keep the full URL for dispatch; the extracted path only feeds the
        // legacy workspace/project pattern, which normally will not match.
        let path = endpoint
            .split_once("://")
            .map(|(_, rest)| rest)
            .and_then(|rest| rest.find('/').map(|i| &rest[i..]))
            .unwrap_or("/");
        let mut target = route_fields(path);
        target.external_url = Some(endpoint.to_string());
        return target;
    }

    route_fields(endpoint)
}

fn route_fields(path: &str) -> StepTarget {
    match ROUTE.captures(path) {
        Some(caps) => StepTarget {
            workspace: Some(caps[1].to_string()),
            project: Some(caps[2].to_string()),
            logical_path: Some(caps[3].to_string()),
            ..StepTarget::default()
        },
        None => StepTarget::default(),
    }
}

fn parse_log(log: &Value) -> LogPolicy {
    LogPolicy {
        persist: log.get("persist").and_then(Value::as_bool) != Some(false),
        notify: log.get("notify").and_then(Value::as_bool) == Some(true),
    }
}

/// Accept both snake_case and camelCase duration fields, coerced to a
/// non-negative integer number of milliseconds, defaulting to 0.
fn duration_field(entry: &serde_json::Map<String, Value>, snake: &str, camel: &str) -> u64 {
    let raw = entry.get(snake).or_else(|| entry.get(camel));
    let n = match raw {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() && n > 0.0 {
        n as u64
    } else {
        0
    }
}

fn step_name(entry: &serde_json::Map<String, Value>, index: usize) -> String {
    if let Some(name) = entry.get("name").and_then(Value::as_str) {
        if !name.is_empty() {
            return name.to_string();
        }
    }
    let id = entry
        .get("id")
        .or_else(|| entry.get("_id"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    match id {
        Some(id) => format!("call-{id}"),
        None => format!("call-{}", index + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, ConditionOp};
    use serde_json::json;

    #[test]
    fn non_array_input_builds_nothing() {
        assert!(build_plan(&Value::Null).is_empty());
        assert!(build_plan(&json!({"not": "an array"})).is_empty());
        assert!(build_plan(&json!("steps")).is_empty());
    }

    #[test]
    fn junk_entries_are_dropped() {
        let plan = build_plan(&json!([42, "x", {"target_endpoint": "/ws/pj/users"}]));
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].name, "call-3");
    }

    #[test]
    fn internal_endpoint_splits_into_route() {
        let plan = build_plan(&json!([{
            "name": "create-lead",
            "target_endpoint": "/acme/crm/leads/:id",
            "method": "post",
        }]));

        let target = &plan[0].target;
        assert_eq!(target.workspace.as_deref(), Some("acme"));
        assert_eq!(target.project.as_deref(), Some("crm"));
        assert_eq!(target.logical_path.as_deref(), Some("/leads/:id"));
        assert_eq!(target.method, "POST");
        assert!(!target.is_external());
    }

    #[test]
    fn absolute_url_is_external_with_extracted_path() {
        let plan = build_plan(&json!([
            {"target_endpoint": "https://hooks.example.com/notify?k=1"},
            {"target_endpoint": "HTTP://example.com"},
        ]));

        let first = &plan[0].target;
        assert_eq!(
            first.external_url.as_deref(),
            Some("https://hooks.example.com/notify?k=1")
        );
        assert!(first.is_external());
        assert!(first.workspace.is_none());

        assert!(plan[1].target.is_external());
    }

    #[test]
    fn unroutable_endpoint_leaves_target_unset() {
        let plan = build_plan(&json!([{"target_endpoint": "/just-one-segment"}]));
        let target = &plan[0].target;
        assert!(target.workspace.is_none());
        assert!(target.project.is_none());
        assert!(target.logical_path.is_none());
        assert!(!target.is_external());
    }

    #[test]
    fn duration_fields_accept_both_spellings() {
        let plan = build_plan(&json!([
            {"target_endpoint": "/a/b/c", "delay_ms": 250, "timeout_ms": 1000},
            {"target_endpoint": "/a/b/c", "delayMs": "300", "timeoutMs": 2.9},
            {"target_endpoint": "/a/b/c", "delay_ms": -5, "timeoutMs": "junk"},
        ]));

        assert_eq!((plan[0].delay_ms, plan[0].timeout_ms), (250, 1000));
        assert_eq!((plan[1].delay_ms, plan[1].timeout_ms), (300, 2));
        assert_eq!((plan[2].delay_ms, plan[2].timeout_ms), (0, 0));
    }

    #[test]
    fn log_and_auth_defaults() {
        let plan = build_plan(&json!([
            {"target_endpoint": "/a/b/c"},
            {"target_endpoint": "/a/b/c", "log": {"persist": false, "notify": true}},
            {"target_endpoint": "/a/b/c", "auth": {"mode": "none"}},
        ]));

        assert!(plan[0].log.persist);
        assert!(!plan[0].log.notify);
        assert_eq!(plan[0].auth, AuthMode::SameUser);

        assert!(!plan[1].log.persist);
        assert!(plan[1].log.notify);

        assert_eq!(plan[2].auth, AuthMode::Anonymous);
    }

    #[test]
    fn names_default_from_id_then_position() {
        let plan = build_plan(&json!([
            {"target_endpoint": "/a/b/c", "name": "explicit"},
            {"target_endpoint": "/a/b/c", "id": "abc123"},
            {"target_endpoint": "/a/b/c", "_id": 7},
            {"target_endpoint": "/a/b/c"},
        ]));

        assert_eq!(plan[0].name, "explicit");
        assert_eq!(plan[1].name, "call-abc123");
        assert_eq!(plan[2].name, "call-7");
        assert_eq!(plan[3].name, "call-4");
    }

    #[test]
    fn condition_and_templates_are_carried() {
        let plan = build_plan(&json!([{
            "target_endpoint": "/a/b/c",
            "body": {"id": "{{1.response.body.id}}"},
            "headers": {"x-tag": "{{root.request.body.tag}}"},
            "condition": {"path": "status", "op": "eq", "value": 200},
        }]));

        assert_eq!(plan[0].payload["id"], json!("{{1.response.body.id}}"));
        assert_eq!(plan[0].headers["x-tag"], json!("{{root.request.body.tag}}"));
        match plan[0].condition.as_ref().unwrap() {
            Condition::Rule(rule) => assert_eq!(rule.op, ConditionOp::Eq),
            other => panic!("unexpected condition: {other:?}"),
        }
    }
}
