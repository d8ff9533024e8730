//! Execution context for one chain run.
//!
//! A chain run owns a snapshot of the root invocation, the outcome of the
//! most recent executed step (`prev`), and the ordered history of every
//! executed step. Skipped and failed steps clear `prev` but never touch
//! the history.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Snapshot of the root invocation that triggered the chain.
#[derive(Debug, Clone, Default)]
pub struct RootContext {
    /// Workspace name of the endpoint that handled the root call.
    pub workspace: String,

    /// Project name of the endpoint that handled the root call.
    pub project: String,

    /// Project id, when known (used for log attribution of external steps).
    pub project_id: Option<String>,

    /// Request snapshot, e.g. `{"body": {...}, "headers": {...}}`.
    pub request: Value,

    /// Response snapshot, e.g. `{"status": 200, "body": {...}}`.
    pub response: Value,

    /// Inbound headers of the root call, merged into each step's outbound
    /// headers (step headers win).
    pub headers: BTreeMap<String, String>,

    /// Log row id of the root call, linked from every step's log row.
    pub parent_log_id: Option<String>,

    /// When set, the whole plan is a no-op. Propagated into every internal
    /// dispatch so a chained call can never trigger another chain.
    pub suppress_next_calls: bool,
}

impl RootContext {
    /// Create a root context for the given workspace/project pair.
    pub fn new(workspace: &str, project: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            project: project.to_string(),
            ..Self::default()
        }
    }

    /// Set the request snapshot.
    pub fn with_request(mut self, request: Value) -> Self {
        self.request = request;
        self
    }

    /// Set the response snapshot.
    pub fn with_response(mut self, response: Value) -> Self {
        self.response = response;
        self
    }

    /// Set the inbound headers of the root call.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the project id.
    pub fn with_project_id(mut self, id: &str) -> Self {
        self.project_id = Some(id.to_string());
        self
    }

    /// Set the parent log row id.
    pub fn with_parent_log(mut self, id: &str) -> Self {
        self.parent_log_id = Some(id.to_string());
        self
    }
}

/// Status and body captured from one dispatched step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub status: u16,
    pub body: Value,
}

impl StepOutcome {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// The shape the condition evaluator sees for `prev`.
    pub fn to_value(&self) -> Value {
        json!({ "status": self.status, "body": self.body })
    }
}

/// Rolling state of a chain run: root snapshot, previous outcome, history.
#[derive(Debug)]
pub struct ChainContext<'a> {
    root: &'a RootContext,

    /// Outcome of the most recent executed step. Cleared by skips/failures.
    prev: Option<StepOutcome>,

    /// History-entry form of `prev`, used as the `prev` template scope.
    prev_entry: Option<Value>,

    /// One entry per executed step, in plan order. 1-indexed in templates.
    history: Vec<Value>,
}

impl<'a> ChainContext<'a> {
    /// Create a fresh context for one chain run.
    pub fn new(root: &'a RootContext) -> Self {
        Self {
            root,
            prev: None,
            prev_entry: None,
            history: Vec::new(),
        }
    }

    pub fn root(&self) -> &'a RootContext {
        self.root
    }

    pub fn prev(&self) -> Option<&StepOutcome> {
        self.prev.as_ref()
    }

    pub fn history(&self) -> &[Value] {
        &self.history
    }

    /// Forget the previous outcome. Called after a skipped or failed step so
    /// downstream `prev` references see no data.
    pub fn clear_prev(&mut self) {
        self.prev = None;
        self.prev_entry = None;
    }

    /// Record an executed step: append a history entry and update `prev`.
    ///
    /// The entry exposes the same data under `request`, `response`, `res`
    /// and `status` so that both `{{n.response.body.x}}` and
    /// `{{n.res.body.x}}` addressing resolve identically.
    pub fn record(
        &mut self,
        request_body: Value,
        request_headers: &BTreeMap<String, String>,
        outcome: StepOutcome,
    ) {
        let headers: Map<String, Value> = request_headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let entry = json!({
            "request": { "body": request_body, "headers": headers },
            "response": { "body": outcome.body },
            "res": { "status": outcome.status, "body": outcome.body },
            "status": outcome.status,
        });

        self.history.push(entry.clone());
        self.prev_entry = Some(entry);
        self.prev = Some(outcome);
    }

    /// Synthesize the back-compat template scope: `root`, `prev`, `history`
    /// plus the `request`/`response` aliases.
    ///
    /// `request` is the previous step's request, falling back to the root
    /// request. `response` is the previous step's response, falling back to
    /// the root response; an object response without a `body` key is wrapped
    /// as `{"body": ...}` so `response.body.x` paths stay addressable.
    pub fn scope(&self) -> Value {
        let root = json!({
            "req": self.root.request,
            "request": self.root.request,
            "res": self.root.response,
            "response": self.root.response,
        });

        let request = self
            .prev_entry
            .as_ref()
            .and_then(|e| e.get("request"))
            .cloned()
            .unwrap_or_else(|| self.root.request.clone());

        let raw_response = self
            .prev_entry
            .as_ref()
            .and_then(|e| e.get("response"))
            .cloned()
            .unwrap_or_else(|| self.root.response.clone());

        json!({
            "root": root,
            "prev": self.prev_entry.clone().unwrap_or(Value::Null),
            "history": self.history,
            "request": request,
            "response": normalize_response(raw_response),
        })
    }
}

/// Wrap an object response lacking a `body` key as `{"body": ...}`.
fn normalize_response(value: Value) -> Value {
    match value {
        Value::Object(ref map) if !map.contains_key("body") => json!({ "body": value }),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_appends_aliased_entry() {
        let root = RootContext::new("acme", "crm");
        let mut ctx = ChainContext::new(&root);

        ctx.record(
            json!({"id": 1}),
            &BTreeMap::new(),
            StepOutcome::new(201, json!({"ok": true})),
        );

        assert_eq!(ctx.history().len(), 1);
        let entry = &ctx.history()[0];
        assert_eq!(entry["response"]["body"]["ok"], json!(true));
        assert_eq!(entry["res"]["body"]["ok"], json!(true));
        assert_eq!(entry["res"]["status"], json!(201));
        assert_eq!(entry["status"], json!(201));
        assert_eq!(entry["request"]["body"]["id"], json!(1));
        assert_eq!(ctx.prev().unwrap().status, 201);
    }

    #[test]
    fn clear_prev_keeps_history() {
        let root = RootContext::new("acme", "crm");
        let mut ctx = ChainContext::new(&root);

        ctx.record(json!({}), &BTreeMap::new(), StepOutcome::new(200, json!(1)));
        ctx.clear_prev();

        assert!(ctx.prev().is_none());
        assert_eq!(ctx.history().len(), 1);
        assert_eq!(ctx.scope()["prev"], Value::Null);
    }

    #[test]
    fn scope_aliases_fall_back_to_root() {
        let root = RootContext::new("acme", "crm")
            .with_request(json!({"body": {"id": 9}}))
            .with_response(json!({"status": 200, "body": {"seen": true}}));
        let ctx = ChainContext::new(&root);

        let scope = ctx.scope();
        assert_eq!(scope["request"]["body"]["id"], json!(9));
        assert_eq!(scope["response"]["body"]["seen"], json!(true));
        assert_eq!(scope["root"]["req"]["body"]["id"], json!(9));
    }

    #[test]
    fn scope_wraps_bodyless_root_response() {
        let root = RootContext::new("acme", "crm").with_response(json!({"seen": true}));
        let ctx = ChainContext::new(&root);

        let scope = ctx.scope();
        assert_eq!(scope["response"]["body"]["seen"], json!(true));
    }

    #[test]
    fn scope_prefers_prev_over_root() {
        let root = RootContext::new("acme", "crm")
            .with_request(json!({"body": {"id": 9}}))
            .with_response(json!({"status": 200, "body": {"root": true}}));
        let mut ctx = ChainContext::new(&root);

        ctx.record(
            json!({"id": 10}),
            &BTreeMap::new(),
            StepOutcome::new(200, json!({"step": true})),
        );

        let scope = ctx.scope();
        assert_eq!(scope["request"]["body"]["id"], json!(10));
        assert_eq!(scope["response"]["body"]["step"], json!(true));
    }
}
