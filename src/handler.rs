//! Inbound contract of the stateful request handler.
//!
//! Internal steps do not go over the network: the orchestrator synthesizes
//! a minimal request object and invokes the handler in-process, capturing
//! whatever the handler writes into a [`ResponseCapture`]. The handler is
//! injected as a trait object so this crate never depends on the handler
//! module itself.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Routing metadata carried alongside an internal dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteInfo {
    pub method: String,
    pub workspace_name: String,
    pub project_name: String,
    pub project_id: String,

    /// `/workspace/project`
    pub base_path: String,

    /// Full request path, `/workspace/project` + rendered sub path.
    pub raw_path: String,

    /// Rendered logical path below the project.
    pub sub_path: String,

    pub stateful_id: String,
    pub stateless_id: String,
}

/// Chain-related request flags.
///
/// `suppress_next_calls` is always set on chain-issued dispatches; the
/// handler must honor it by not triggering its own chained-call plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    pub is_next_call: bool,
    pub suppress_next_calls: bool,
}

/// The request-like object an internal dispatch hands to the handler.
#[derive(Debug, Clone)]
pub struct InternalRequest {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub base_url: String,
    pub original_url: String,
    pub universal: RouteInfo,
    pub flags: RequestFlags,
    pub user: Option<String>,

    /// Per-request scratch space, mirrors `res.locals`.
    pub locals: Value,
}

/// Captures what the handler writes, Express-style: `status()`, `set()`,
/// `json()`/`send()`.
#[derive(Debug, Default)]
pub struct ResponseCapture {
    status: Option<u16>,
    headers: BTreeMap<String, String>,
    body: Option<Value>,
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status code. Chainable.
    pub fn status(&mut self, code: u16) -> &mut Self {
        self.status = Some(code);
        self
    }

    /// Set a response header.
    pub fn set(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Alias of [`ResponseCapture::set`].
    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.set(key, value)
    }

    /// Write a JSON body.
    pub fn json(&mut self, body: Value) -> &mut Self {
        self.body = Some(body);
        self
    }

    /// Write a body of any shape.
    pub fn send(&mut self, body: Value) -> &mut Self {
        self.body = Some(body);
        self
    }

    /// Snapshot of everything captured. Status defaults to 200 when the
    /// handler never set one.
    pub fn to_json(&self) -> CapturedResponse {
        CapturedResponse {
            status: self.status.unwrap_or(200),
            headers: self.headers.clone(),
            body: self.body.clone().unwrap_or(Value::Null),
        }
    }
}

/// Final state of a [`ResponseCapture`].
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl CapturedResponse {
    pub fn to_value(&self) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        json!({ "status": self.status, "headers": headers, "body": self.body })
    }
}

/// The stateful request handler, as seen from the chain executor.
#[async_trait]
pub trait StatefulHandler: Send + Sync {
    /// Process one synthesized request, writing the result into `res`.
    async fn handle(&self, req: InternalRequest, res: &mut ResponseCapture)
        -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_defaults_to_200_null() {
        let res = ResponseCapture::new();
        let cap = res.to_json();
        assert_eq!(cap.status, 200);
        assert_eq!(cap.body, Value::Null);
    }

    #[test]
    fn capture_chains_like_express() {
        let mut res = ResponseCapture::new();
        res.status(201).set("X-Item-Id", "9").json(json!({"ok": true}));

        let cap = res.to_json();
        assert_eq!(cap.status, 201);
        assert_eq!(cap.headers.get("x-item-id").map(String::as_str), Some("9"));
        assert_eq!(cap.body, json!({"ok": true}));

        let value = cap.to_value();
        assert_eq!(value["status"], json!(201));
        assert_eq!(value["body"]["ok"], json!(true));
    }

    #[test]
    fn send_overwrites_previous_body() {
        let mut res = ResponseCapture::new();
        res.json(json!({"a": 1}));
        res.send(Value::String("plain".into()));
        assert_eq!(res.to_json().body, json!("plain"));
    }
}
