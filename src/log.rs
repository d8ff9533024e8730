//! Request-log persistence for executed steps.
//!
//! One row per executed step when the step's log policy says so. Writes
//! are best-effort: a failing store is logged and swallowed, it never
//! changes the outcome of the step or the plan.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

/// One request-log row, in the same shape root-call logging uses.
#[derive(Debug, Clone, Serialize)]
pub struct ChainLogRow {
    pub project_id: Option<String>,
    pub origin_endpoint_id: Option<String>,
    pub stateful_endpoint_id: Option<String>,
    pub user_id: Option<String>,
    pub method: String,

    /// `/workspace/project/...` for internal steps, the literal URL for
    /// external ones.
    pub path: String,

    /// Outbound headers, including the chain marker object.
    pub request_headers: Value,
    pub request_body: Value,
    pub response_status: u16,

    /// Always an object; non-object responses are wrapped.
    pub response_body: Value,

    /// Chain-generated rows carry no client ip.
    pub client_ip: Option<String>,
    pub latency_ms: u64,

    /// Marked for real-time fanout by the pub/sub collaborator.
    pub notify: bool,
    pub created_at: DateTime<Utc>,
}

/// Write side of the request-log store.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn insert(&self, row: ChainLogRow) -> anyhow::Result<()>;
}

/// Persist one row, swallowing store failures.
pub(crate) async fn persist_step_log(store: &dyn LogStore, step_name: &str, row: ChainLogRow) {
    if let Err(err) = store.insert(row).await {
        warn!(step = step_name, error = %err, "step log write failed");
    }
}

/// The marker identifying a row as chain-generated, with parent linkage.
pub(crate) fn chain_marker(parent_log_id: Option<&str>, step_name: &str) -> Value {
    json!({
        "chainedCall": true,
        "parentLog": parent_log_id,
        "step": step_name,
    })
}

/// Log rows store the response body as an object.
pub(crate) fn wrap_response_body(body: &Value) -> Value {
    match body {
        Value::Object(_) => body.clone(),
        other => json!({ "body": other }),
    }
}
