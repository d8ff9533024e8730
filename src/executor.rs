//! Chain execution engine.
//!
//! [`ChainRunner`] drives a normalized step plan strictly sequentially
//! against one root invocation: gate on the step condition, render payload
//! and header templates over the call history, dispatch (external HTTP or
//! an in-process call into the stateful handler), log, append history.
//!
//! One step's failure never aborts the plan — it clears `prev` and the run
//! continues. The runner holds its collaborators as injected trait objects
//! so the re-entrant path back into the request handler stays a plain
//! function call with no module cycle.

use crate::condition;
use crate::context::{ChainContext, RootContext, StepOutcome};
use crate::handler::{InternalRequest, RequestFlags, ResponseCapture, RouteInfo, StatefulHandler};
use crate::log::{self, ChainLogRow, LogStore};
use crate::resolve::{resolve_target, MetadataStore, ResolvedTarget};
use crate::step::{AuthMode, NormalizedStep};
use crate::template;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hop-by-hop and transport headers never forwarded from the root call.
const BLOCKED_HEADERS: [&str; 5] = [
    "content-length",
    "host",
    "connection",
    "accept-encoding",
    "transfer-encoding",
];

/// Why a step's dispatch failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("step timed out after {0}ms")]
    Timeout(u64),
}

/// Why a step did not dispatch at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ConditionFalse,
    TargetUnresolved,
}

/// Terminal state of one step.
#[derive(Debug)]
pub enum StepResult {
    Executed(StepOutcome),
    Skipped(SkipReason),
    Failed(StepError),
}

/// Per-step outcome summary returned by [`ChainRunner::run_plan`].
#[derive(Debug)]
pub struct StepReport {
    pub name: String,
    pub result: StepResult,
}

/// Per-run options supplied by the root call site.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// The acting user behind the root call, when known.
    pub user: Option<String>,

    /// Skip the plan entirely. Set by callers that are themselves chain
    /// dispatches.
    pub suppress_next_calls: bool,
}

impl RunOptions {
    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }
}

enum Prepared {
    External {
        url: String,
    },
    Internal {
        req: InternalRequest,
        resolved: ResolvedTarget,
    },
}

/// Executes chained-call plans. One instance serves any number of
/// concurrent runs; all per-run state lives in the run's own context.
pub struct ChainRunner {
    metadata: Arc<dyn MetadataStore>,
    handler: Arc<dyn StatefulHandler>,
    logs: Arc<dyn LogStore>,
    http: reqwest::Client,
}

impl ChainRunner {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        handler: Arc<dyn StatefulHandler>,
        logs: Arc<dyn LogStore>,
    ) -> Self {
        Self {
            metadata,
            handler,
            logs,
            http: reqwest::Client::new(),
        }
    }

    /// Replace the HTTP client used for external dispatch.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Run a plan against one root invocation.
    ///
    /// Strictly sequential: each step is fully awaited (delay, dispatch,
    /// logging) before the next starts. When the root context or the
    /// options carry the suppression flag the whole plan is a no-op.
    pub async fn run_plan(
        &self,
        plan: &[NormalizedStep],
        root: &RootContext,
        opts: &RunOptions,
    ) -> Vec<StepReport> {
        if root.suppress_next_calls || opts.suppress_next_calls {
            debug!(steps = plan.len(), "chained calls suppressed");
            return Vec::new();
        }

        info!(
            steps = plan.len(),
            workspace = %root.workspace,
            project = %root.project,
            "running chained calls"
        );

        let mut ctx = ChainContext::new(root);
        let mut reports = Vec::with_capacity(plan.len());

        for step in plan {
            debug!(step = %step.name, external = step.target.is_external(), "executing step");
            let result = self.execute_step(step, &mut ctx, opts).await;
            reports.push(StepReport {
                name: step.name.clone(),
                result,
            });
        }

        info!(
            executed = ctx.history().len(),
            total = plan.len(),
            "chain finished"
        );

        reports
    }

    async fn execute_step(
        &self,
        step: &NormalizedStep,
        ctx: &mut ChainContext<'_>,
        opts: &RunOptions,
    ) -> StepResult {
        let root = ctx.root();

        if !condition::evaluate(step.condition.as_ref(), ctx.prev(), root) {
            debug!(step = %step.name, "condition false, skipping");
            ctx.clear_prev();
            return StepResult::Skipped(SkipReason::ConditionFalse);
        }

        // Snapshot-render before the step executes.
        let payload = template::render(&step.payload, ctx);
        let acting_user = match step.auth {
            AuthMode::SameUser => opts.user.as_deref(),
            AuthMode::Anonymous => None,
        };
        let outbound = merge_headers(
            &root.headers,
            &render_headers(&step.headers, ctx),
            acting_user,
        );

        let prepared = match &step.target.external_url {
            Some(url) => Prepared::External { url: url.clone() },
            None => {
                let resolved = resolve_target(
                    self.metadata.as_ref(),
                    &step.target,
                    &root.workspace,
                    &root.project,
                )
                .await;
                match resolved {
                    Some(resolved) => {
                        let sub_path = template::render_str(
                            step.target.logical_path.as_deref().unwrap_or(""),
                            ctx,
                        );
                        Prepared::Internal {
                            req: build_internal_request(
                                step, &resolved, &sub_path, &outbound, &payload, acting_user,
                            ),
                            resolved,
                        }
                    }
                    None => {
                        debug!(step = %step.name, "target unresolved, skipping");
                        ctx.clear_prev();
                        return StepResult::Skipped(SkipReason::TargetUnresolved);
                    }
                }
            }
        };

        if step.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
        }

        let started = Instant::now();
        let dispatched = self.dispatch_with_timeout(step, &prepared, &outbound, &payload).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match dispatched {
            Err(err) => {
                warn!(step = %step.name, error = %err, "step dispatch failed");
                ctx.clear_prev();
                StepResult::Failed(err)
            }
            Ok(outcome) => {
                debug!(step = %step.name, status = outcome.status, latency_ms, "step executed");
                if step.log.persist {
                    let row = build_log_row(
                        step, &prepared, root, acting_user, &outbound, &payload, &outcome,
                        latency_ms,
                    );
                    log::persist_step_log(self.logs.as_ref(), &step.name, row).await;
                }
                ctx.record(payload, &outbound, outcome.clone());
                StepResult::Executed(outcome)
            }
        }
    }

    async fn dispatch_with_timeout(
        &self,
        step: &NormalizedStep,
        prepared: &Prepared,
        outbound: &BTreeMap<String, String>,
        payload: &Value,
    ) -> Result<StepOutcome, StepError> {
        let fut = self.dispatch(step, prepared, outbound, payload);
        if step.timeout_ms == 0 {
            return fut.await;
        }
        match tokio::time::timeout(Duration::from_millis(step.timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(StepError::Timeout(step.timeout_ms)),
        }
    }

    async fn dispatch(
        &self,
        step: &NormalizedStep,
        prepared: &Prepared,
        outbound: &BTreeMap<String, String>,
        payload: &Value,
    ) -> Result<StepOutcome, StepError> {
        match prepared {
            Prepared::External { url } => {
                self.fetch_external(step, url, outbound, payload).await
            }
            Prepared::Internal { req, .. } => self.call_handler(req.clone()).await,
        }
    }

    async fn fetch_external(
        &self,
        step: &NormalizedStep,
        url: &str,
        outbound: &BTreeMap<String, String>,
        payload: &Value,
    ) -> Result<StepOutcome, StepError> {
        let method = reqwest::Method::from_bytes(step.target.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let send_body = method != reqwest::Method::GET && !payload.is_null();

        let mut request = self.http.request(method, url);
        for (key, value) in outbound {
            request = request.header(key.as_str(), value.as_str());
        }
        if send_body {
            request = request.body(serde_json::to_string(payload).unwrap_or_default());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(StepOutcome::new(status, body))
    }

    async fn call_handler(&self, req: InternalRequest) -> Result<StepOutcome, StepError> {
        let mut res = ResponseCapture::new();
        self.handler
            .handle(req, &mut res)
            .await
            .map_err(|err| StepError::Handler(err.to_string()))?;
        let captured = res.to_json();
        Ok(StepOutcome::new(captured.status, captured.body))
    }
}

fn build_internal_request(
    step: &NormalizedStep,
    resolved: &ResolvedTarget,
    sub_path: &str,
    outbound: &BTreeMap<String, String>,
    payload: &Value,
    acting_user: Option<&str>,
) -> InternalRequest {
    let base_path = format!("/{}/{}", resolved.workspace, resolved.project_name);
    let raw_path = format!("{base_path}{sub_path}");

    InternalRequest {
        method: step.target.method.clone(),
        headers: outbound.clone(),
        body: payload.clone(),
        base_url: raw_path.clone(),
        original_url: raw_path.clone(),
        universal: RouteInfo {
            method: step.target.method.clone(),
            workspace_name: resolved.workspace.clone(),
            project_name: resolved.project_name.clone(),
            project_id: resolved.project.id.clone(),
            base_path,
            raw_path,
            sub_path: sub_path.to_string(),
            stateful_id: resolved.endpoint.id.clone(),
            stateless_id: resolved.endpoint.origin_id.clone(),
        },
        // Chain dispatches must never trigger further chains.
        flags: RequestFlags {
            is_next_call: true,
            suppress_next_calls: true,
        },
        user: acting_user.map(String::from),
        locals: json!({}),
    }
}

#[allow(clippy::too_many_arguments)]
fn build_log_row(
    step: &NormalizedStep,
    prepared: &Prepared,
    root: &RootContext,
    acting_user: Option<&str>,
    outbound: &BTreeMap<String, String>,
    payload: &Value,
    outcome: &StepOutcome,
    latency_ms: u64,
) -> ChainLogRow {
    let (project_id, origin_id, stateful_id, path) = match prepared {
        Prepared::External { url } => (root.project_id.clone(), None, None, url.clone()),
        Prepared::Internal { req, resolved } => (
            Some(resolved.project.id.clone()),
            Some(resolved.endpoint.origin_id.clone()),
            Some(resolved.endpoint.id.clone()),
            req.universal.raw_path.clone(),
        ),
    };

    let mut headers: Map<String, Value> = outbound
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    headers.insert(
        "x-chained-call".to_string(),
        log::chain_marker(root.parent_log_id.as_deref(), &step.name),
    );

    ChainLogRow {
        project_id,
        origin_endpoint_id: origin_id,
        stateful_endpoint_id: stateful_id,
        user_id: acting_user.map(String::from),
        method: step.target.method.clone(),
        path,
        request_headers: Value::Object(headers),
        request_body: payload.clone(),
        response_status: outcome.status,
        response_body: log::wrap_response_body(&outcome.body),
        client_ip: None,
        latency_ms,
        notify: step.log.notify,
        created_at: Utc::now(),
    }
}

/// Case-insensitive merge of root-call headers and rendered step headers.
/// Step headers win; the block-list never passes through; `content-type`
/// defaults to JSON; the acting user travels as `x-mock-user-id`.
pub(crate) fn merge_headers(
    root: &BTreeMap<String, String>,
    step: &BTreeMap<String, String>,
    user: Option<&str>,
) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();

    for source in [root, step] {
        for (key, value) in source {
            let key = key.to_ascii_lowercase();
            if BLOCKED_HEADERS.contains(&key.as_str()) {
                continue;
            }
            merged.insert(key, value.clone());
        }
    }

    merged
        .entry("content-type".to_string())
        .or_insert_with(|| "application/json".to_string());

    if let Some(user) = user {
        merged.insert("x-mock-user-id".to_string(), user.to_string());
    }

    merged
}

/// Render the step's header template into concrete string values.
fn render_headers(tpl: &Value, ctx: &ChainContext<'_>) -> BTreeMap<String, String> {
    let Value::Object(map) = template::render(tpl, ctx) else {
        return BTreeMap::new();
    };
    map.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}
