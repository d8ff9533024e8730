//! # nextcalls
//!
//! Chained-call orchestration for mock API endpoints.
//!
//! When a root call hits an endpoint with an advanced config, this crate
//! runs the configured follow-up calls in order: internal stateful
//! endpoints are dispatched in-process through the injected request
//! handler, external URLs go out over HTTP. Each step can be gated on a
//! condition over prior results, and its payload, headers and path are
//! `{{...}}`-interpolated against the whole call history.
//!
//! ## Quick start
//!
//! ```rust
//! use nextcalls::{build_plan, ChainContext, RootContext};
//! use serde_json::json;
//!
//! // Normalize the stored advanced config into an executable plan.
//! let plan = build_plan(&json!([
//!     {
//!         "name": "create-lead",
//!         "target_endpoint": "/acme/crm/leads",
//!         "method": "POST",
//!         "body": { "name": "{{root.request.body.name}}" },
//!     },
//!     {
//!         "name": "webhook",
//!         "target_endpoint": "https://hooks.example.com/notify",
//!         "method": "POST",
//!         "condition": { "path": "status", "op": "eq", "value": 201 },
//!         "body": { "lead": "{{1.response.body.id}}" },
//!     },
//! ]));
//! assert_eq!(plan.len(), 2);
//!
//! // Templates render against the run's rolling context.
//! let root = RootContext::new("acme", "crm")
//!     .with_request(json!({ "body": { "name": "Ada" } }));
//! let ctx = ChainContext::new(&root);
//! let payload = nextcalls::render(&plan[0].payload, &ctx);
//! assert_eq!(payload["name"], json!("Ada"));
//! ```
//!
//! Execution itself is async: construct a [`ChainRunner`] with the
//! endpoint metadata store, the stateful request handler and the log
//! store, then `run_plan(&plan, &root, &opts)` per root invocation.

mod condition;
mod context;
mod executor;
mod handler;
mod log;
mod plan;
mod resolve;
mod step;
mod template;
pub mod yaml;

#[cfg(test)]
pub(crate) mod testutil;

pub use condition::{evaluate, Condition, ConditionOp, ConditionRule, ConditionSource};
pub use context::{ChainContext, RootContext, StepOutcome};
pub use executor::{
    ChainRunner, RunOptions, SkipReason, StepError, StepReport, StepResult,
};
pub use handler::{
    CapturedResponse, InternalRequest, RequestFlags, ResponseCapture, RouteInfo, StatefulHandler,
};
pub use log::{ChainLogRow, LogStore};
pub use plan::build_plan;
pub use resolve::{
    resolve_target, EndpointRecord, MetadataStore, ProjectRecord, ResolvedTarget,
};
pub use step::{AuthMode, LogPolicy, NormalizedStep, StepTarget};
pub use template::{render, render_str};
pub use yaml::{load_file, parse_yaml};

/// Re-export common types
pub use serde_json::Value;
