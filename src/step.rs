//! Normalized step-plan types.
//!
//! Authored "advanced config" entries are loose JSON objects; the plan
//! builder converts them once into these strict shapes, and everything
//! downstream (condition gate, renderer, dispatcher, logger) consumes only
//! the normalized form.

use crate::condition::Condition;
use serde_json::Value;

/// One normalized follow-up call.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedStep {
    /// Step name, for logs and reports.
    pub name: String,

    /// Where the call goes.
    pub target: StepTarget,

    /// Payload template tree, rendered per run.
    pub payload: Value,

    /// Header template object, rendered per run.
    pub headers: Value,

    /// Optional execution gate.
    pub condition: Option<Condition>,

    /// Sleep before dispatch, in milliseconds.
    pub delay_ms: u64,

    /// Dispatch deadline, in milliseconds. `0` disables the deadline.
    pub timeout_ms: u64,

    pub log: LogPolicy,

    pub auth: AuthMode,
}

/// Dispatch destination.
///
/// `external_url` is the discriminant: when set the step goes out over
/// HTTP regardless of the workspace/project fields, which then only carry
/// whatever the URL-path extraction happened to match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepTarget {
    pub workspace: Option<String>,
    pub project: Option<String>,
    pub method: String,
    pub logical_path: Option<String>,
    pub external_url: Option<String>,
}

impl StepTarget {
    pub fn is_external(&self) -> bool {
        self.external_url.is_some()
    }
}

/// Per-step logging decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPolicy {
    /// Write a request-log row for this step. Defaults on.
    pub persist: bool,

    /// Mark the row for real-time fanout. Defaults off.
    pub notify: bool,
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self {
            persist: true,
            notify: false,
        }
    }
}

/// Who the step acts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Attribute the root call's user to the step (log rows and the
    /// `x-mock-user-id` header).
    #[default]
    SameUser,

    /// No user attribution.
    Anonymous,
}
