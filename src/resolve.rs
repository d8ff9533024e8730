//! Internal-target resolution against the endpoint metadata store.
//!
//! A step addressed as `/workspace/project/path` has to be matched to the
//! concrete stateful implementation it dispatches into. Resolution is
//! two-phase: first the project (case-insensitive workspace+project name
//! match), then the active implementations for method+path filtered down
//! to the one whose origin endpoint belongs to that project. Method+path
//! alone is not unique across projects, so the second filter is mandatory.
//!
//! Every failure mode resolves to `None`; the caller skips the step.

use crate::step::StepTarget;
use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

/// Project row from the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: String,
    pub workspace: String,
    pub name: String,
}

/// Stateful endpoint implementation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    /// Id of the stateful implementation itself.
    pub id: String,

    /// Id of the origin (stateless) endpoint it is attached to; carries the
    /// project linkage.
    pub origin_id: String,

    pub method: String,
    pub path: String,
}

/// Read side of the endpoint metadata store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up a project by case-insensitive workspace+project name pair.
    async fn find_project(&self, workspace: &str, project: &str)
        -> Result<Option<ProjectRecord>>;

    /// Active stateful implementations matching exact method + logical path.
    async fn find_active_handlers(&self, method: &str, path: &str)
        -> Result<Vec<EndpointRecord>>;

    /// Whether the given origin endpoint belongs to the given project.
    async fn origin_in_project(&self, origin_id: &str, project_id: &str) -> Result<bool>;
}

/// A fully resolved internal dispatch target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub project: ProjectRecord,
    pub endpoint: EndpointRecord,

    /// Workspace/project names the step resolved under (step override or
    /// the root call's own).
    pub workspace: String,
    pub project_name: String,

    /// Lookup path, trailing `/:param` segment stripped.
    pub path: String,
}

/// Resolve an internal step target. `None` means "skip the step".
pub async fn resolve_target(
    store: &dyn MetadataStore,
    target: &StepTarget,
    default_workspace: &str,
    default_project: &str,
) -> Option<ResolvedTarget> {
    let workspace = override_or(target.workspace.as_deref(), default_workspace);
    let project = override_or(target.project.as_deref(), default_project);
    let path = strip_trailing_param(target.logical_path.as_deref()?);

    let project_rec = match store.find_project(workspace, project).await {
        Ok(found) => found?,
        Err(err) => {
            warn!(workspace, project, error = %err, "project lookup failed");
            return None;
        }
    };

    let candidates = match store.find_active_handlers(&target.method, path).await {
        Ok(candidates) => candidates,
        Err(err) => {
            warn!(method = %target.method, path, error = %err, "handler lookup failed");
            return None;
        }
    };

    for candidate in candidates {
        match store
            .origin_in_project(&candidate.origin_id, &project_rec.id)
            .await
        {
            Ok(true) => {
                return Some(ResolvedTarget {
                    workspace: workspace.to_string(),
                    project_name: project.to_string(),
                    path: path.to_string(),
                    project: project_rec,
                    endpoint: candidate,
                })
            }
            Ok(false) => continue,
            Err(err) => {
                warn!(endpoint = %candidate.id, error = %err, "origin lookup failed");
                return None;
            }
        }
    }

    None
}

fn override_or<'a>(value: Option<&'a str>, default: &'a str) -> &'a str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => default,
    }
}

/// Parameterized single-item paths resolve to their collection-level
/// implementation: `/leads/:id` looks up as `/leads`. A trailing segment
/// holding a template placeholder counts as a parameter too, so
/// `/leads/{{1.response.body.id}}` resolves the same way.
fn strip_trailing_param(path: &str) -> &str {
    if let Some(pos) = path.rfind('/') {
        let last = &path[pos + 1..];
        if last.starts_with(':') || last.contains("{{") {
            let stripped = &path[..pos];
            return if stripped.is_empty() { "/" } else { stripped };
        }
    }
    path
}
