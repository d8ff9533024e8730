//! In-memory collaborator doubles shared across test modules.

use crate::handler::{InternalRequest, ResponseCapture, StatefulHandler};
use crate::log::{ChainLogRow, LogStore};
use crate::resolve::{EndpointRecord, MetadataStore, ProjectRecord};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Seedable metadata store.
#[derive(Debug, Default)]
pub(crate) struct MemoryMetadata {
    projects: Vec<ProjectRecord>,
    endpoints: Vec<(EndpointRecord, String)>,
}

impl MemoryMetadata {
    pub fn add_project(&mut self, id: &str, workspace: &str, name: &str) {
        self.projects.push(ProjectRecord {
            id: id.to_string(),
            workspace: workspace.to_string(),
            name: name.to_string(),
        });
    }

    pub fn add_endpoint(
        &mut self,
        stateful_id: &str,
        origin_id: &str,
        method: &str,
        path: &str,
        project_id: &str,
    ) {
        self.endpoints.push((
            EndpointRecord {
                id: stateful_id.to_string(),
                origin_id: origin_id.to_string(),
                method: method.to_string(),
                path: path.to_string(),
            },
            project_id.to_string(),
        ));
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadata {
    async fn find_project(
        &self,
        workspace: &str,
        project: &str,
    ) -> Result<Option<ProjectRecord>> {
        Ok(self
            .projects
            .iter()
            .find(|p| {
                p.workspace.eq_ignore_ascii_case(workspace) && p.name.eq_ignore_ascii_case(project)
            })
            .cloned())
    }

    async fn find_active_handlers(&self, method: &str, path: &str) -> Result<Vec<EndpointRecord>> {
        Ok(self
            .endpoints
            .iter()
            .filter(|(e, _)| e.method == method && e.path == path)
            .map(|(e, _)| e.clone())
            .collect())
    }

    async fn origin_in_project(&self, origin_id: &str, project_id: &str) -> Result<bool> {
        Ok(self
            .endpoints
            .iter()
            .any(|(e, pid)| e.origin_id == origin_id && pid == project_id))
    }
}

/// Recording log store, optionally failing every write.
#[derive(Debug, Default)]
pub(crate) struct MemoryLogs {
    rows: Mutex<Vec<ChainLogRow>>,
    fail: bool,
}

impl MemoryLogs {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<ChainLogRow> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl LogStore for MemoryLogs {
    async fn insert(&self, row: ChainLogRow) -> Result<()> {
        if self.fail {
            anyhow::bail!("log store down");
        }
        self.rows.lock().unwrap().push(row);
        Ok(())
    }
}

/// One scripted handler reaction per expected internal dispatch.
#[derive(Debug)]
pub(crate) enum Script {
    Ok(u16, Value),
    Err(&'static str),
    Slow(u64, u16, Value),
}

/// Handler double that records every request it sees and replays a script.
/// Runs out of script → responds `200 {}`.
#[derive(Debug, Default)]
pub(crate) struct ScriptedHandler {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<InternalRequest>>,
}

impl ScriptedHandler {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<InternalRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatefulHandler for ScriptedHandler {
    async fn handle(&self, req: InternalRequest, res: &mut ResponseCapture) -> Result<()> {
        self.requests.lock().unwrap().push(req);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            None => {
                res.status(200).json(json!({}));
                Ok(())
            }
            Some(Script::Ok(status, body)) => {
                res.status(status).json(body);
                Ok(())
            }
            Some(Script::Err(msg)) => anyhow::bail!(msg),
            Some(Script::Slow(delay_ms, status, body)) => {
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                res.status(status).json(body);
                Ok(())
            }
        }
    }
}
