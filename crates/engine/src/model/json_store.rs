//! Model provider backed by a JSON snapshot file.
//!
//! The persistence layer exports `{ "projects": [...] }` with every relation
//! populated. The file is re-read on each call so a fresh export is picked
//! up without restarting the engine.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::{ModelError, ModelProvider, Project, Relations};
use crate::context::OperatorContext;

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    projects: Vec<Project>,
}

/// Reads projects from a JSON snapshot
#[derive(Debug, Clone)]
pub struct JsonModelStore {
    path: PathBuf,
}

impl JsonModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<Project>, ModelError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| ModelError::Io {
            path: self.path.clone(),
            source,
        })?;
        let snapshot: Snapshot =
            serde_json::from_str(&content).map_err(|source| ModelError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(snapshot.projects)
    }
}

impl ModelProvider for JsonModelStore {
    fn projects(
        &self,
        ctx: &OperatorContext,
        relations: Relations,
    ) -> Result<Vec<Project>, ModelError> {
        let mut projects = self.load()?;
        projects.retain(|p| ctx.can_see(&p.label));

        for project in &mut projects {
            strip_relations(project, relations);
        }

        debug!(
            path = %self.path.display(),
            user = ctx.user(),
            projects = projects.len(),
            "Loaded model snapshot"
        );
        Ok(projects)
    }
}

/// Drop relations the caller did not ask for
fn strip_relations(project: &mut Project, relations: Relations) {
    if !relations.backends {
        project.backends.clear();
    }
    for backend in &mut project.backends {
        if !relations.domains {
            backend.domains.clear();
        }
        if !relations.members {
            backend.members.clear();
        }
    }

    if !relations.containers {
        project.containers.clear();
    }
    if !relations.permissions {
        for container in &mut project.containers {
            container.permissions.clear();
        }
    }
}
