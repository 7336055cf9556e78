//! Project registry: named, validated project roots

use crate::error::ArborError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// A registered project root
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub name: String,
    /// Canonical absolute root directory
    pub root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// RFC 3339 registration time
    pub registered_at: String,
}

impl Project {
    /// Validate `path` and build a project value
    pub fn new(path: &Path, name: String, description: Option<String>) -> crate::Result<Self> {
        let root = validate_root(path)?;
        let registered_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        Ok(Self {
            name,
            root,
            description,
            registered_at,
        })
    }
}

fn validate_root(path: &Path) -> crate::Result<PathBuf> {
    let invalid = |reason: &str| ArborError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    if !path.exists() {
        return Err(invalid("path does not exist"));
    }
    if !path.is_dir() {
        return Err(invalid("path is not a directory"));
    }
    path.canonicalize()
        .map_err(|e| invalid(&format!("cannot resolve path: {e}")))
}

/// Last path segment, used when no explicit name is given
fn derive_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "project".to_string())
}

/// Registry of projects, keyed by name (case-sensitive)
#[derive(Default)]
pub struct ProjectRegistry {
    projects: RwLock<BTreeMap<String, Arc<Project>>>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a directory.
    ///
    /// Without an explicit name the last path segment is used and suffixed
    /// with `-2`, `-3`, ... on collision. An explicit name that collides is
    /// an error.
    pub fn register(
        &self,
        path: &Path,
        name: Option<&str>,
        description: Option<&str>,
    ) -> crate::Result<Arc<Project>> {
        let root = validate_root(path)?;
        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());

        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(explicit) => {
                if projects.contains_key(explicit) {
                    return Err(ArborError::DuplicateName(explicit.to_string()));
                }
                explicit.to_string()
            }
            None => {
                let base = derive_name(&root);
                let mut candidate = base.clone();
                let mut counter = 2;
                while projects.contains_key(&candidate) {
                    candidate = format!("{}-{}", base, counter);
                    counter += 1;
                }
                candidate
            }
        };

        let project = Arc::new(Project::new(
            &root,
            name.clone(),
            description.map(String::from),
        )?);
        projects.insert(name, Arc::clone(&project));
        tracing::info!(
            project = %project.name,
            root = %project.root.display(),
            "registered project"
        );
        Ok(project)
    }

    pub fn get(&self, name: &str) -> crate::Result<Arc<Project>> {
        self.projects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| ArborError::ProjectNotFound(name.to_string()))
    }

    /// All projects ordered by name
    pub fn list(&self) -> Vec<Arc<Project>> {
        self.projects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Remove a project; returns whether it existed
    pub fn remove(&self, name: &str) -> bool {
        let removed = self
            .projects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some();
        if removed {
            tracing::info!(project = %name, "removed project");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.projects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
