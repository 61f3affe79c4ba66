//! Multiplexes session managers across projects.
//!
//! One manager per project path, created lazily and kept for the life of
//! the orchestrator, plus a default manager for single-project mode that is
//! never removed.
//!
//! The project map sits behind a mutex held only for lookup, insert or
//! remove. Every await happens after the guard is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use ccm_core::{ProcessSpawner, SessionView};

use crate::manager::{spawn_session_manager, ManagerConfig, SessionManagerHandle};

/// Owns every session manager in the process.
///
/// Construct one and share it by `Arc`.
pub struct SessionOrchestrator {
    spawner: Arc<dyn ProcessSpawner>,
    config: ManagerConfig,
    default_manager: SessionManagerHandle,
    /// Registration order is significant
    projects: Mutex<Vec<(PathBuf, SessionManagerHandle)>>,
}

impl SessionOrchestrator {
    /// Creates the orchestrator and its default manager.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(spawner: Arc<dyn ProcessSpawner>, config: ManagerConfig) -> Self {
        let default_manager = spawn_session_manager(Arc::clone(&spawner), config);
        Self {
            spawner,
            config,
            default_manager,
            projects: Mutex::new(Vec::new()),
        }
    }

    /// The single-project manager.
    pub fn default_manager(&self) -> SessionManagerHandle {
        self.default_manager.clone()
    }

    /// Returns the manager for `project`, creating it on first use.
    ///
    /// `None` selects the default manager. The same path always yields the
    /// same manager until it is destroyed.
    pub fn get_manager_for_project(&self, project: Option<&Path>) -> SessionManagerHandle {
        let Some(path) = project else {
            return self.default_manager.clone();
        };

        let mut projects = self.projects.lock();
        if let Some((_, manager)) = projects.iter().find(|(p, _)| p == path) {
            return manager.clone();
        }

        let manager = spawn_session_manager(Arc::clone(&self.spawner), self.config);
        projects.push((path.to_path_buf(), manager.clone()));
        info!(
            project = %path.display(),
            total_projects = projects.len(),
            "Project manager registered"
        );
        manager
    }

    /// Looks up a project's manager without creating one.
    pub fn existing_manager(&self, project: &Path) -> Option<SessionManagerHandle> {
        self.projects
            .lock()
            .iter()
            .find(|(p, _)| p == project)
            .map(|(_, m)| m.clone())
    }

    /// Registered project paths in registration order.
    pub fn project_paths(&self) -> Vec<PathBuf> {
        self.projects.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    /// Sessions of the default manager, then of each project in
    /// registration order.
    pub async fn get_all_active_sessions(&self) -> Vec<SessionView> {
        let managers = self.managers_in_order();
        let mut sessions = Vec::new();
        for manager in managers {
            sessions.extend(manager.get_all_sessions().await);
        }
        sessions
    }

    /// A project's sessions, or nothing if the project has no manager.
    pub async fn get_project_sessions(&self, project: &Path) -> Vec<SessionView> {
        match self.existing_manager(project) {
            Some(manager) => manager.get_all_sessions().await,
            None => Vec::new(),
        }
    }

    /// Tears down every session and forgets every project manager.
    ///
    /// The default manager keeps running with no sessions.
    pub async fn destroy_all_sessions(&self) {
        let projects = std::mem::take(&mut *self.projects.lock());

        if let Err(e) = self.default_manager.destroy().await {
            warn!(error = %e, "Failed to destroy default manager sessions");
        }
        for (path, manager) in projects {
            retire(&path, &manager).await;
        }
        info!("All sessions destroyed");
    }

    /// Tears down and forgets the manager for `project`, if any.
    pub async fn destroy_project_sessions(&self, project: &Path) {
        let removed = {
            let mut projects = self.projects.lock();
            projects
                .iter()
                .position(|(p, _)| p == project)
                .map(|index| projects.remove(index))
        };

        if let Some((path, manager)) = removed {
            retire(&path, &manager).await;
        }
    }

    fn managers_in_order(&self) -> Vec<SessionManagerHandle> {
        let projects = self.projects.lock();
        std::iter::once(self.default_manager.clone())
            .chain(projects.iter().map(|(_, m)| m.clone()))
            .collect()
    }
}

/// Destroys a deregistered project manager's sessions and stops it.
async fn retire(path: &Path, manager: &SessionManagerHandle) {
    if let Err(e) = manager.destroy().await {
        warn!(project = %path.display(), error = %e, "Failed to destroy project sessions");
    }
    manager.shutdown();
    info!(project = %path.display(), "Project manager removed");
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        self.default_manager.shutdown();
        for (_, manager) in self.projects.lock().iter() {
            manager.shutdown();
        }
    }
}
