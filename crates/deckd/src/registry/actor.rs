//! Registry actor - owns the project index and terminal membership.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Responses to dropped callers are ignored

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info};

use deck_core::{is_within, normalize_path, ProjectId, SessionId};

use super::commands::{ProjectInfo, RegistryCommand, RegistryError};

/// The registry actor.
///
/// Holds identifiers and paths only; it never owns a session.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Project id → normalized root.
    projects: HashMap<ProjectId, String>,

    /// Live terminal → owning project.
    terminals: HashMap<SessionId, ProjectId>,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>) -> Self {
        Self {
            receiver,
            projects: HashMap::new(),
            terminals: HashMap::new(),
        }
    }

    /// Processes commands until every handle is dropped.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            projects = self.projects.len(),
            terminals = self.terminals.len(),
            "Registry actor stopped"
        );
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::RegisterProject {
                project_id,
                root,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_register_project(project_id, &root));
            }
            RegistryCommand::RemoveProject {
                project_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_remove_project(&project_id));
            }
            RegistryCommand::ListProjects { respond_to } => {
                let _ = respond_to.send(self.list_projects());
            }
            RegistryCommand::ProjectByCwd { cwd, respond_to } => {
                let _ = respond_to.send(self.project_by_cwd(&cwd));
            }
            RegistryCommand::TerminalOpened {
                session_id,
                project_id,
            } => {
                debug!(session_id = %session_id, project_id = %project_id, "Terminal opened");
                self.terminals.insert(session_id, project_id);
            }
            RegistryCommand::TerminalClosed { session_id } => {
                if let Some(project_id) = self.terminals.remove(&session_id) {
                    debug!(session_id = %session_id, project_id = %project_id, "Terminal closed");
                }
            }
            RegistryCommand::HasActiveTerminal {
                project_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.has_active_terminal(&project_id));
            }
        }
    }

    fn handle_register_project(
        &mut self,
        project_id: ProjectId,
        root: &str,
    ) -> Result<(), RegistryError> {
        let normalized = normalize_path(root);
        if normalized.is_empty() {
            return Err(RegistryError::InvalidRoot(root.to_string()));
        }
        info!(project_id = %project_id, root = %normalized, "Project registered");
        self.projects.insert(project_id, normalized);
        Ok(())
    }

    fn handle_remove_project(&mut self, project_id: &ProjectId) -> Result<(), RegistryError> {
        match self.projects.remove(project_id) {
            Some(_) => {
                info!(project_id = %project_id, "Project removed");
                Ok(())
            }
            None => Err(RegistryError::ProjectNotFound(project_id.clone())),
        }
    }

    fn list_projects(&self) -> Vec<ProjectInfo> {
        let mut projects: Vec<ProjectInfo> = self
            .projects
            .iter()
            .map(|(id, root)| ProjectInfo {
                project_id: id.clone(),
                root: root.clone(),
                active_terminals: self.terminals.values().filter(|p| *p == id).count(),
            })
            .collect();
        projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        projects
    }

    /// Longest root wins; ties (same root under two ids) go to the smaller id.
    fn project_by_cwd(&self, cwd: &str) -> Option<ProjectId> {
        let cwd = normalize_path(cwd);
        self.projects
            .iter()
            .filter(|(_, root)| is_within(&cwd, root))
            .max_by(|(a_id, a_root), (b_id, b_root)| {
                a_root.len().cmp(&b_root.len()).then_with(|| b_id.cmp(a_id))
            })
            .map(|(id, _)| id.clone())
    }

    fn has_active_terminal(&self, project_id: &ProjectId) -> bool {
        self.terminals.values().any(|p| p == project_id)
    }

    #[cfg(test)]
    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }
}
