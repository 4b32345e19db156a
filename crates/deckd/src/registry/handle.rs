//! Client interface for the registry actor.
//!
//! # Panic-Free Guarantees
//!
//! Channel errors are mapped to `RegistryError::ChannelClosed` for
//! fallible calls; queries degrade to "no match" once the actor is gone.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use deck_core::{ProjectId, SessionId};

use super::commands::{ProjectInfo, RegistryCommand, RegistryError};

/// Cheap-to-clone handle to the registry actor.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Adds or replaces a project root.
    ///
    /// # Errors
    ///
    /// - `RegistryError::InvalidRoot` if `root` is blank
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register_project(
        &self,
        project_id: ProjectId,
        root: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::RegisterProject {
                project_id,
                root: root.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// # Errors
    ///
    /// - `RegistryError::ProjectNotFound` if the project is unknown
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn remove_project(&self, project_id: ProjectId) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::RemoveProject {
                project_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Returns an empty list if the actor is gone.
    pub async fn list_projects(&self) -> Vec<ProjectInfo> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RegistryCommand::ListProjects { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Resolves a cwd to the project with the longest matching root.
    pub async fn project_by_cwd(&self, cwd: impl Into<String>) -> Option<ProjectId> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryCommand::ProjectByCwd {
                cwd: cwd.into(),
                respond_to: tx,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn has_active_terminal(&self, project_id: ProjectId) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RegistryCommand::HasActiveTerminal {
                project_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Fire-and-forget; ordered with later queries from the same caller.
    pub async fn terminal_opened(&self, session_id: SessionId, project_id: ProjectId) {
        if self
            .sender
            .send(RegistryCommand::TerminalOpened {
                session_id,
                project_id,
            })
            .await
            .is_err()
        {
            debug!(session_id = %session_id, "Registry gone, terminal open not recorded");
        }
    }

    pub async fn terminal_closed(&self, session_id: SessionId) {
        if self
            .sender
            .send(RegistryCommand::TerminalClosed { session_id })
            .await
            .is_err()
        {
            debug!(session_id = %session_id, "Registry gone, terminal close not recorded");
        }
    }

    /// Returns true while the actor is accepting commands.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
