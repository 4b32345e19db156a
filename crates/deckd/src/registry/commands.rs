//! Registry actor commands and errors.
//!
//! All types are designed for async message passing and follow the
//! panic-free policy.

use deck_core::{ProjectId, SessionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Queries carry a oneshot `respond_to`; terminal bookkeeping is
/// fire-and-forget.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add or replace a project root.
    ///
    /// # Errors
    /// - `RegistryError::InvalidRoot` if the root normalizes to nothing
    RegisterProject {
        project_id: ProjectId,
        root: String,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Forget a project. Its terminals stay counted until they close.
    ///
    /// # Errors
    /// - `RegistryError::ProjectNotFound` if the project is unknown
    RemoveProject {
        project_id: ProjectId,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// All known projects, sorted by id.
    ListProjects {
        respond_to: oneshot::Sender<Vec<ProjectInfo>>,
    },

    /// Longest-prefix match of a cwd against the project roots.
    ProjectByCwd {
        cwd: String,
        respond_to: oneshot::Sender<Option<ProjectId>>,
    },

    /// A live terminal now belongs to `project_id`.
    TerminalOpened {
        session_id: SessionId,
        project_id: ProjectId,
    },

    /// The terminal exited or was killed.
    TerminalClosed { session_id: SessionId },

    /// Whether any live terminal belongs to the project.
    HasActiveTerminal {
        project_id: ProjectId,
        respond_to: oneshot::Sender<bool>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The actor has shut down.
    #[error("response channel closed")]
    ChannelClosed,

    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("invalid project root: {0:?}")]
    InvalidRoot(String),
}

// ============================================================================
// Project Info
// ============================================================================

/// Read-only view of a registered project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub project_id: ProjectId,
    /// Normalized root path.
    pub root: String,
    pub active_terminals: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        assert_eq!(
            RegistryError::ChannelClosed.to_string(),
            "response channel closed"
        );
        assert_eq!(
            RegistryError::ProjectNotFound(ProjectId::new("p1")).to_string(),
            "project not found: p1"
        );
        assert_eq!(
            RegistryError::InvalidRoot("  ".to_string()).to_string(),
            "invalid project root: \"  \""
        );
    }
}
