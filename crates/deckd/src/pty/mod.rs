//! Process supervisor: PTY children and their sessions.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Spawn failures are returned, never registered

use deck_core::SessionId;
use thiserror::Error;

mod child;
mod shell;
mod supervisor;

pub use child::{ChildStreams, ExitInfo, PtyChild, PtySpawnConfig};
pub use shell::{claude_launch_command, default_shell, default_shell_args};
pub use supervisor::{SessionSnapshot, Supervisor};

/// Errors returned by user-initiated supervisor calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// The PTY or the child could not be created; nothing was registered.
    #[error("failed to spawn PTY: {reason}")]
    PtySpawnFailed { reason: String },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("pty I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_error_display() {
        let err = SupervisorError::PtySpawnFailed {
            reason: "openpty: out of ptys".to_string(),
        };
        assert_eq!(err.to_string(), "failed to spawn PTY: openpty: out of ptys");
        assert_eq!(
            SupervisorError::SessionNotFound(SessionId::new(7)).to_string(),
            "session not found: 7"
        );
    }
}
