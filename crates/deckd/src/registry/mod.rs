//! Project registry using the actor pattern.
//!
//! The registry joins hook traffic to terminals: it maps working directories
//! to project ids (longest-prefix on normalized paths) and tracks which
//! projects currently have a live terminal.
//!
//! ```text
//! ┌────────────┐  TerminalOpened/Closed  ┌────────────────┐
//! │ Supervisor │────────────────────────▶│                │
//! └────────────┘                         │ RegistryActor  │
//! ┌────────────┐  ProjectByCwd           │ projects       │
//! │ HookIngest │────────────────────────▶│ terminals      │
//! └────────────┘  HasActiveTerminal      └────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - Channel operations handle closure gracefully

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{ProjectInfo, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

const COMMAND_BUFFER: usize = 100;

/// Spawns the registry actor and returns a handle to it.
///
/// The actor stops once every handle is dropped.
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    tokio::spawn(RegistryActor::new(cmd_rx).run());
    RegistryHandle::new(cmd_tx)
}
