//! Deck Core - Shared types for PTY supervision and Claude session inference
//!
//! This crate provides the runtime-free domain types used by the daemon
//! (deckd): session identity and status, hook kinds, path normalization,
//! and the parsers that read Claude CLI state out of terminal output.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod hook;
pub mod osc;
pub mod path;
pub mod scan;
pub mod session;
pub mod title;
pub mod tools;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use hook::HookKind;
pub use osc::OscTitleExtractor;
pub use path::{is_within, normalize, normalize_path};
pub use scan::{scan_lines, scan_text, ScanOutcome};
pub use session::{
    Activity, ActivitySnapshot, ActivityTimestamps, ClaudeContext, OutputFrame, ProjectId,
    SessionHandle, SessionId, SessionMode, SessionStatus, Substatus,
};
pub use title::{classify_title, TitleKind};
pub use tools::{ToolCatalog, DEFAULT_KNOWN_TOOLS};
