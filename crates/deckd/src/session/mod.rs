//! Per-session pipeline: batching, screen mirror and state inference.

mod actor;
mod batcher;
mod screen;

pub use actor::{SessionActor, SessionCommand, SessionServices};
pub use batcher::OutputBatcher;
pub use screen::ScreenMirror;
