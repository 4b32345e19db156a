//! Claude session liveness inference.

mod machine;

pub use machine::{ClaudeStateMachine, MachineEvent, ReadyReason, Timings};
