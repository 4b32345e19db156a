//! deckd - Terminal supervision and Claude session state runtime
//!
//! This library provides the runtime services of the core:
//! - `pty`: spawns shells in PTYs and routes user input, resizes and kills
//! - `session`: per-session actor batching output and inferring Claude state
//! - `claude`: the Claude CLI state machine
//! - `hooks`: loopback listener for Claude Code hook handler scripts
//! - `bus`: in-process event bus
//! - `registry`: project registry correlating hooks with terminals
//! - `core`: wiring and global teardown

pub mod bus;
pub mod claude;
pub mod config;
pub mod core;
pub mod error;
pub mod hooks;
pub mod pty;
pub mod registry;
pub mod session;
pub mod throttle;

pub use bus::{spawn_bus, EventBus, Subscriber, SubscriptionFilter, SubscriptionId};
pub use config::CoreConfig;
pub use crate::core::Core;
pub use error::{CoreError, CoreResult};
pub use hooks::{HookIngestor, HookServer};
pub use pty::{SessionSnapshot, Supervisor, SupervisorError};
pub use registry::{spawn_registry, RegistryHandle};
