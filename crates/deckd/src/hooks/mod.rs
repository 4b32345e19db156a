//! Hook ingestor: loopback listener, ingest worker and alive bookkeeping.
//!
//! Hooks are correlated with the project registry by `cwd`. A hook whose
//! project has no live terminal comes from a Claude instance outside this
//! app and is not emitted.

mod alive;
mod ingest;
mod server;

pub use alive::AliveSession;
pub use ingest::{spawn_ingestor, HookIngestor};
pub use server::{port_file_path, read_port_file, HookServer, HookServerError};
