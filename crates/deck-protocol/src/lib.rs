//! Deck Protocol - Hook payloads, bus events and API messages
//!
//! This crate provides the shapes that cross component boundaries: the
//! JSON bodies handler scripts POST to the hook listener, the events placed
//! on the in-process bus, and the request/response types of the inbound
//! session API.

pub mod api;
pub mod message;
pub mod parse;

pub use api::{CreateRequest, CreateResponse, KillRequest, ResizeRequest, WriteRequest};
pub use message::{BusEvent, BusEventKind, Origin, SessionRef};
pub use parse::{HookEvent, RawHookPayload, RawHookStdin, RawModel};
