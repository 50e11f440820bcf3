//! Bounded Queue and Event Bus primitives (`spec.md` §4.1–§4.2).
//!
//! Every inter-component handoff in the session pipeline goes through an
//! [`EventBus`], which in turn fans out to per-subscriber [`BoundedQueue`]s.
//! This is the lowest layer in the dependency order `spec.md` §2 lays out.

pub mod event_bus;
pub mod queue;

pub use event_bus::EventBus;
pub use queue::{BoundedQueue, Closed, OverflowPolicy, PutResult};
