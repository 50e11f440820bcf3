//! Babelgate Core - shared library for the real-time voice-translation gateway.
//!
//! This crate provides the core session runtime for Babelgate: a WebSocket
//! media gateway that accepts ACS-style calls, batches per-participant
//! audio, drives a provider adapter, and runs a playback/input control
//! plane with barge-in. It is designed to be used by the standalone
//! headless server (`babelgate-server`) and by integration tests directly.
//!
//! # Architecture
//!
//! The crate is organized bottom-up, following the dependency order each
//! component is built on:
//!
//! - [`bus`]: Bounded queue and event bus primitives
//! - [`audio`]: Per-participant audio batching and PCM utilities
//! - [`wire`]: Inbound/outbound wire frame shapes
//! - [`provider`]: The provider adapter contract and its concrete adapters
//! - [`control`]: Playback/input state machines and barge-in orchestration
//! - [`session`]: The per-connection pipeline, session, and session registry
//! - [`config`]: Configuration surface and environment overlay
//! - [`observability`]: Structured log helpers and the wire-capture hook
//! - [`bootstrap`]: Dependency wiring for the API layer
//! - [`api`]: The HTTP/WebSocket acceptor
//! - [`error`]: Centralized error types
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`Clock`](clock::Clock): wall-clock access, fakeable in tests
//! - [`ProviderAdapter`](provider::ProviderAdapter): driving one external
//!   translation service

#![warn(clippy::all)]

pub mod api;
pub mod audio;
pub mod bootstrap;
pub mod bus;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod observability;
pub mod provider;
pub mod reformatter;
pub mod runtime;
pub mod session;
pub mod wire;

// Re-export commonly used types at the crate root
pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use clock::{Clock, FakeClock, MonotonicClock};
pub use config::Config;
pub use error::{CoreError, CoreResult, ErrorCode};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{Session, SessionManager};

// Re-export API types
pub use api::{start_server, AppState, ServerError};
