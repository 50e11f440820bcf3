//! Session runtime: the per-connection pipeline, the session itself, and
//! the process-wide session registry (`spec.md` §4.3–§4.5).

pub mod manager;
pub mod pipeline;
pub mod session;

pub use manager::{SessionGuard, SessionManager};
pub use pipeline::{resolve_provider_name, SessionPipeline};
pub use session::{ConnectionContext, Session};
