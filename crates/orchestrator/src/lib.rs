//! The orchestration core: the per-turn executor, the single `process`
//! entry point that glues safety, routing, execution and persistence
//! together, and the concurrency and telemetry plumbing around them.

pub mod executor;
pub mod messages;
pub mod orchestrator;
pub mod render;
pub mod session_lock;
pub mod telemetry;

pub use orchestrator::{
    Orchestrator, ProcessRequest, ProcessResponse, RequestContext,
};
pub use telemetry::{RequestTrace, TraceStore};
