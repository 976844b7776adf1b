//! Spindle Runner - backend dispatch for generation requests
//!
//! Routes each request either to an external batched engine or to the
//! in-process [`DecodeEngine`](spindle_core::DecodeEngine), and serializes
//! the resulting events.

pub mod batched;
pub mod error;
pub mod logging;
pub mod router;

pub use batched::{BatchedEngine, BatchedRequest, BatchedStream};
pub use error::{RunnerError, RunnerResult};
pub use logging::init_tracing;
pub use router::{select_backend, DispatchRouter, JsonStream, OutputStream};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
