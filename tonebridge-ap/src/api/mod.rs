//! HTTP control surface
//!
//! Chunk ingest, stream control, status and the SSE event stream.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run, AppContext};
