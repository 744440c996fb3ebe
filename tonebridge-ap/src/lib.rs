//! # Tonebridge Audio Player Library (tonebridge-ap)
//!
//! Gap-free playback of a live stream of self-contained encoded audio chunks.
//!
//! **Purpose:** Accept chunks from a producer, decode them, and schedule each
//! one on the output device's clock so consecutive chunks abut exactly, in
//! arrival order, without overlap.
//!
//! **Architecture:** symphonia decode + rubato resample, scheduled against a
//! cpal frame clock; axum HTTP/SSE control surface.

pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod playback;

pub use error::{Error, Result};
pub use pipeline::Pipeline;
