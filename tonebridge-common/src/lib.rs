//! # Tonebridge Common Library
//!
//! Shared code for the Tonebridge playback service and its producers:
//! - Event types (StreamEvent enum) and the EventBus
//! - Configuration loading
//! - WAV chunk encoding and the sine-tone generator

pub mod config;
pub mod error;
pub mod events;
pub mod tone;

pub use error::{Error, Result};
