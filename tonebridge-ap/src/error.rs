//! Error types for tonebridge-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//! Per-chunk failures (`DecodeError`) are recovered inside the scheduling loop and
//! reported as events; only sink failures escalate to the owner.

use thiserror::Error;

/// Main error type for tonebridge-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Audio output device errors (setup)
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// The sink rejected a buffer; the scheduler instance is finished
    #[error("Sink failure: {0}")]
    SinkFatal(#[from] SinkError),

    /// Another scheduler already drives this sink
    #[error("Sink already has an active scheduler")]
    SinkBusy,

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] tonebridge_common::Error),
}

/// Per-chunk decode failure
///
/// Always recoverable: the offending chunk is dropped and the stream continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Chunk carried no bytes
    #[error("chunk is empty")]
    Empty,

    /// Container format not recognised
    #[error("unrecognised container: {0}")]
    Probe(String),

    /// Container had no decodable audio track
    #[error("no audio track in chunk")]
    NoTrack,

    /// Codec not supported
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Corrupt packet or truncated stream
    #[error("malformed audio data: {0}")]
    Malformed(String),

    /// Chunk decoded to zero frames
    #[error("chunk contains no audio frames")]
    NoFrames,

    /// Sample rate conversion failed
    #[error("resampling failed: {0}")]
    Resample(String),
}

/// Sink-level failure; never recoverable by the scheduler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// Output device disappeared or the stream died
    #[error("output device lost: {0}")]
    DeviceLost(String),

    /// Sink refused the buffer (closed, saturated)
    #[error("buffer rejected: {0}")]
    Rejected(String),
}

/// Convenience Result type using tonebridge-ap Error
pub type Result<T> = std::result::Result<T, Error>;
