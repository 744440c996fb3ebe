//! Common error types for Tonebridge

use thiserror::Error;

/// Common result type for Tonebridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the service and its producers
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV encoding error
    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
