use thiserror::Error;

use crate::video::format::{PixelFormat, Resolution};

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Failed to start capture [{source_name}]: {reason}")]
    CaptureStart { source_name: String, reason: String },

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Invalid frame geometry: {resolution} {format}")]
    InvalidGeometry {
        resolution: Resolution,
        format: PixelFormat,
    },

    #[error("Frame pool exhausted: {outstanding} outstanding of {limit} buffers")]
    PoolExhausted { outstanding: usize, limit: usize },

    #[error("Out of memory allocating {bytes} byte frame buffer")]
    OutOfMemory { bytes: usize },
}

impl AppError {
    /// Whether this error only affects the current frame
    pub fn is_per_frame(&self) -> bool {
        matches!(
            self,
            AppError::Codec(_)
                | AppError::Encode(_)
                | AppError::InvalidGeometry { .. }
                | AppError::PoolExhausted { .. }
                | AppError::OutOfMemory { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
