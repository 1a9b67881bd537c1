//! Encoder traits and common types

use bytes::Bytes;
use std::time::Instant;

use crate::error::Result;
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::ImageFrame;

/// Encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Output quality (1-100 for JPEG)
    pub quality: u32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self { quality: 80 }
    }
}

impl EncoderConfig {
    pub fn jpeg(quality: u32) -> Self {
        Self { quality }
    }
}

/// Encoded frame output
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Encoded data
    pub data: Bytes,
    /// Output format
    pub format: EncodedFormat,
    /// Resolution
    pub resolution: Resolution,
    /// Whether this is a key frame
    pub key_frame: bool,
    /// Frame sequence number
    pub sequence: u64,
    /// Encoding timestamp
    pub timestamp: Instant,
}

impl EncodedFrame {
    pub fn jpeg(data: Bytes, resolution: Resolution, sequence: u64) -> Self {
        Self {
            data,
            format: EncodedFormat::Jpeg,
            resolution,
            key_frame: true,
            sequence,
            timestamp: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Encoded output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodedFormat {
    Jpeg,
}

impl std::fmt::Display for EncodedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodedFormat::Jpeg => write!(f, "JPEG"),
        }
    }
}

/// Downstream encoder fed with decoded frames.
/// Note: Not Sync because some encoders (like turbojpeg) are not thread-safe
pub trait Encoder: Send {
    /// Get encoder name
    fn name(&self) -> &str;

    /// Get output format
    fn output_format(&self) -> EncodedFormat;

    /// Encode a decoded frame. The frame is only borrowed; the caller
    /// releases it afterwards.
    fn encode(&mut self, frame: &ImageFrame, sequence: u64) -> Result<EncodedFrame>;

    /// Flush any pending frames
    fn flush(&mut self) -> Result<Vec<EncodedFrame>> {
        Ok(vec![])
    }

    /// Check if encoder supports the given input format
    fn supports_format(&self, format: PixelFormat) -> bool;
}
