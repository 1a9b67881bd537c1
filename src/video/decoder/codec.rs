//! JPEG codec capability seam
//!
//! The bitstream work is done by an external library. The decoder only
//! needs two operations from it, plus a factory so the handle can be
//! created lazily and owned by exactly one decoder.

use crate::error::Result;
use crate::video::format::{ChromaSubsampling, Resolution};
use crate::video::frame::ImageFrame;

/// Stream metadata read without decoding pixel data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegHeader {
    pub width: u32,
    pub height: u32,
    pub subsampling: ChromaSubsampling,
}

impl JpegHeader {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Decompression state for one decoder.
///
/// Not required to be reentrant: callers never share a handle between
/// threads without a lock.
pub trait JpegDecompressor: Send {
    /// Parse width, height and chroma subsampling
    fn read_header(&mut self, jpeg: &[u8]) -> Result<JpegHeader>;

    /// Decode the full image into `frame`'s planes.
    ///
    /// `frame` has already been sized for the stream; its pixel format
    /// selects the output layout.
    fn decompress(&mut self, jpeg: &[u8], frame: &mut ImageFrame) -> Result<()>;
}

/// Creates decompressor handles
pub trait DecompressorFactory: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    fn create(&self) -> Result<Box<dyn JpegDecompressor>>;
}
