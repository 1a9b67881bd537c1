//! Pooled JPEG decoder
//!
//! Parses the stream header, picks the output format, takes a frame from the
//! [`FramePool`] and lets the codec fill it. Failures never propagate as
//! errors from [`JpegDecoder::decompress`]: they are logged, counted and the
//! frame is dropped, leaving the decision to continue to the caller.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

use super::codec::{DecompressorFactory, JpegDecompressor, JpegHeader};
use super::mjpeg_turbo::TurboJpegFactory;
use crate::error::AppError;
use crate::video::format::{ChromaSubsampling, PixelFormat};
use crate::video::frame::ImageFrame;
use crate::video::pool::FramePool;

/// Decoder configuration
#[derive(Debug, Clone, Default)]
pub struct JpegDecoderConfig {
    /// Skip color conversion and decode straight to YUV planes matching the
    /// source subsampling. Off by default: RGB24 is simpler downstream.
    pub fast_yuv: bool,
}

impl JpegDecoderConfig {
    /// Output format for a stream with the given subsampling
    pub fn output_format(&self, subsampling: ChromaSubsampling) -> Option<PixelFormat> {
        if self.fast_yuv {
            PixelFormat::from_subsampling(subsampling)
        } else {
            Some(PixelFormat::Rgb24)
        }
    }
}

/// Stage at which a decode failed
#[derive(Error, Debug)]
pub enum DecodeFailure {
    #[error("decoder init failed: {0}")]
    Init(#[source] AppError),

    #[error("header parse failed: {0}")]
    Header(#[source] AppError),

    #[error("unsupported subsampling {0} for YUV output")]
    UnsupportedSubsampling(ChromaSubsampling),

    #[error("frame allocation failed: {0}")]
    Allocate(#[source] AppError),

    #[error("decompress failed: {0}")]
    Decompress(#[source] AppError),
}

/// Decode counters; every failure is a dropped frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub init_failures: u64,
    pub header_failures: u64,
    pub unsupported: u64,
    pub allocation_failures: u64,
    pub decompress_failures: u64,
}

impl DecoderStats {
    /// Frames that produced no output
    pub fn frames_dropped(&self) -> u64 {
        self.init_failures
            + self.header_failures
            + self.unsupported
            + self.allocation_failures
            + self.decompress_failures
    }
}

/// JPEG decoder that hands out pooled frames.
///
/// Owns one codec handle, created on first use. Not `Sync`; wrap it in a
/// mutex to share between capture threads.
pub struct JpegDecoder {
    factory: Arc<dyn DecompressorFactory>,
    handle: Option<Box<dyn JpegDecompressor>>,
    pool: Arc<FramePool>,
    config: JpegDecoderConfig,
    stats: DecoderStats,
}

impl JpegDecoder {
    /// Create a decoder backed by libjpeg-turbo
    pub fn new(pool: Arc<FramePool>, config: JpegDecoderConfig) -> Self {
        Self::with_factory(Arc::new(TurboJpegFactory), pool, config)
    }

    pub fn with_factory(
        factory: Arc<dyn DecompressorFactory>,
        pool: Arc<FramePool>,
        config: JpegDecoderConfig,
    ) -> Self {
        Self {
            factory,
            handle: None,
            pool,
            config,
            stats: DecoderStats::default(),
        }
    }

    pub fn config(&self) -> &JpegDecoderConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<FramePool> {
        &self.pool
    }

    pub fn stats(&self) -> &DecoderStats {
        &self.stats
    }

    /// Whether the codec handle has been created
    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Output format for a stream with the given subsampling
    pub fn output_format(&self, subsampling: ChromaSubsampling) -> Option<PixelFormat> {
        self.config.output_format(subsampling)
    }

    /// Decode `jpeg` into a pooled frame.
    ///
    /// Returns `None` on any failure; the reason is logged and counted in
    /// [`stats`](Self::stats). The returned frame must go back through
    /// [`release`](Self::release) (or the pool directly) once consumed.
    pub fn decompress(&mut self, jpeg: &[u8]) -> Option<ImageFrame> {
        match self.try_decompress(jpeg) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("JPEG decode failed ({} bytes): {}", jpeg.len(), e);
                None
            }
        }
    }

    /// Like [`decompress`](Self::decompress) but reports the failing stage
    /// instead of logging it.
    pub fn try_decompress(&mut self, jpeg: &[u8]) -> Result<ImageFrame, DecodeFailure> {
        let result = self.decode_inner(jpeg);
        match &result {
            Ok(_) => self.stats.frames_decoded += 1,
            Err(DecodeFailure::Init(_)) => self.stats.init_failures += 1,
            Err(DecodeFailure::Header(_)) => self.stats.header_failures += 1,
            Err(DecodeFailure::UnsupportedSubsampling(_)) => self.stats.unsupported += 1,
            Err(DecodeFailure::Allocate(_)) => self.stats.allocation_failures += 1,
            Err(DecodeFailure::Decompress(_)) => self.stats.decompress_failures += 1,
        }
        result
    }

    /// Return a decoded frame to the pool
    pub fn release(&self, frame: ImageFrame) {
        self.pool.release(frame);
    }

    fn decode_inner(&mut self, jpeg: &[u8]) -> Result<ImageFrame, DecodeFailure> {
        let handle = match &mut self.handle {
            Some(handle) => handle,
            slot @ None => {
                let handle = self.factory.create().map_err(DecodeFailure::Init)?;
                info!("JPEG decoder initialized ({})", self.factory.name());
                slot.insert(handle)
            }
        };

        if jpeg.is_empty() {
            return Err(DecodeFailure::Header(AppError::Codec(
                "empty JPEG buffer".to_string(),
            )));
        }

        let header: JpegHeader = handle.read_header(jpeg).map_err(DecodeFailure::Header)?;

        let format = self
            .config
            .output_format(header.subsampling)
            .ok_or(DecodeFailure::UnsupportedSubsampling(header.subsampling))?;

        let frame = self
            .pool
            .allocate(header.width, header.height, format)
            .map_err(DecodeFailure::Allocate)?;

        // Released by the guard if the codec fails part way through
        let mut frame = self.pool.scoped(frame);
        handle
            .decompress(jpeg, &mut frame)
            .map_err(DecodeFailure::Decompress)?;

        debug!(
            "Decoded {} {} -> {}",
            header.resolution(),
            header.subsampling,
            format
        );
        Ok(frame.into_inner())
    }
}
