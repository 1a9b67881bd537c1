//! JPEG encoder implementation
//!
//! Re-encodes decoded frames with turbojpeg. Packed RGB24 goes through the
//! regular compressor with 4:2:0 output; planar frames are handed to the
//! YUV path as-is, so no color conversion happens.

use bytes::Bytes;

use super::traits::{EncodedFormat, EncodedFrame, Encoder, EncoderConfig};
use crate::error::{AppError, Result};
use crate::video::decoder::mjpeg_turbo::to_tj_subsamp;
use crate::video::format::PixelFormat;
use crate::video::frame::ImageFrame;

/// JPEG encoder using turbojpeg
///
/// Note: This encoder is NOT thread-safe due to turbojpeg limitations.
/// Use it from a single thread or wrap in a Mutex.
pub struct JpegEncoder {
    config: EncoderConfig,
    compressor: turbojpeg::Compressor,
}

impl JpegEncoder {
    /// Create a new JPEG encoder
    pub fn new(config: EncoderConfig) -> Result<Self> {
        let mut compressor = turbojpeg::Compressor::new().map_err(|e| {
            AppError::Encode(format!("Failed to create turbojpeg compressor: {}", e))
        })?;

        compressor
            .set_quality(config.quality.clamp(1, 100) as i32)
            .map_err(|e| AppError::Encode(format!("Failed to set JPEG quality: {}", e)))?;
        compressor
            .set_subsamp(turbojpeg::Subsamp::Sub2x2)
            .map_err(|e| AppError::Encode(format!("Failed to set JPEG subsampling: {}", e)))?;

        Ok(Self { config, compressor })
    }

    /// Create with specific quality
    pub fn with_quality(quality: u32) -> Result<Self> {
        Self::new(EncoderConfig::jpeg(quality))
    }

    /// Set JPEG quality (1-100)
    pub fn set_quality(&mut self, quality: u32) -> Result<()> {
        self.compressor
            .set_quality(quality.clamp(1, 100) as i32)
            .map_err(|e| AppError::Encode(format!("Failed to set JPEG quality: {}", e)))?;
        self.config.quality = quality;
        Ok(())
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    fn encode_rgb(&mut self, frame: &ImageFrame) -> Result<Vec<u8>> {
        let width = frame.width() as usize;
        let pixels = frame
            .plane(0)
            .ok_or_else(|| AppError::Encode("RGB24 frame has no plane".to_string()))?;
        let image = turbojpeg::Image {
            pixels,
            width,
            pitch: frame.stride(0).unwrap_or(width * 3),
            height: frame.height() as usize,
            format: turbojpeg::PixelFormat::RGB,
        };
        self.compressor
            .compress_to_vec(image)
            .map_err(|e| AppError::Encode(format!("JPEG compression failed: {}", e)))
    }

    fn encode_planar(&mut self, frame: &ImageFrame) -> Result<Vec<u8>> {
        let subsampling = frame.format().subsampling().ok_or_else(|| {
            AppError::Encode(format!("Unsupported input format for JPEG: {}", frame.format()))
        })?;
        let yuv_image = turbojpeg::YuvImage {
            pixels: frame.data(),
            width: frame.width() as usize,
            height: frame.height() as usize,
            align: frame.stride_align(),
            subsamp: to_tj_subsamp(subsampling),
        };
        self.compressor
            .compress_yuv_to_vec(yuv_image)
            .map_err(|e| AppError::Encode(format!("JPEG compression failed: {}", e)))
    }
}

impl Encoder for JpegEncoder {
    fn name(&self) -> &str {
        "JPEG (turbojpeg)"
    }

    fn output_format(&self) -> EncodedFormat {
        EncodedFormat::Jpeg
    }

    fn encode(&mut self, frame: &ImageFrame, sequence: u64) -> Result<EncodedFrame> {
        let data = match frame.format() {
            PixelFormat::Rgb24 => self.encode_rgb(frame)?,
            format if format.is_planar() => self.encode_planar(frame)?,
            format => {
                return Err(AppError::Encode(format!(
                    "Unsupported input format for JPEG: {}",
                    format
                )))
            }
        };

        Ok(EncodedFrame::jpeg(
            Bytes::from(data),
            frame.resolution(),
            sequence,
        ))
    }

    fn supports_format(&self, format: PixelFormat) -> bool {
        format == PixelFormat::Rgb24 || format.is_planar()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::decoder::mjpeg_turbo::tests::test_jpeg;
    use crate::video::decoder::{JpegDecoder, JpegDecoderConfig};
    use crate::video::pool::{FramePool, FramePoolConfig};
    use std::sync::Arc;
    use turbojpeg::Subsamp;

    fn is_jpeg(data: &[u8]) -> bool {
        data.len() > 4 && data[..2] == [0xFF, 0xD8] && data[data.len() - 2..] == [0xFF, 0xD9]
    }

    #[test]
    fn test_encode_decoded_rgb() {
        let pool = Arc::new(FramePool::new(FramePoolConfig {
            stride_align: 32,
            ..Default::default()
        }));
        let mut decoder = JpegDecoder::new(pool.clone(), JpegDecoderConfig::default());
        let frame = decoder.decompress(&test_jpeg(100, 60, Subsamp::Sub2x2)).unwrap();

        let mut encoder = JpegEncoder::with_quality(70).unwrap();
        let encoded = encoder.encode(&frame, 7).unwrap();
        assert!(is_jpeg(&encoded.data));
        assert_eq!(encoded.sequence, 7);
        assert_eq!(encoded.resolution, frame.resolution());
        assert_eq!(encoded.format, EncodedFormat::Jpeg);
        decoder.release(frame);
    }

    #[test]
    fn test_encode_decoded_yuv() {
        let pool = Arc::new(FramePool::default());
        let mut decoder = JpegDecoder::new(pool, JpegDecoderConfig { fast_yuv: true });
        for subsamp in [Subsamp::Sub2x2, Subsamp::Sub2x1, Subsamp::None] {
            let frame = decoder.decompress(&test_jpeg(64, 48, subsamp)).unwrap();
            let mut encoder = JpegEncoder::new(EncoderConfig::default()).unwrap();
            let encoded = encoder.encode(&frame, 1).unwrap();
            assert!(is_jpeg(&encoded.data), "{:?}", subsamp);
            decoder.release(frame);
        }
    }

    #[test]
    fn test_supports_format() {
        let encoder = JpegEncoder::with_quality(80).unwrap();
        assert!(encoder.supports_format(PixelFormat::Rgb24));
        assert!(encoder.supports_format(PixelFormat::Yuv420p));
        assert!(encoder.supports_format(PixelFormat::Gray));
        assert!(!encoder.supports_format(PixelFormat::Mjpeg));
    }
}
