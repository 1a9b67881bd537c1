//! JPEG decompression using TurboJPEG (libjpeg-turbo).
//!
//! RGB24 output goes through `decompress` with the frame's pitch; planar
//! output goes through `decompress_to_yuv`, which writes the frame's planes
//! back to back at the frame's stride alignment. libjpeg-turbo uses its
//! accurate integer IDCT unless fast DCT is requested, and it never is here.

use turbojpeg::{Decompressor, Image, PixelFormat as TJPixelFormat, Subsamp, YuvImage};

use super::codec::{DecompressorFactory, JpegDecompressor, JpegHeader};
use crate::error::{AppError, Result};
use crate::video::format::{ChromaSubsampling, PixelFormat};
use crate::video::frame::ImageFrame;

fn from_tj_subsamp(subsamp: Subsamp) -> Result<ChromaSubsampling> {
    match subsamp {
        Subsamp::None => Ok(ChromaSubsampling::S444),
        Subsamp::Sub2x1 => Ok(ChromaSubsampling::S422),
        Subsamp::Sub2x2 => Ok(ChromaSubsampling::S420),
        Subsamp::Gray => Ok(ChromaSubsampling::Gray),
        Subsamp::Sub1x2 => Ok(ChromaSubsampling::S440),
        Subsamp::Sub4x1 => Ok(ChromaSubsampling::S411),
        #[allow(unreachable_patterns)]
        other => Err(AppError::Codec(format!(
            "unsupported chroma subsampling {:?}",
            other
        ))),
    }
}

pub(crate) fn to_tj_subsamp(subsampling: ChromaSubsampling) -> Subsamp {
    match subsampling {
        ChromaSubsampling::S444 => Subsamp::None,
        ChromaSubsampling::S422 => Subsamp::Sub2x1,
        ChromaSubsampling::S420 => Subsamp::Sub2x2,
        ChromaSubsampling::Gray => Subsamp::Gray,
        ChromaSubsampling::S440 => Subsamp::Sub1x2,
        ChromaSubsampling::S411 => Subsamp::Sub4x1,
    }
}

/// TurboJPEG decompressor handle
pub struct TurboJpegDecompressor {
    decompressor: Decompressor,
}

impl TurboJpegDecompressor {
    pub fn new() -> Result<Self> {
        let decompressor = Decompressor::new().map_err(|e| {
            AppError::Codec(format!("Failed to create turbojpeg decoder: {}", e))
        })?;
        Ok(Self { decompressor })
    }
}

impl JpegDecompressor for TurboJpegDecompressor {
    fn read_header(&mut self, jpeg: &[u8]) -> Result<JpegHeader> {
        let header = self
            .decompressor
            .read_header(jpeg)
            .map_err(|e| AppError::Codec(format!("turbojpeg read_header failed: {}", e)))?;

        Ok(JpegHeader {
            width: header.width as u32,
            height: header.height as u32,
            subsampling: from_tj_subsamp(header.subsamp)?,
        })
    }

    fn decompress(&mut self, jpeg: &[u8], frame: &mut ImageFrame) -> Result<()> {
        let width = frame.width() as usize;
        let height = frame.height() as usize;

        match frame.format() {
            PixelFormat::Rgb24 => {
                let pitch = frame.stride(0).unwrap_or(width * 3);
                let pixels = frame
                    .plane_mut(0)
                    .ok_or_else(|| AppError::Codec("RGB24 frame has no plane".to_string()))?;
                let image = Image {
                    pixels,
                    width,
                    pitch,
                    height,
                    format: TJPixelFormat::RGB,
                };
                self.decompressor
                    .decompress(jpeg, image)
                    .map_err(|e| AppError::Codec(format!("turbojpeg decode failed: {}", e)))
            }
            format => {
                let subsampling = format.subsampling().ok_or_else(|| {
                    AppError::Codec(format!("cannot decode JPEG into {}", format))
                })?;
                let align = frame.stride_align();
                let image = YuvImage {
                    pixels: frame.data_mut(),
                    width,
                    align,
                    height,
                    subsamp: to_tj_subsamp(subsampling),
                };
                self.decompressor
                    .decompress_to_yuv(jpeg, image)
                    .map_err(|e| AppError::Codec(format!("turbojpeg YUV decode failed: {}", e)))
            }
        }
    }
}

/// Factory for [`TurboJpegDecompressor`] handles
#[derive(Debug, Default, Clone, Copy)]
pub struct TurboJpegFactory;

impl DecompressorFactory for TurboJpegFactory {
    fn name(&self) -> &str {
        "turbojpeg"
    }

    fn create(&self) -> Result<Box<dyn JpegDecompressor>> {
        Ok(Box::new(TurboJpegDecompressor::new()?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::video::pool::FramePool;

    /// Encode a synthetic gradient as JPEG
    pub(crate) fn test_jpeg(width: usize, height: usize, subsamp: Subsamp) -> Vec<u8> {
        let mut pixels = vec![0u8; width * height * 3];
        for y in 0..height {
            for x in 0..width {
                let i = (y * width + x) * 3;
                pixels[i] = (x % 256) as u8;
                pixels[i + 1] = (y % 256) as u8;
                pixels[i + 2] = ((x + y) % 256) as u8;
            }
        }
        let image = Image {
            pixels: pixels.as_slice(),
            width,
            pitch: width * 3,
            height,
            format: TJPixelFormat::RGB,
        };
        let mut compressor = turbojpeg::Compressor::new().unwrap();
        compressor.set_quality(85).unwrap();
        compressor.set_subsamp(subsamp).unwrap();
        compressor.compress_to_vec(image).unwrap()
    }

    #[test]
    fn test_read_header() {
        let jpeg = test_jpeg(640, 480, Subsamp::Sub2x2);
        let mut dec = TurboJpegDecompressor::new().unwrap();
        let header = dec.read_header(&jpeg).unwrap();
        assert_eq!(header.resolution(), (640, 480).into());
        assert_eq!(header.subsampling, ChromaSubsampling::S420);

        let jpeg = test_jpeg(64, 32, Subsamp::Sub2x1);
        assert_eq!(
            dec.read_header(&jpeg).unwrap().subsampling,
            ChromaSubsampling::S422
        );
    }

    #[test]
    fn test_read_header_garbage() {
        let mut dec = TurboJpegDecompressor::new().unwrap();
        assert!(dec.read_header(&[0u8; 64]).is_err());
        assert!(dec.read_header(&[]).is_err());
    }

    #[test]
    fn test_decompress_rgb_padded_pitch() {
        let jpeg = test_jpeg(100, 50, Subsamp::Sub2x2);
        let pool = FramePool::new(crate::video::pool::FramePoolConfig {
            stride_align: 64,
            ..Default::default()
        });
        let mut frame = pool.allocate(100, 50, PixelFormat::Rgb24).unwrap();
        assert_eq!(frame.stride(0), Some(320));

        let mut dec = TurboJpegDecompressor::new().unwrap();
        dec.decompress(&jpeg, &mut frame).unwrap();
        // Gradient survives lossy coding roughly: right edge is brighter in red
        let row = &frame.plane(0).unwrap()[..300];
        assert!(row[297] > row[0]);
        pool.release(frame);
    }

    #[test]
    fn test_decompress_yuv_planes() {
        let jpeg = test_jpeg(64, 48, Subsamp::Sub2x2);
        let pool = FramePool::default();
        let mut frame = pool.allocate(64, 48, PixelFormat::Yuv420p).unwrap();
        let mut dec = TurboJpegDecompressor::new().unwrap();
        dec.decompress(&jpeg, &mut frame).unwrap();
        assert!(frame.plane(0).unwrap().iter().any(|b| *b != 0));
        pool.release(frame);
    }

    #[test]
    fn test_factory_creates_handles() {
        let factory = TurboJpegFactory;
        assert_eq!(factory.name(), "turbojpeg");
        let mut handle = factory.create().unwrap();
        let jpeg = test_jpeg(16, 16, Subsamp::None);
        assert_eq!(
            handle.read_header(&jpeg).unwrap().subsampling,
            ChromaSubsampling::S444
        );
    }
}
