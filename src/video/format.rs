//! Pixel format definitions and plane geometry

use serde::{Deserialize, Serialize};
use std::fmt;
use v4l::format::fourcc;

/// Supported pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// MJPEG compressed format (capture side only)
    Mjpeg,
    /// RGB24 format (3 bytes per pixel, one interleaved plane)
    Rgb24,
    /// YUV 4:2:0 planar (Y, U, V planes)
    Yuv420p,
    /// YUV 4:2:2 planar
    Yuv422p,
    /// YUV 4:4:4 planar
    Yuv444p,
    /// Single luma plane
    Gray,
}

impl PixelFormat {
    /// Convert to V4L2 FourCC
    pub fn to_fourcc(&self) -> fourcc::FourCC {
        match self {
            PixelFormat::Mjpeg => fourcc::FourCC::new(b"MJPG"),
            PixelFormat::Rgb24 => fourcc::FourCC::new(b"RGB3"),
            PixelFormat::Yuv420p => fourcc::FourCC::new(b"YU12"),
            PixelFormat::Yuv422p => fourcc::FourCC::new(b"422P"),
            PixelFormat::Yuv444p => fourcc::FourCC::new(b"444P"),
            PixelFormat::Gray => fourcc::FourCC::new(b"GREY"),
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg)
    }

    /// Check if format stores luma and chroma in separate planes
    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p | PixelFormat::Gray
        )
    }

    /// Number of planes in a decoded frame (0 for compressed formats)
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Mjpeg => 0,
            PixelFormat::Rgb24 | PixelFormat::Gray => 1,
            PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => 3,
        }
    }

    /// Bytes per sample in every plane of this format
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            _ => 1,
        }
    }

    /// Chroma subsampling factors (horizontal, vertical)
    pub fn chroma_factors(&self) -> (u32, u32) {
        match self {
            PixelFormat::Yuv420p => (2, 2),
            PixelFormat::Yuv422p => (2, 1),
            _ => (1, 1),
        }
    }

    /// Planar output matching a JPEG's native subsampling, if one exists
    pub fn from_subsampling(subsampling: ChromaSubsampling) -> Option<Self> {
        match subsampling {
            ChromaSubsampling::S420 => Some(PixelFormat::Yuv420p),
            ChromaSubsampling::S422 => Some(PixelFormat::Yuv422p),
            ChromaSubsampling::S444 => Some(PixelFormat::Yuv444p),
            ChromaSubsampling::Gray => Some(PixelFormat::Gray),
            ChromaSubsampling::S440 | ChromaSubsampling::S411 => None,
        }
    }

    /// Subsampling that describes this planar layout
    pub fn subsampling(&self) -> Option<ChromaSubsampling> {
        match self {
            PixelFormat::Yuv420p => Some(ChromaSubsampling::S420),
            PixelFormat::Yuv422p => Some(ChromaSubsampling::S422),
            PixelFormat::Yuv444p => Some(ChromaSubsampling::S444),
            PixelFormat::Gray => Some(ChromaSubsampling::Gray),
            PixelFormat::Mjpeg | PixelFormat::Rgb24 => None,
        }
    }

    /// Visible size of each plane as (row bytes, rows).
    ///
    /// Planar luma is padded up to the chroma factors so the chroma planes
    /// cover the whole image, which is the layout libjpeg-turbo reads and
    /// writes.
    pub fn plane_sizes(&self, resolution: Resolution) -> Vec<(usize, usize)> {
        let width = resolution.width as usize;
        let height = resolution.height as usize;
        match self {
            PixelFormat::Mjpeg => Vec::new(),
            PixelFormat::Rgb24 => vec![(width * 3, height)],
            PixelFormat::Gray => vec![(width, height)],
            PixelFormat::Yuv420p | PixelFormat::Yuv422p | PixelFormat::Yuv444p => {
                let (h_sub, v_sub) = self.chroma_factors();
                let (h_sub, v_sub) = (h_sub as usize, v_sub as usize);
                let luma_w = width.div_ceil(h_sub) * h_sub;
                let luma_h = height.div_ceil(v_sub) * v_sub;
                let chroma = (luma_w / h_sub, luma_h / v_sub);
                vec![(luma_w, luma_h), chroma, chroma]
            }
        }
    }

    /// Get all decodable output formats
    pub fn decoded() -> &'static [PixelFormat] {
        &[
            PixelFormat::Rgb24,
            PixelFormat::Yuv420p,
            PixelFormat::Yuv422p,
            PixelFormat::Yuv444p,
            PixelFormat::Gray,
        ]
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Mjpeg => "MJPEG",
            PixelFormat::Rgb24 => "RGB24",
            PixelFormat::Yuv420p => "YUV420P",
            PixelFormat::Yuv422p => "YUV422P",
            PixelFormat::Yuv444p => "YUV444P",
            PixelFormat::Gray => "GRAY",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "MJPEG" | "MJPG" => Ok(PixelFormat::Mjpeg),
            "RGB24" | "RGB" => Ok(PixelFormat::Rgb24),
            "YUV420P" | "YUV420" | "I420" => Ok(PixelFormat::Yuv420p),
            "YUV422P" | "YUV422" => Ok(PixelFormat::Yuv422p),
            "YUV444P" | "YUV444" => Ok(PixelFormat::Yuv444p),
            "GRAY" | "GREY" => Ok(PixelFormat::Gray),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// JPEG chroma subsampling as reported by the stream header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChromaSubsampling {
    S444,
    S422,
    S420,
    S440,
    S411,
    Gray,
}

impl fmt::Display for ChromaSubsampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChromaSubsampling::S444 => "4:4:4",
            ChromaSubsampling::S422 => "4:2:2",
            ChromaSubsampling::S420 => "4:2:0",
            ChromaSubsampling::S440 => "4:4:0",
            ChromaSubsampling::S411 => "4:1:1",
            ChromaSubsampling::Gray => "gray",
        };
        write!(f, "{}", name)
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Both dimensions are non-zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Common resolutions
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const HD1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_sizes_even() {
        let sizes = PixelFormat::Yuv420p.plane_sizes(Resolution::VGA);
        assert_eq!(sizes, vec![(640, 480), (320, 240), (320, 240)]);

        let sizes = PixelFormat::Yuv422p.plane_sizes(Resolution::VGA);
        assert_eq!(sizes, vec![(640, 480), (320, 480), (320, 480)]);

        let sizes = PixelFormat::Rgb24.plane_sizes(Resolution::VGA);
        assert_eq!(sizes, vec![(1920, 480)]);
    }

    #[test]
    fn test_plane_sizes_odd_pads_luma() {
        let sizes = PixelFormat::Yuv420p.plane_sizes(Resolution::new(33, 17));
        assert_eq!(sizes, vec![(34, 18), (17, 9), (17, 9)]);

        let sizes = PixelFormat::Yuv444p.plane_sizes(Resolution::new(33, 17));
        assert_eq!(sizes, vec![(33, 17), (33, 17), (33, 17)]);
    }

    #[test]
    fn test_from_subsampling() {
        assert_eq!(
            PixelFormat::from_subsampling(ChromaSubsampling::S420),
            Some(PixelFormat::Yuv420p)
        );
        assert_eq!(
            PixelFormat::from_subsampling(ChromaSubsampling::Gray),
            Some(PixelFormat::Gray)
        );
        assert_eq!(PixelFormat::from_subsampling(ChromaSubsampling::S411), None);

        for format in PixelFormat::decoded() {
            if let Some(sub) = format.subsampling() {
                assert_eq!(PixelFormat::from_subsampling(sub), Some(*format));
            }
        }
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("i420".parse::<PixelFormat>().unwrap(), PixelFormat::Yuv420p);
        assert_eq!("rgb24".parse::<PixelFormat>().unwrap(), PixelFormat::Rgb24);
        assert!("nv12".parse::<PixelFormat>().is_err());
        assert_eq!(PixelFormat::Yuv422p.to_string(), "YUV422P");
        assert_eq!(ChromaSubsampling::S420.to_string(), "4:2:0");
        assert_eq!(Resolution::VGA.to_string(), "640x480");
    }
}
