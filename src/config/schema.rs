use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::video::capture::V4l2CaptureConfig;
use crate::video::decoder::JpegDecoderConfig;
use crate::video::encoder::EncoderConfig;
use crate::video::format::Resolution;
use crate::video::pipeline::PipelineConfig;
use crate::video::pool::FramePoolConfig;
use crate::video::replay::ReplayConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Frame source settings
    pub capture: CaptureSettings,
    /// JPEG decoder settings
    pub decoder: DecoderSettings,
    /// Frame pool settings
    pub pool: PoolSettings,
    /// Encoder settings
    pub encoder: EncoderSettings,
    /// Pipeline loop settings
    pub pipeline: PipelineSettings,
}

/// Where frames come from
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSourceKind {
    /// V4L2 capture device
    #[default]
    V4l2,
    /// JPEG files on disk
    Replay,
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureSettings {
    pub source: CaptureSourceKind,
    /// Video device path (e.g., /dev/video0)
    pub device: String,
    /// Resolution width
    pub width: u32,
    /// Resolution height
    pub height: u32,
    /// Frame rate
    pub fps: u32,
    /// Number of mmap buffers
    pub buffer_count: u32,
    /// Dequeue timeout in milliseconds
    pub timeout_ms: u64,
    /// File or directory to replay
    pub replay_path: Option<PathBuf>,
    /// Replay passes (None = loop until stopped)
    pub replay_loops: Option<u32>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: CaptureSourceKind::V4l2,
            device: "/dev/video0".to_string(),
            width: 1920,
            height: 1080,
            fps: 30,
            buffer_count: 2,
            timeout_ms: 2000,
            replay_path: None,
            replay_loops: Some(1),
        }
    }
}

/// Decoder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderSettings {
    /// Decode straight to YUV planes instead of RGB24
    pub fast_yuv: bool,
}

/// Frame pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    /// Buffers alive at once (0 = unlimited)
    pub max_buffers: usize,
    /// Free buffers kept per geometry
    pub max_free_per_geometry: usize,
    /// Row alignment in bytes, power of two
    pub stride_align: usize,
    /// Largest decoded frame in bytes (0 = unlimited)
    pub max_frame_bytes: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        let pool = FramePoolConfig::default();
        Self {
            max_buffers: pool.max_buffers,
            max_free_per_geometry: pool.max_free_per_geometry,
            stride_align: pool.stride_align,
            max_frame_bytes: pool.max_frame_bytes,
        }
    }
}

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderSettings {
    /// JPEG quality (1-100)
    pub quality: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self { quality: 80 }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSettings {
    /// How often the capture state is checked, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl AppConfig {
    /// Check the configuration for values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.width == 0 || capture.height == 0 {
            return Err(AppError::Config(format!(
                "Invalid resolution {}x{}",
                capture.width, capture.height
            )));
        }
        if capture.fps == 0 {
            return Err(AppError::Config("fps must be greater than 0".to_string()));
        }
        if capture.buffer_count == 0 {
            return Err(AppError::Config(
                "buffer_count must be greater than 0".to_string(),
            ));
        }
        if capture.source == CaptureSourceKind::Replay && capture.replay_path.is_none() {
            return Err(AppError::Config(
                "replay source selected without a replay path".to_string(),
            ));
        }
        if !self.pool.stride_align.is_power_of_two() {
            return Err(AppError::Config(format!(
                "stride_align must be a power of two, got {}",
                self.pool.stride_align
            )));
        }
        if !(1..=100).contains(&self.encoder.quality) {
            return Err(AppError::Config(format!(
                "JPEG quality must be 1-100, got {}",
                self.encoder.quality
            )));
        }
        if self.pipeline.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.capture.width, self.capture.height)
    }

    pub fn v4l2_config(&self) -> V4l2CaptureConfig {
        V4l2CaptureConfig {
            device_path: PathBuf::from(&self.capture.device),
            resolution: self.resolution(),
            fps: self.capture.fps,
            buffer_count: self.capture.buffer_count,
            timeout: Duration::from_millis(self.capture.timeout_ms),
        }
    }

    /// Replay settings, if a replay path is configured
    pub fn replay_config(&self) -> Option<ReplayConfig> {
        self.capture.replay_path.as_ref().map(|path| {
            ReplayConfig::new(path)
                .with_fps(self.capture.fps)
                .with_loops(self.capture.replay_loops)
        })
    }

    pub fn decoder_config(&self) -> JpegDecoderConfig {
        JpegDecoderConfig {
            fast_yuv: self.decoder.fast_yuv,
        }
    }

    pub fn pool_config(&self) -> FramePoolConfig {
        FramePoolConfig {
            max_buffers: self.pool.max_buffers,
            max_free_per_geometry: self.pool.max_free_per_geometry,
            stride_align: self.pool.stride_align,
            max_frame_bytes: self.pool.max_frame_bytes,
        }
    }

    pub fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig::jpeg(self.encoder.quality)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(self.pipeline.poll_interval_ms),
        }
    }
}
