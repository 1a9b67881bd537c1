//! Video capture, decoding and encoding
//!
//! Compressed frames come from a [`CaptureSource`], are decoded into pooled
//! [`ImageFrame`]s by the [`JpegDecoder`] and handed to an [`Encoder`] by the
//! [`FramePipeline`].

pub mod capture;
pub mod decoder;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod pipeline;
pub mod pool;
pub mod replay;

pub use capture::{CameraFrame, CaptureSource, CaptureState, V4l2Capture, V4l2CaptureConfig};
pub use decoder::{DecodeFailure, DecoderStats, JpegDecoder, JpegDecoderConfig};
pub use encoder::{EncodedFormat, EncodedFrame, Encoder, EncoderConfig, JpegEncoder};
pub use format::{ChromaSubsampling, PixelFormat, Resolution};
pub use frame::{ImageFrame, PlaneLayout};
pub use pipeline::{FrameOutcome, FramePipeline, PipelineConfig, PipelineState, PipelineStats};
pub use pool::{FrameGuard, FramePool, FramePoolConfig, PoolStats};
pub use replay::{FileReplayCapture, ReplayConfig};
