//! Capture -> decode -> encode pipeline
//!
//! The capture thread delivers compressed frames to [`FramePipeline::process_frame`],
//! which decodes into a pooled frame, hands it to the encoder and returns the
//! buffer to the pool. [`FramePipeline::run`] drives a capture source until
//! cancellation or end of stream and then shuts everything down in order.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::capture::{CameraFrame, CaptureSource, FrameCallback};
use super::decoder::JpegDecoder;
use super::encoder::Encoder;
use super::pool::FramePool;
use crate::error::{AppError, Result};
use crate::error_throttled;
use crate::utils::LogThrottler;

/// Default interval for checking the capture source state
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How often `run` checks whether capture has ended
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Pipeline lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Capturing,
    Decoding,
    Encoding,
    Releasing,
    ShuttingDown,
    Terminated,
}

impl PipelineState {
    /// No new frames are accepted
    pub fn is_stopping(&self) -> bool {
        matches!(self, PipelineState::ShuttingDown | PipelineState::Terminated)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Capturing => "capturing",
            PipelineState::Decoding => "decoding",
            PipelineState::Encoding => "encoding",
            PipelineState::Releasing => "releasing",
            PipelineState::ShuttingDown => "shutting down",
            PipelineState::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

/// What happened to one captured frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Decoded and encoded
    Encoded {
        decode: Duration,
        encode: Duration,
        bytes: usize,
    },
    /// Decode failed, frame dropped
    DecodeFailed,
    /// Encode failed, frame dropped after release
    EncodeFailed,
    /// Arrived after cancellation
    Skipped,
}

/// Pipeline statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub frames_encoded: u64,
    pub decode_failures: u64,
    pub encode_failures: u64,
    pub skipped: u64,
    pub bytes_encoded: u64,
    pub avg_decode_ms: f32,
    pub avg_encode_ms: f32,
}

impl PipelineStats {
    fn record_decode(&mut self, elapsed: Duration) {
        self.frames_decoded += 1;
        let ms = elapsed.as_secs_f32() * 1000.0;
        self.avg_decode_ms += (ms - self.avg_decode_ms) / self.frames_decoded as f32;
    }

    fn record_encode(&mut self, elapsed: Duration, bytes: usize) {
        self.frames_encoded += 1;
        self.bytes_encoded += bytes as u64;
        let ms = elapsed.as_secs_f32() * 1000.0;
        self.avg_encode_ms += (ms - self.avg_encode_ms) / self.frames_encoded as f32;
    }
}

/// Decode/encode harness fed by a capture source
pub struct FramePipeline {
    config: PipelineConfig,
    decoder: Mutex<JpegDecoder>,
    encoder: Mutex<Box<dyn Encoder>>,
    pool: Arc<FramePool>,
    stats: Mutex<PipelineStats>,
    state: watch::Sender<PipelineState>,
    throttler: LogThrottler,
    cancel: CancellationToken,
}

impl FramePipeline {
    /// Create a pipeline. Decoded frames are returned to the decoder's pool.
    pub fn new(
        config: PipelineConfig,
        decoder: JpegDecoder,
        encoder: Box<dyn Encoder>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let pool = decoder.pool().clone();
        let (state, _) = watch::channel(PipelineState::Idle);
        Arc::new(Self {
            config,
            decoder: Mutex::new(decoder),
            encoder: Mutex::new(encoder),
            pool,
            stats: Mutex::new(PipelineStats::default()),
            state,
            throttler: LogThrottler::with_secs(5),
            cancel,
        })
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn state_watch(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.lock().clone()
    }

    pub fn pool(&self) -> &Arc<FramePool> {
        &self.pool
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Move to a per-frame state unless shutdown has begun
    fn enter(&self, next: PipelineState) {
        self.state.send_if_modified(|state| {
            if state.is_stopping() || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    /// Decode, encode and release one captured frame
    pub fn process_frame(&self, frame: &CameraFrame) -> FrameOutcome {
        if self.cancel.is_cancelled() || self.state().is_stopping() {
            self.stats.lock().skipped += 1;
            return FrameOutcome::Skipped;
        }
        self.stats.lock().frames_received += 1;

        self.enter(PipelineState::Decoding);
        let start = Instant::now();
        let decoded = self.decoder.lock().try_decompress(&frame.image);
        let decode_time = start.elapsed();

        let mut decoded = match decoded {
            Ok(decoded) => self.pool.scoped(decoded),
            Err(e) => {
                error_throttled!(
                    self.throttler,
                    "decode",
                    "Frame {} dropped ({} bytes): {}",
                    frame.frame_number,
                    frame.image_bytes(),
                    e
                );
                self.stats.lock().decode_failures += 1;
                self.enter(PipelineState::Capturing);
                return FrameOutcome::DecodeFailed;
            }
        };
        decoded.sequence = frame.frame_number;
        self.stats.lock().record_decode(decode_time);

        self.enter(PipelineState::Encoding);
        let start = Instant::now();
        let encoded = self.encoder.lock().encode(&decoded, frame.frame_number);
        let encode_time = start.elapsed();

        self.enter(PipelineState::Releasing);
        let resolution = decoded.resolution();
        let format = decoded.format();
        drop(decoded);

        let outcome = match encoded {
            Ok(encoded) => {
                let bytes = encoded.len();
                self.stats.lock().record_encode(encode_time, bytes);
                info!(
                    "Frame {} {} {}: decode {:.2} ms, encode {:.2} ms, latency {:.2} ms, {} -> {} bytes ({})",
                    frame.frame_number,
                    resolution,
                    format,
                    decode_time.as_secs_f64() * 1000.0,
                    encode_time.as_secs_f64() * 1000.0,
                    frame.age().as_secs_f64() * 1000.0,
                    frame.image_bytes(),
                    bytes,
                    encoded.format
                );
                FrameOutcome::Encoded {
                    decode: decode_time,
                    encode: encode_time,
                    bytes,
                }
            }
            Err(e) => {
                error_throttled!(
                    self.throttler,
                    "encode",
                    "Frame {} encode failed: {}",
                    frame.frame_number,
                    e
                );
                self.stats.lock().encode_failures += 1;
                FrameOutcome::EncodeFailed
            }
        };

        self.enter(PipelineState::Capturing);
        outcome
    }

    /// Run `capture` through the pipeline until cancellation or end of stream.
    ///
    /// Returns [`AppError::CaptureStart`] if the source cannot be started.
    /// Otherwise shutdown always runs and the pipeline ends `Terminated`.
    pub async fn run(self: &Arc<Self>, capture: &mut dyn CaptureSource) -> Result<()> {
        let pipeline = self.clone();
        let on_frame: FrameCallback = Box::new(move |frame| {
            pipeline.process_frame(frame);
        });

        if let Err(e) = capture.initialize(on_frame, self.cancel.child_token()) {
            self.state.send_replace(PipelineState::Terminated);
            return Err(AppError::CaptureStart {
                source_name: capture.name().to_string(),
                reason: e.to_string(),
            });
        }

        self.enter(PipelineState::Capturing);
        info!("Pipeline running with {} capture", capture.name());

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    let capture_state = capture.state();
                    if capture_state.is_terminal() {
                        info!("Capture ended ({:?})", capture_state);
                        break;
                    }
                }
            }
        }

        self.shutdown(capture);
        Ok(())
    }

    fn shutdown(&self, capture: &mut dyn CaptureSource) {
        self.state.send_replace(PipelineState::ShuttingDown);
        capture.shutdown();

        match self.encoder.lock().flush() {
            Ok(flushed) if !flushed.is_empty() => {
                debug!("Encoder flushed {} frames", flushed.len())
            }
            Ok(_) => {}
            Err(e) => warn!("Encoder flush failed: {}", e),
        }

        let trimmed = self.pool.trim();
        let stats = self.stats();
        let pool_stats = self.pool.stats();
        let decoder_stats = self.decoder.lock().stats().clone();

        info!(
            "Pipeline summary: {} received, {} encoded ({} bytes), {} decode failures, {} encode failures, {} skipped",
            stats.frames_received,
            stats.frames_encoded,
            stats.bytes_encoded,
            stats.decode_failures,
            stats.encode_failures,
            stats.skipped
        );
        info!(
            "Average latency: decode {:.2} ms, encode {:.2} ms",
            stats.avg_decode_ms, stats.avg_encode_ms
        );
        info!(
            "Pool: {} buffers created, {} reuses, {} evictions, {} trimmed, {} dropped unreleased; decoder dropped {} frames",
            pool_stats.buffers_created,
            pool_stats.reuses,
            pool_stats.evictions,
            trimmed,
            pool_stats.dropped,
            decoder_stats.frames_dropped()
        );
        if pool_stats.outstanding > 0 {
            warn!("{} frames still outstanding at shutdown", pool_stats.outstanding);
        }

        self.state.send_replace(PipelineState::Terminated);
    }
}
