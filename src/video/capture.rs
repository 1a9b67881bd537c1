//! Capture sources
//!
//! A [`CaptureSource`] owns a thread that produces compressed frames and
//! calls the frame callback on that thread, one frame at a time. The V4L2
//! implementation streams MJPEG from a capture device using memory-mapped
//! buffers.

use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;

use super::format::{PixelFormat, Resolution};
use crate::error::{AppError, Result};
use crate::utils::LogThrottler;
use crate::{error_throttled, warn_throttled};

/// Default number of capture buffers
const DEFAULT_BUFFER_COUNT: u32 = 2;
/// Default capture timeout in seconds
const DEFAULT_TIMEOUT: u64 = 2;
/// Minimum valid frame size (bytes)
const MIN_FRAME_SIZE: usize = 128;

/// One compressed frame delivered by a capture source
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Compressed image bytes (cheap to clone)
    pub image: Bytes,
    /// Monotonically increasing frame number
    pub frame_number: u64,
    /// Timestamp when frame was captured
    pub capture_ts: Instant,
}

impl CameraFrame {
    pub fn new(image: Bytes, frame_number: u64) -> Self {
        Self {
            image,
            frame_number,
            capture_ts: Instant::now(),
        }
    }

    /// Number of compressed bytes
    pub fn image_bytes(&self) -> usize {
        self.image.len()
    }

    /// Get age of this frame (time since capture)
    pub fn age(&self) -> Duration {
        self.capture_ts.elapsed()
    }
}

/// Frame-ready callback, invoked on the capture thread
pub type FrameCallback = Box<dyn FnMut(&Arc<CameraFrame>) + Send + 'static>;

/// Capture source state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Not started
    Stopped,
    /// Starting (initializing device)
    Starting,
    /// Running and capturing
    Running,
    /// No signal from source
    NoSignal,
    /// Source ran out of frames
    Finished,
    /// Error occurred
    Error,
}

impl CaptureState {
    /// No more frames will arrive
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptureState::Finished | CaptureState::Error)
    }
}

/// Producer of compressed frames
pub trait CaptureSource: Send {
    /// Source name for logs
    fn name(&self) -> &str;

    /// Start producing frames.
    ///
    /// Device setup happens before this returns, so a device that cannot be
    /// opened is reported here. Production stops when `cancel` fires or
    /// [`shutdown`](Self::shutdown) is called.
    fn initialize(&mut self, on_frame: FrameCallback, cancel: CancellationToken) -> Result<()>;

    fn state(&self) -> CaptureState;

    fn is_error(&self) -> bool {
        self.state() == CaptureState::Error
    }

    /// Stop the capture thread and wait for it
    fn shutdown(&mut self);
}

/// Thread plumbing shared by capture sources
pub(crate) struct CaptureWorker {
    state: Arc<watch::Sender<CaptureState>>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(CaptureState::Stopped);
        Self {
            state: Arc::new(state),
            cancel: None,
            handle: None,
        }
    }

    pub(crate) fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn `body` on a named thread and wait for it to report setup.
    ///
    /// `body` receives a sender it must use exactly once to report whether
    /// setup succeeded before it starts delivering frames.
    pub(crate) fn spawn<F>(&mut self, name: &str, cancel: CancellationToken, body: F) -> Result<()>
    where
        F: FnOnce(mpsc::Sender<Result<()>>, Arc<watch::Sender<CaptureState>>, CancellationToken)
            + Send
            + 'static,
    {
        if self.is_running() {
            return Err(AppError::Capture(format!("{} already started", name)));
        }

        self.state.send_replace(CaptureState::Starting);
        let (ready_tx, ready_rx) = mpsc::channel();
        let state = self.state.clone();
        let thread_cancel = cancel.clone();

        let handle = std::thread::Builder::new()
            .name(format!("capture-{}", name))
            .spawn(move || body(ready_tx, state, thread_cancel))
            .map_err(|e| AppError::Capture(format!("Failed to spawn capture thread: {}", e)))?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(AppError::Capture("capture thread exited during setup".to_string()))
        });

        match ready {
            Ok(()) => {
                self.cancel = Some(cancel);
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                self.state.send_replace(CaptureState::Error);
                Err(e)
            }
        }
    }

    pub(crate) fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Capture thread panicked");
                self.state.send_replace(CaptureState::Error);
                return;
            }
        }
        if !self.state().is_terminal() {
            self.state.send_replace(CaptureState::Stopped);
        }
    }
}

/// V4L2 capture configuration
#[derive(Debug, Clone)]
pub struct V4l2CaptureConfig {
    /// Device path
    pub device_path: PathBuf,
    /// Desired resolution
    pub resolution: Resolution,
    /// Desired frame rate (0 = driver default)
    pub fps: u32,
    /// Number of capture buffers
    pub buffer_count: u32,
    /// Dequeue timeout
    pub timeout: Duration,
}

impl Default for V4l2CaptureConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/video0"),
            resolution: Resolution::HD1080,
            fps: 30,
            buffer_count: DEFAULT_BUFFER_COUNT,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT),
        }
    }
}

impl V4l2CaptureConfig {
    /// Create config for a specific device
    pub fn for_device(path: impl AsRef<Path>) -> Self {
        Self {
            device_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set resolution
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution::new(width, height);
        self
    }

    /// Set frame rate
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }
}

/// MJPEG capture from a V4L2 device
pub struct V4l2Capture {
    config: V4l2CaptureConfig,
    worker: CaptureWorker,
}

impl V4l2Capture {
    pub fn new(config: V4l2CaptureConfig) -> Self {
        Self {
            config,
            worker: CaptureWorker::new(),
        }
    }

    pub fn config(&self) -> &V4l2CaptureConfig {
        &self.config
    }
}

impl CaptureSource for V4l2Capture {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn initialize(&mut self, on_frame: FrameCallback, cancel: CancellationToken) -> Result<()> {
        info!(
            "Starting capture on {:?} at {} MJPEG",
            self.config.device_path, self.config.resolution
        );
        let config = self.config.clone();
        self.worker.spawn("v4l2", cancel, move |ready, state, cancel| {
            let device = match open_device(&config) {
                Ok(device) => device,
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return;
                }
            };
            let stream = match Stream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready.send(Err(AppError::Capture(format!(
                        "Failed to request buffers: {}",
                        e
                    ))));
                    return;
                }
            };
            let _ = ready.send(Ok(()));
            capture_loop(&config, stream, &state, &cancel, on_frame);
        })
    }

    fn state(&self) -> CaptureState {
        self.worker.state()
    }

    fn shutdown(&mut self) {
        info!("Stopping capture");
        self.worker.stop();
    }
}

fn open_device(config: &V4l2CaptureConfig) -> Result<Device> {
    let device = Device::with_path(&config.device_path).map_err(|e| {
        AppError::Capture(format!(
            "Failed to open device {:?}: {}",
            config.device_path, e
        ))
    })?;

    let mut fmt = device
        .format()
        .map_err(|e| AppError::Capture(format!("Failed to get device format: {}", e)))?;
    fmt.width = config.resolution.width;
    fmt.height = config.resolution.height;
    fmt.fourcc = PixelFormat::Mjpeg.to_fourcc();

    let actual = device
        .set_format(&fmt)
        .map_err(|e| AppError::Capture(format!("Failed to set device format: {}", e)))?;
    if actual.fourcc != PixelFormat::Mjpeg.to_fourcc() {
        return Err(AppError::Capture(format!(
            "Device does not deliver MJPEG (got {})",
            actual.fourcc
        )));
    }
    if actual.width != config.resolution.width || actual.height != config.resolution.height {
        warn!(
            "Device adjusted resolution to {}x{}",
            actual.width, actual.height
        );
    }

    if config.fps > 0 {
        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            warn!("Failed to set hardware FPS: {}", e);
        }
    }

    Ok(device)
}

/// errno values meaning the device went away
fn is_device_lost(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENXIO | libc::ENODEV | libc::EIO | libc::EPIPE | libc::ESHUTDOWN)
    )
}

/// Main capture loop (runs on the capture thread)
fn capture_loop(
    config: &V4l2CaptureConfig,
    mut stream: Stream<'_>,
    state: &watch::Sender<CaptureState>,
    cancel: &CancellationToken,
    mut on_frame: FrameCallback,
) {
    stream.set_timeout(config.timeout);
    state.send_replace(CaptureState::Running);
    info!("Capture started");

    let throttler = LogThrottler::with_secs(5);
    let mut frame_number = 0u64;

    while !cancel.is_cancelled() {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                if *state.borrow() != CaptureState::NoSignal {
                    warn!("Capture timeout - no signal?");
                    state.send_replace(CaptureState::NoSignal);
                }
                continue;
            }
            Err(e) if is_device_lost(&e) => {
                error!("Video device lost: {:?} - {}", config.device_path, e);
                state.send_replace(CaptureState::Error);
                return;
            }
            Err(e) => {
                error_throttled!(
                    throttler,
                    &format!("capture_{:?}", e.kind()),
                    "Capture error: {}",
                    e
                );
                continue;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        if used < MIN_FRAME_SIZE {
            warn_throttled!(
                throttler,
                "small_frame",
                "Dropping small frame: {} bytes",
                used
            );
            continue;
        }

        if *state.borrow() == CaptureState::NoSignal {
            state.send_replace(CaptureState::Running);
        }

        frame_number += 1;
        let frame = Arc::new(CameraFrame::new(
            Bytes::copy_from_slice(&buf[..used]),
            frame_number,
        ));
        on_frame(&frame);
    }

    info!("Capture stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_frame() {
        let frame = CameraFrame::new(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]), 3);
        assert_eq!(frame.image_bytes(), 4);
        assert_eq!(frame.frame_number, 3);
        assert!(frame.age() < Duration::from_secs(5));
    }

    #[test]
    fn test_terminal_states() {
        assert!(CaptureState::Error.is_terminal());
        assert!(CaptureState::Finished.is_terminal());
        assert!(!CaptureState::NoSignal.is_terminal());
        assert!(!CaptureState::Running.is_terminal());
    }

    #[test]
    fn test_device_lost_errno() {
        assert!(is_device_lost(&io::Error::from_raw_os_error(libc::ENODEV)));
        assert!(!is_device_lost(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(!is_device_lost(&io::Error::new(io::ErrorKind::TimedOut, "timeout")));
    }

    #[test]
    fn test_missing_device_fails_initialize() {
        let mut capture = V4l2Capture::new(V4l2CaptureConfig::for_device(
            "/nonexistent/video-device",
        ));
        let result = capture.initialize(Box::new(|_| {}), CancellationToken::new());
        assert!(result.is_err());
        assert!(capture.is_error());
        capture.shutdown();
    }

    #[test]
    fn test_config_builder() {
        let config = V4l2CaptureConfig::for_device("/dev/video2")
            .with_resolution(1280, 720)
            .with_fps(60);
        assert_eq!(config.device_path, PathBuf::from("/dev/video2"));
        assert_eq!(config.resolution, Resolution::HD720);
        assert_eq!(config.fps, 60);
        assert_eq!(config.buffer_count, DEFAULT_BUFFER_COUNT);
    }
}
