//! File replay capture source
//!
//! Plays back recorded JPEG frames as if they came from a capture device,
//! which makes the pipeline usable on machines without video hardware.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::capture::{CameraFrame, CaptureSource, CaptureState, CaptureWorker, FrameCallback};
use crate::error::{AppError, Result};

/// Replay configuration
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// A single JPEG file or a directory of `*.jpg` / `*.jpeg` files
    pub path: PathBuf,
    /// Delivery rate (0 = as fast as possible)
    pub fps: u32,
    /// Number of passes over the frames (`None` = loop until cancelled)
    pub loops: Option<u32>,
}

impl ReplayConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            fps: 30,
            loops: Some(1),
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_loops(mut self, loops: Option<u32>) -> Self {
        self.loops = loops;
        self
    }

    fn frame_interval(&self) -> Duration {
        if self.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / self.fps as f64)
        }
    }
}

/// Capture source that replays JPEG files from disk
pub struct FileReplayCapture {
    config: ReplayConfig,
    worker: CaptureWorker,
}

impl FileReplayCapture {
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            worker: CaptureWorker::new(),
        }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }
}

fn is_jpeg_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
            .unwrap_or(false)
}

/// Load every frame up front, sorted by file name
fn load_frames(path: &Path) -> Result<Vec<Bytes>> {
    let files = if path.is_dir() {
        let mut files = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_jpeg_file(p))
            .collect::<Vec<_>>();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    };

    if files.is_empty() {
        return Err(AppError::Capture(format!(
            "No JPEG files found in {:?}",
            path
        )));
    }

    files
        .iter()
        .map(|file| {
            std::fs::read(file)
                .map(Bytes::from)
                .map_err(|e| AppError::Capture(format!("Failed to read {:?}: {}", file, e)))
        })
        .collect()
}

impl CaptureSource for FileReplayCapture {
    fn name(&self) -> &str {
        "replay"
    }

    fn initialize(&mut self, mut on_frame: FrameCallback, cancel: CancellationToken) -> Result<()> {
        info!("Starting replay from {:?}", self.config.path);
        let config = self.config.clone();
        self.worker.spawn("replay", cancel, move |ready, state, cancel| {
            let frames = match load_frames(&config.path) {
                Ok(frames) => frames,
                Err(e) => {
                    let _ = ready.send(Err(e));
                    return;
                }
            };
            info!("Loaded {} replay frames", frames.len());
            let _ = ready.send(Ok(()));
            state.send_replace(CaptureState::Running);

            let interval = config.frame_interval();
            let mut frame_number = 0u64;
            let mut pass = 0u32;
            let mut next_due = Instant::now();

            'replay: while config.loops.map_or(true, |loops| pass < loops) {
                for image in &frames {
                    if cancel.is_cancelled() {
                        break 'replay;
                    }
                    let now = Instant::now();
                    if next_due > now {
                        std::thread::sleep(next_due - now);
                    }
                    next_due = Instant::now().max(next_due) + interval;

                    frame_number += 1;
                    on_frame(&Arc::new(CameraFrame::new(image.clone(), frame_number)));
                }
                pass += 1;
                debug!("Replay pass {} complete", pass);
            }

            if cancel.is_cancelled() {
                info!("Replay stopped after {} frames", frame_number);
            } else {
                info!("Replay finished after {} frames", frame_number);
                state.send_replace(CaptureState::Finished);
            }
        })
    }

    fn state(&self) -> CaptureState {
        self.worker.state()
    }

    fn shutdown(&mut self) {
        info!("Stopping replay");
        self.worker.stop();
    }
}
