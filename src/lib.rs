//! kvm-pipeline - MJPEG capture, pooled decode and re-encode
//!
//! Reusable pieces of the capture -> decode -> encode path: a frame pool,
//! a pooled JPEG decoder and the pipeline harness that drives them.

pub mod config;
pub mod error;
pub mod utils;
pub mod video;

pub use error::{AppError, Result};
