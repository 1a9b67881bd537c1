//! Video encoder implementations
//!
//! The pipeline hands decoded frames to an [`Encoder`]. The JPEG encoder is
//! the one shipped here; hardware encoders plug in through the same trait.

pub mod jpeg;
pub mod traits;

pub use jpeg::JpegEncoder;
pub use traits::{EncodedFormat, EncodedFrame, Encoder, EncoderConfig};
