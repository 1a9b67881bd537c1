//! JPEG decoding
//!
//! - `codec`: the decompression capability seam
//! - `mjpeg_turbo`: libjpeg-turbo backend (RGB24 or YUV planes)
//! - `jpeg`: pooled decoder that turns compressed frames into `ImageFrame`s

pub mod codec;
pub mod jpeg;
pub mod mjpeg_turbo;

pub use codec::{DecompressorFactory, JpegDecompressor, JpegHeader};
pub use jpeg::{DecodeFailure, DecoderStats, JpegDecoder, JpegDecoderConfig};
pub use mjpeg_turbo::{TurboJpegDecompressor, TurboJpegFactory};
