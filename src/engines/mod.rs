//! Acoustic model backends.
//!
//! Enable backends via Cargo features:
//! - `kokoro` - Kokoro-82M (ONNX format, espeak-ng required)

#[cfg(feature = "kokoro")]
pub mod kokoro;
