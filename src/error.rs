use std::path::PathBuf;

/// Errors surfaced by the synthesis engine and its collaborators.
#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Unknown language '{0}'. Call list_languages() to see supported languages.")]
    UnknownLanguage(String),
    #[error("Speed {0} is outside the supported range 0.25-2.0")]
    InvalidSpeed(f32),

    #[error("Model file missing at {0} and downloads are disabled (local-only mode)")]
    ModelMissing(PathBuf),
    #[error("Download of {file} failed: {reason}")]
    Download { file: String, reason: String },
    #[error("Downloaded {file} is {actual} bytes, expected {expected}")]
    IntegrityMismatch {
        file: String,
        expected: u64,
        actual: u64,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`, Windows: https://espeak-ng.org/download"
    )]
    EspeakNotFound,
    #[error("G2P pipeline for language code '{code}' is unavailable: {reason}")]
    G2pUnavailable { code: String, reason: String },
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),

    #[error("Voice '{0}' not found. Call list_voices() to see available voices.")]
    VoiceNotFound(String),
    #[error("Failed to parse voice file: {0}")]
    VoiceParse(String),
    #[error("Invalid voice blend: {0}")]
    InvalidBlend(String),

    #[error("Inference failed: {0}")]
    Inference(String),
    #[cfg(feature = "kokoro")]
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[cfg(feature = "kokoro")]
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Audio output error: {0}")]
    Audio(String),
    #[error("No audio output configured for streaming")]
    NoOutput,
    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
