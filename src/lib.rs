//! # polyglot-tts
//!
//! A multilingual streaming text-to-speech engine built on the Kokoro model.
//!
//! ## Features
//!
//! - **Mixed-language input**: text is split into language runs (Latin,
//!   Han, kana, Devanagari, Cyrillic) with statistical detection for Latin
//! - **Per-language G2P**: one phonemizer per language, built on first use
//! - **Low-latency streaming**: the first sentence plays alone, later chunks
//!   grow to 2, 4 and then 8 sentences
//! - **Cancellation**: a shared [`CancelToken`] stops synthesis and playback
//!   within one chunk
//! - **Voice blending**: weighted averages of voice embeddings
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! polyglot-tts = { version = "2026.10", features = ["kokoro", "playback"] }
//! ```
//!
//! ```ignore
//! use std::path::PathBuf;
//! use polyglot_tts::{engines::kokoro::load_engine, EngineConfig, SynthesisRequest};
//!
//! let engine = load_engine(&EngineConfig::default())?;
//!
//! let request = SynthesisRequest::new("Hello world. 你好世界。", "af_heart");
//! engine.stream(&request)?;
//!
//! let audio = engine.synthesize_to_memory(&request)?;
//! audio.write_wav(&PathBuf::from("output.wav"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod chunker;
pub mod config;
pub mod engine;
pub mod engines;
pub mod error;
pub mod g2p;
pub mod language;
pub mod playback;
pub mod provision;
pub mod segmenter;
pub mod voices;

use std::io::Cursor;
use std::path::Path;

pub use config::{ChunkSchedule, EngineConfig, EngineConfigBuilder, ExecutionBackend};
pub use engine::{AcousticModel, SynthesisEngine, SynthesisRequest};
pub use error::TtsError;
pub use language::{LanguageProfile, LanguageTable, AUTO_DETECT};
pub use playback::{AudioOutput, AudioSink, CancelToken, PlaybackReport};
pub use provision::ModelProvisioner;
pub use voices::{VoiceEmbedding, VoiceRegistry, VoiceSelection};

/// Output sample rate of the Kokoro model.
pub const SAMPLE_RATE: u32 = 24000;

/// Mono float32 audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio (24000 for Kokoro)
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// An empty buffer means no chunk produced audio.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Scale so the loudest sample sits at `peak`. Silence is left alone.
    pub fn normalize_peak(&mut self, peak: f32) {
        let max = self.samples.iter().fold(0f32, |m, s| m.max(s.abs()));
        if max > f32::EPSILON {
            let gain = peak / max;
            self.samples.iter_mut().for_each(|s| *s *= gain);
        }
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }

    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), TtsError> {
        let mut writer = hound::WavWriter::create(path, self.wav_spec())?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Encode as an in-memory 16-bit PCM WAV, the format API layers return.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, TtsError> {
        let spec = hound::WavSpec {
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
            ..self.wav_spec()
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for &sample in &self.samples {
                let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                writer.write_sample(pcm)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_sample_rate() {
        let audio = AudioBuffer::new(vec![0.0; 12_000], SAMPLE_RATE);
        assert!((audio.duration_secs() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn normalizes_to_requested_peak() {
        let mut audio = AudioBuffer::new(vec![0.1, -0.5, 0.25], SAMPLE_RATE);
        audio.normalize_peak(1.0);
        assert_eq!(audio.samples, vec![0.2, -1.0, 0.5]);

        let mut silence = AudioBuffer::new(vec![0.0; 4], SAMPLE_RATE);
        silence.normalize_peak(1.0);
        assert_eq!(silence.samples, vec![0.0; 4]);
    }

    #[test]
    fn wav_bytes_decode_back_to_pcm() {
        let audio = AudioBuffer::new(vec![0.0, 1.0, -1.0, 2.0], SAMPLE_RATE);
        let bytes = audio.to_wav_bytes().unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0, i16::MAX, -i16::MAX, i16::MAX]);
    }

    #[test]
    fn writes_float_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        AudioBuffer::new(vec![0.25; 10], SAMPLE_RATE)
            .write_wav(&path)
            .unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        assert_eq!(reader.len(), 10);
    }
}
