//! Kokoro-82M acoustic model backend.
//!
//! Runs the Kokoro ONNX model through ONNX Runtime. Phonemization happens
//! upstream in [`crate::g2p`] via espeak-ng, so **espeak-ng** must be installed:
//! - **Linux**: `sudo apt-get install espeak-ng`
//! - **macOS**: `brew install espeak-ng`
//! - **Windows**: Download installer from <https://espeak-ng.org/download>
//!
//! # Model Directory Layout
//!
//! ```text
//! models/kokoro/
//! ├── kokoro-v1.0.fp16.onnx   # Acoustic model (downloaded on first use)
//! ├── voices-v1.0.bin         # Voice style archive (.npz format)
//! └── config.json             # Optional vocabulary override
//! ```
//!
//! Both files come from
//! <https://github.com/thewh1teagle/kokoro-onnx/releases/tag/model-files-v1.0>
//! unless [`EngineConfig::local_only`] is set.
//!
//! # Voice Naming Convention
//!
//! Voices follow `{language_code}{gender}_{name}`, so `af_heart` is an American
//! English female voice and `zf_xiaobei` a Mandarin one. The language code is
//! what [`SynthesisEngine::list_voices`] filters on.
//!
//! # Example
//!
//! ```rust,no_run
//! use polyglot_tts::{engines::kokoro::load_engine, EngineConfig, SynthesisRequest};
//!
//! let engine = load_engine(&EngineConfig::default())?;
//! let request = SynthesisRequest::new("Hello from Emma!", "bf_emma")
//!     .with_language("English (UK)")
//!     .with_speed(0.9);
//! let audio = engine.synthesize_to_memory(&request)?;
//! println!("Generated {} samples at {}Hz", audio.len(), audio.sample_rate);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod model;
pub mod vocab;

pub use model::KokoroModel;

use crate::config::EngineConfig;
use crate::engine::SynthesisEngine;
use crate::error::TtsError;
use crate::provision::ModelProvisioner;
use crate::voices::VoiceRegistry;

/// Provision the model files, open the Kokoro session and build an engine.
///
/// With the `playback` feature the engine streams to the system audio output.
pub fn load_engine(config: &EngineConfig) -> Result<SynthesisEngine<KokoroModel>, TtsError> {
    ModelProvisioner::from_config(config).ensure_model_present()?;
    let model = KokoroModel::load(config)?;
    let voices = VoiceRegistry::load(&config.voices_path())?;
    let engine = SynthesisEngine::new(model, voices, config)?;

    #[cfg(feature = "playback")]
    let engine = engine.with_output(std::sync::Arc::new(crate::playback::RodioOutput));

    Ok(engine)
}
