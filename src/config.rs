use std::collections::HashMap;
use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::TtsError;

/// Release that hosts the Kokoro v1.0 ONNX files and the shared voice archive.
pub const DEFAULT_DOWNLOAD_BASE_URL: &str =
    "https://github.com/thewh1teagle/kokoro-onnx/releases/download/model-files-v1.0";

/// Hardware target requested for the acoustic model session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionBackend {
    #[default]
    Cuda,
    #[serde(alias = "dml")]
    DirectMl,
    CoreMl,
    Cpu,
}

impl std::fmt::Display for ExecutionBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Cuda => "CUDA",
            Self::DirectMl => "DirectML",
            Self::CoreMl => "CoreML",
            Self::Cpu => "CPU",
        };
        f.write_str(name)
    }
}

/// Sentence counts per chunk: the first chunk, then each growth step, then
/// the steady-state size for every chunk after that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSchedule {
    pub first: usize,
    pub growth: Vec<usize>,
    pub steady: usize,
}

impl Default for ChunkSchedule {
    fn default() -> Self {
        Self {
            first: 1,
            growth: vec![2, 4],
            steady: 8,
        }
    }
}

impl ChunkSchedule {
    /// Target sentence count for the chunk at `index` (zero-based).
    pub fn target(&self, index: usize) -> usize {
        let target = match index {
            0 => self.first,
            n => self.growth.get(n - 1).copied().unwrap_or(self.steady),
        };
        target.max(1)
    }
}

/// Engine-wide settings supplied by the host application.
///
/// Every field has a default, so a JSON file only needs the keys it overrides:
///
/// ```json
/// { "model_dir": "models/kokoro", "model_file": "kokoro-v1.0.int8.onnx", "local_only": true }
/// ```
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the ONNX model and the voice archive.
    pub model_dir: PathBuf,
    pub model_file: String,
    pub voices_file: String,
    /// Base URL the model and voice files are fetched from when missing.
    pub download_base_url: String,
    /// Never touch the network; fail if the model files are absent.
    pub local_only: bool,
    /// Preferred execution backend; CPU is always the fallback.
    pub execution_backend: ExecutionBackend,
    /// Number of CPU threads for inference. `None` uses the ORT default.
    pub num_threads: Option<usize>,
    /// Where to persist the optimized ONNX graph between runs.
    pub optimized_model_cache_path: Option<PathBuf>,
    /// Language used for short Latin runs and failed detections.
    pub default_language: String,
    /// Latin runs with fewer letters than this skip statistical detection.
    pub min_detection_letters: usize,
    /// Maximum number of synthesized buffers waiting for playback.
    pub queue_capacity: usize,
    pub chunk_schedule: ChunkSchedule,
    pub espeak_bin: Option<PathBuf>,
    pub espeak_data: Option<PathBuf>,
    /// Known byte sizes for downloaded files, keyed by file name.
    pub expected_sizes: HashMap<String, u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/kokoro"),
            model_file: "kokoro-v1.0.fp16.onnx".to_string(),
            voices_file: "voices-v1.0.bin".to_string(),
            download_base_url: DEFAULT_DOWNLOAD_BASE_URL.to_string(),
            local_only: false,
            execution_backend: ExecutionBackend::default(),
            num_threads: None,
            optimized_model_cache_path: None,
            default_language: "English (US)".to_string(),
            min_detection_letters: 12,
            queue_capacity: 20,
            chunk_schedule: ChunkSchedule::default(),
            espeak_bin: None,
            espeak_data: None,
            expected_sizes: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load settings from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, TtsError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| TtsError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TtsError> {
        if self.model_file.trim().is_empty() {
            return Err(TtsError::Config("model_file must not be empty".to_string()));
        }
        if self.voices_file.trim().is_empty() {
            return Err(TtsError::Config("voices_file must not be empty".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(TtsError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_file)
    }

    pub fn voices_path(&self) -> PathBuf {
        self.model_dir.join(&self.voices_file)
    }
}
