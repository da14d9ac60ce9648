use std::path::Path;

use ndarray::Array2;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    DirectMLExecutionProvider, ExecutionProviderDispatch,
};
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use super::vocab::{self, Vocab};
use crate::config::{EngineConfig, ExecutionBackend};
use crate::engine::AcousticModel;
use crate::error::TtsError;
use crate::voices::{VoiceEmbedding, STYLE_DIM};
use crate::SAMPLE_RATE;

/// Maximum number of phoneme tokens per inference call (before padding).
pub const MAX_PHONEME_LEN: usize = 510;

/// Crossfade (in samples) used when concatenating sub-chunk audio.
const CHUNK_CROSSFADE_SAMPLES: usize = 240; // 10ms @ 24kHz

/// Kokoro ONNX session plus the vocabulary that feeds it.
pub struct KokoroModel {
    session: Session,
    vocab: Vocab,
    /// Detected input name: "input_ids" or "tokens"
    tokens_input_name: String,
    /// True if the speed input expects int32, false for float32
    speed_is_int32: bool,
}

impl KokoroModel {
    /// Open the model file named by `config`.
    ///
    /// The preferred execution backend is tried first; if it cannot be
    /// registered the session is rebuilt on CPU. A `config.json` next to the
    /// model supplies the vocabulary when present.
    pub fn load(config: &EngineConfig) -> Result<Self, TtsError> {
        let onnx_path = config.model_path();
        if !onnx_path.is_file() {
            return Err(TtsError::ModelMissing(onnx_path));
        }
        log::info!("Loading Kokoro model from {}", onnx_path.display());

        let session = init_session_with_fallback(&onnx_path, config)?;

        let tokens_input_name = detect_tokens_input(&session);
        let speed_is_int32 = detect_speed_type(&session);
        log::info!(
            "Detected: tokens_input='{}', speed_is_int32={}",
            tokens_input_name,
            speed_is_int32
        );

        let config_path = config.model_dir.join("config.json");
        let vocab = if config_path.exists() {
            log::info!("Loading vocab from config.json");
            vocab::load_vocab(&config_path)?
        } else {
            log::warn!("config.json not found, using built-in vocab");
            vocab::hardcoded_vocab()
        };

        Ok(Self {
            session,
            vocab,
            tokens_input_name,
            speed_is_int32,
        })
    }

    /// Run ONNX inference on a single run of phoneme token IDs.
    fn run(
        &mut self,
        tokens: &[i64],
        style: &[f32; STYLE_DIM],
        speed: f32,
    ) -> Result<Vec<f32>, TtsError> {
        let seq_len = tokens.len() + 2; // +2 for padding tokens

        // Build tokens tensor: [[0, t1..tN, 0]]
        let mut padded = vec![0i64; seq_len];
        padded[1..seq_len - 1].copy_from_slice(tokens);
        let tokens_arr = Array2::from_shape_vec((1, seq_len), padded)?;
        let style_view = ndarray::ArrayView2::from_shape((1, STYLE_DIM), style.as_slice())?;

        let output = if self.speed_is_int32 {
            let speed_arr = ndarray::arr1(&[speed.round().max(1.0) as i32]);
            let inputs = inputs![
                self.tokens_input_name.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ];
            self.session.run(inputs)?
        } else {
            let speed_arr = ndarray::arr1(&[speed]);
            let inputs = inputs![
                self.tokens_input_name.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed_arr.view())?,
            ];
            self.session.run(inputs)?
        };

        let (_, waveform) = output
            .iter()
            .next()
            .ok_or_else(|| TtsError::Inference("model produced no outputs".to_string()))?;
        let waveform = waveform.try_extract_array::<f32>()?;
        Ok(waveform.iter().copied().collect())
    }
}

impl AcousticModel for KokoroModel {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    fn infer(
        &mut self,
        phonemes: &str,
        voice: &VoiceEmbedding,
        speed: f32,
    ) -> Result<Vec<f32>, TtsError> {
        let ids = vocab::tokenize(&self.vocab, phonemes);
        if ids.is_empty() {
            log::warn!("No known phoneme tokens in {phonemes:?}");
            return Ok(Vec::new());
        }

        // One style row for the whole utterance, so sub-chunks keep the same prosody.
        let style = *voice.style_for(ids.len());
        let pieces = if ids.len() > MAX_PHONEME_LEN {
            log::debug!(
                "Phoneme sequence exceeded limit ({} > {}), splitting",
                ids.len(),
                MAX_PHONEME_LEN
            );
            split_chunks(&ids)
        } else {
            vec![ids]
        };

        let mut combined = Vec::new();
        for piece in &pieces {
            let audio = self.run(piece, &style, speed)?;
            if audio.is_empty() {
                continue;
            }
            if combined.is_empty() {
                combined = audio;
            } else {
                append_with_crossfade(&mut combined, &audio, CHUNK_CROSSFADE_SAMPLES);
            }
        }
        Ok(combined)
    }
}

fn execution_provider(backend: ExecutionBackend) -> ExecutionProviderDispatch {
    match backend {
        ExecutionBackend::Cuda => CUDAExecutionProvider::default().build().error_on_failure(),
        ExecutionBackend::DirectMl => DirectMLExecutionProvider::default()
            .build()
            .error_on_failure(),
        ExecutionBackend::CoreMl => CoreMLExecutionProvider::default().build().error_on_failure(),
        ExecutionBackend::Cpu => CPUExecutionProvider::default().build(),
    }
}

/// Build a session on the configured backend, retrying on CPU if that fails.
fn init_session_with_fallback(onnx_path: &Path, config: &EngineConfig) -> Result<Session, TtsError> {
    with_cpu_fallback(config.execution_backend, |backend| {
        init_session(onnx_path, backend, config)
    })
}

/// Run `init` on `preferred`; on failure, run it once more on CPU.
///
/// A CPU preference is tried exactly once.
fn with_cpu_fallback<T>(
    preferred: ExecutionBackend,
    mut init: impl FnMut(ExecutionBackend) -> Result<T, TtsError>,
) -> Result<T, TtsError> {
    if preferred == ExecutionBackend::Cpu {
        return init(ExecutionBackend::Cpu);
    }
    match init(preferred) {
        Ok(value) => {
            log::info!("Kokoro session running on {preferred}");
            Ok(value)
        }
        Err(e) => {
            log::warn!("{preferred} execution backend unavailable ({e}); falling back to CPU");
            init(ExecutionBackend::Cpu)
        }
    }
}

/// Initialize an ONNX session with optional on-disk graph caching.
///
/// The first load runs Level3 graph optimization and serialises the result to
/// `optimized_model_cache_path`. Later loads read the pre-optimized file with
/// optimization disabled, which cuts cold start to under a second.
fn init_session(
    onnx_path: &Path,
    backend: ExecutionBackend,
    config: &EngineConfig,
) -> Result<Session, TtsError> {
    let cache_path = config.optimized_model_cache_path.as_deref();
    let (load_path, opt_level, write_cache) = match cache_path {
        Some(cache) if cache.exists() => {
            log::info!("Loading pre-optimized Kokoro graph from {}", cache.display());
            (cache, GraphOptimizationLevel::Disable, None)
        }
        Some(cache) => {
            log::info!(
                "First load: running Level3 optimization; saving graph to {}",
                cache.display()
            );
            (onnx_path, GraphOptimizationLevel::Level3, Some(cache))
        }
        None => (onnx_path, GraphOptimizationLevel::Level3, None),
    };

    let mut builder = Session::builder()?
        .with_optimization_level(opt_level)?
        .with_execution_providers([execution_provider(backend)])?
        .with_parallel_execution(true)?;

    if let Some(cache) = write_cache {
        builder = builder.with_optimized_model_path(cache)?;
    }

    if let Some(threads) = config.num_threads {
        builder = builder
            .with_intra_threads(threads)?
            .with_inter_threads(threads)?;
    }

    Ok(builder.commit_from_file(load_path)?)
}

/// Detect the token input name ("input_ids" or "tokens") from session inputs.
fn detect_tokens_input(session: &Session) -> String {
    session
        .inputs()
        .iter()
        .map(|input| input.name())
        .find(|name| *name == "input_ids" || *name == "tokens")
        .unwrap_or("input_ids")
        .to_string()
}

/// Detect whether the speed input expects int32 (true) or float32 (false).
fn detect_speed_type(session: &Session) -> bool {
    session
        .inputs()
        .iter()
        .find(|input| input.name() == "speed")
        .map(|input| {
            let type_str = format!("{:?}", input.dtype());
            type_str.contains("Int32") || type_str.contains("int32")
        })
        .unwrap_or(false)
}

/// Split phoneme IDs into runs of at most `MAX_PHONEME_LEN`, preferring to
/// break just after punctuation.
fn split_chunks(ids: &[i64]) -> Vec<Vec<i64>> {
    // Punctuation IDs: ';':1 ':':2 ',':3 '.':4 '!':5 '?':6
    const PUNCT_IDS: &[i64] = &[1, 2, 3, 4, 5, 6];

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < ids.len() {
        let end = (start + MAX_PHONEME_LEN).min(ids.len());
        if end == ids.len() {
            chunks.push(ids[start..end].to_vec());
            break;
        }

        let split = ids[start..end]
            .iter()
            .rposition(|id| PUNCT_IDS.contains(id))
            .map(|i| start + i + 1)
            .unwrap_or(end);

        chunks.push(ids[start..split].to_vec());
        start = split;
    }
    chunks
}

fn append_with_crossfade(dst: &mut Vec<f32>, src: &[f32], crossfade_samples: usize) {
    let overlap = crossfade_samples.min(dst.len()).min(src.len());
    let dst_start = dst.len() - overlap;
    for i in 0..overlap {
        let t = (i + 1) as f32 / (overlap as f32 + 1.0);
        dst[dst_start + i] = dst[dst_start + i] * (1.0 - t) + src[i] * t;
    }
    dst.extend_from_slice(&src[overlap..]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_sequences_are_not_split() {
        let ids = vec![50i64; 100];
        assert_eq!(split_chunks(&ids), vec![ids.clone()]);
    }

    #[test]
    fn long_sequences_split_after_punctuation() {
        let mut ids = vec![50i64; 700];
        ids[299] = 4; // '.'
        let chunks = split_chunks(&ids);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 300);
        assert_eq!(*chunks[0].last().unwrap(), 4);
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 700);
    }

    #[test]
    fn long_sequences_without_punctuation_split_at_limit() {
        let chunks = split_chunks(&vec![50i64; 1200]);
        let lens: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![MAX_PHONEME_LEN, MAX_PHONEME_LEN, 180]);
    }

    #[test]
    fn crossfade_blends_overlap_and_keeps_length() {
        let mut dst = vec![1.0f32; 10];
        append_with_crossfade(&mut dst, &[0.0f32; 10], 4);
        assert_eq!(dst.len(), 16);
        assert!(dst[6] < 1.0 && dst[6] > 0.0);
        assert!(dst[9] < dst[6]);
        assert_eq!(dst[15], 0.0);
    }

    #[test]
    fn failing_backend_falls_back_to_cpu_once() {
        let mut attempts = Vec::new();
        let result = with_cpu_fallback(ExecutionBackend::Cuda, |backend| {
            attempts.push(backend);
            match backend {
                ExecutionBackend::Cpu => Ok("cpu session"),
                other => Err(TtsError::Inference(format!("{other} missing"))),
            }
        });
        assert_eq!(result.unwrap(), "cpu session");
        assert_eq!(attempts, vec![ExecutionBackend::Cuda, ExecutionBackend::Cpu]);
    }

    #[test]
    fn working_backend_is_kept() {
        let mut attempts = Vec::new();
        let result = with_cpu_fallback(ExecutionBackend::CoreMl, |backend| {
            attempts.push(backend);
            Ok(backend)
        });
        assert_eq!(result.unwrap(), ExecutionBackend::CoreMl);
        assert_eq!(attempts, vec![ExecutionBackend::CoreMl]);
    }

    #[test]
    fn cpu_preference_never_retries() {
        let mut attempts = Vec::new();
        let result: Result<(), TtsError> = with_cpu_fallback(ExecutionBackend::Cpu, |backend| {
            attempts.push(backend);
            Err(TtsError::Inference("no cpu either".to_string()))
        });
        assert!(matches!(result, Err(TtsError::Inference(_))));
        assert_eq!(attempts, vec![ExecutionBackend::Cpu]);
    }

    #[test]
    fn missing_model_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::EngineConfigBuilder::default()
            .model_dir(dir.path())
            .build()
            .unwrap();
        assert!(matches!(
            KokoroModel::load(&config),
            Err(TtsError::ModelMissing(_))
        ));
    }
}
