//! The synthesis engine: segmentation, G2P, chunking and acoustic inference
//! wired together behind the two public entry points, [`SynthesisEngine::stream`]
//! and [`SynthesisEngine::synthesize_to_memory`].

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::chunker::Chunker;
use crate::config::EngineConfig;
use crate::error::TtsError;
use crate::g2p::{EspeakConfig, EspeakFactory, G2pCache, PhonemizerFactory};
use crate::language::{LanguageProfile, LanguageTable, AUTO_DETECT};
use crate::playback::{self, AudioOutput, CancelToken, PlaybackMessage, PlaybackReport};
use crate::provision;
use crate::segmenter::{normalize_whitespace, DetectLanguage, LanguageSegmenter, TextSegment};
use crate::voices::{VoiceEmbedding, VoiceRegistry, VoiceSelection};
use crate::AudioBuffer;

pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 2.0;

/// Opaque neural acoustic model: phonemes + voice + speed in, samples out.
///
/// Calls are never concurrent; the engine serializes access.
pub trait AcousticModel: Send {
    fn sample_rate(&self) -> u32;

    fn infer(
        &mut self,
        phonemes: &str,
        voice: &VoiceEmbedding,
        speed: f32,
    ) -> Result<Vec<f32>, TtsError>;
}

/// One call into the engine.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    /// A language name from [`SynthesisEngine::list_languages`], or [`AUTO_DETECT`].
    pub language: String,
    pub voice: VoiceSelection,
    pub speed: f32,
    /// Output device index for streaming; `None` is the system default.
    pub device: Option<usize>,
    pub cancel: Option<CancelToken>,
}

impl SynthesisRequest {
    /// Auto-detected language at normal speed on the default device.
    pub fn new(text: impl Into<String>, voice: impl Into<VoiceSelection>) -> Self {
        Self {
            text: text.into(),
            language: AUTO_DETECT.to_string(),
            voice: voice.into(),
            speed: 1.0,
            device: None,
            cancel: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_device(mut self, device: usize) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// A request after validation: segments to speak and the voice to use.
struct PreparedRequest {
    segments: Vec<TextSegment>,
    voice: Arc<VoiceEmbedding>,
    speed: f32,
}

pub struct SynthesisEngine<M: AcousticModel> {
    model: Mutex<M>,
    sample_rate: u32,
    voices: VoiceRegistry,
    languages: LanguageTable,
    segmenter: LanguageSegmenter,
    g2p: G2pCache,
    chunker: Chunker,
    queue_capacity: usize,
    model_dir: PathBuf,
    output: Option<Arc<dyn AudioOutput>>,
    // One request at a time per model session; later callers wait here.
    request_gate: Mutex<()>,
}

impl<M: AcousticModel> SynthesisEngine<M> {
    /// Build an engine around a loaded model and voice registry.
    ///
    /// Phonemization goes through espeak-ng as configured; no output device is
    /// attached until [`with_output`](Self::with_output) is called.
    pub fn new(model: M, voices: VoiceRegistry, config: &EngineConfig) -> Result<Self, TtsError> {
        config.validate()?;
        let languages = LanguageTable::builtin();
        let default_language = languages.require(&config.default_language)?;
        let espeak = EspeakConfig {
            bin_path: config.espeak_bin.clone(),
            data_path: config.espeak_data.clone(),
        };

        Ok(Self {
            sample_rate: model.sample_rate(),
            model: Mutex::new(model),
            voices,
            languages,
            segmenter: LanguageSegmenter::new(
                languages,
                default_language,
                config.min_detection_letters,
            ),
            g2p: G2pCache::new(languages, Box::new(EspeakFactory::new(espeak))),
            chunker: Chunker::new(config.chunk_schedule.clone()),
            queue_capacity: config.queue_capacity,
            model_dir: config.model_dir.clone(),
            output: None,
            request_gate: Mutex::new(()),
        })
    }

    pub fn with_phonemizer_factory(mut self, factory: Box<dyn PhonemizerFactory>) -> Self {
        self.g2p = G2pCache::new(self.languages, factory);
        self
    }

    pub fn with_detector(mut self, detector: Option<Box<dyn DetectLanguage>>) -> Self {
        self.segmenter = self.segmenter.with_detector(detector);
        self
    }

    pub fn with_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn voices(&self) -> &VoiceRegistry {
        &self.voices
    }

    /// Selectable language names, starting with the auto-detect entry.
    pub fn list_languages(&self) -> Vec<String> {
        self.languages.names()
    }

    /// Voices for a language name, or every voice for `None` / auto-detect.
    ///
    /// Unknown names and languages without voices list everything rather
    /// than nothing.
    pub fn list_voices(&self, language: Option<&str>) -> Vec<String> {
        let code = language
            .and_then(|name| self.languages.by_name(name))
            .map(|profile| profile.code);
        self.voices.list(code)
    }

    /// Model files available in the configured model directory.
    pub fn list_models(&self) -> Result<Vec<String>, TtsError> {
        provision::list_models(&self.model_dir)
    }

    /// Synthesize one chunk of single-language text.
    ///
    /// Returns `None` when there is nothing to play: empty phonemization, an
    /// unavailable G2P backend, or a failed inference. Callers skip the chunk.
    pub fn synthesize(
        &self,
        text: &str,
        language: &LanguageProfile,
        voice: &VoiceEmbedding,
        speed: f32,
    ) -> Option<Vec<f32>> {
        self.synthesize_chunk(text, language, voice, speed, &CancelToken::new())
    }

    fn synthesize_chunk(
        &self,
        text: &str,
        language: &LanguageProfile,
        voice: &VoiceEmbedding,
        speed: f32,
        cancel: &CancelToken,
    ) -> Option<Vec<f32>> {
        let pipeline = match self.g2p.get_pipeline(language.code) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::warn!("Skipping chunk: {e}");
                return None;
            }
        };

        let phonemes = match pipeline.phonemize(text) {
            Ok(phonemes) if phonemes.trim().is_empty() => {
                log::debug!("No phonemes for {text:?}, skipping");
                return None;
            }
            Ok(phonemes) => phonemes,
            Err(e) => {
                log::warn!("Skipping chunk, {} failed: {e}", pipeline.name());
                return None;
            }
        };

        if cancel.is_cancelled() {
            return None;
        }

        match self.model.lock().infer(&phonemes, voice, speed) {
            Ok(samples) if samples.is_empty() => None,
            Ok(samples) => {
                log::debug!(
                    "Synthesized {} samples for {} chars of {}",
                    samples.len(),
                    text.chars().count(),
                    language.name
                );
                Some(samples)
            }
            Err(e) => {
                log::warn!("Skipping chunk, inference failed: {e}");
                None
            }
        }
    }

    fn prepare(&self, request: &SynthesisRequest) -> Result<PreparedRequest, TtsError> {
        if !(MIN_SPEED..=MAX_SPEED).contains(&request.speed) {
            return Err(TtsError::InvalidSpeed(request.speed));
        }
        let language = if request.language == AUTO_DETECT {
            None
        } else {
            Some(self.languages.require(&request.language)?)
        };
        let voice = self.voices.resolve(&request.voice)?;

        let text = normalize_whitespace(&request.text);
        let segments = self.segmenter.segment(&text, language);
        log::debug!(
            "Segmented into {:?}",
            segments
                .iter()
                .map(|s| s.language.name)
                .collect::<Vec<_>>()
        );

        Ok(PreparedRequest {
            segments,
            voice,
            speed: request.speed,
        })
    }

    /// Synthesize the whole request into one buffer without playing it.
    ///
    /// Chunks that fail are skipped. If nothing produced audio the buffer is
    /// empty; that is a soft failure for the caller to report, not an error.
    pub fn synthesize_to_memory(&self, request: &SynthesisRequest) -> Result<AudioBuffer, TtsError> {
        let _gate = self.request_gate.lock();
        let job = self.prepare(request)?;
        let cancel = request.cancel.clone().unwrap_or_default();

        let mut samples = Vec::new();
        let mut chunks = 0usize;
        'segments: for segment in &job.segments {
            for chunk in self.chunker.chunks(&segment.text) {
                if cancel.is_cancelled() {
                    break 'segments;
                }
                if let Some(audio) =
                    self.synthesize_chunk(&chunk, segment.language, &job.voice, job.speed, &cancel)
                {
                    samples.extend_from_slice(&audio);
                    chunks += 1;
                }
            }
        }

        if samples.is_empty() {
            log::warn!("No audio produced for {} segments", job.segments.len());
        } else {
            log::info!("Synthesized {chunks} chunks ({} samples)", samples.len());
        }
        Ok(AudioBuffer::new(samples, self.sample_rate))
    }

    /// Speak the request on the attached output, blocking until playback ends
    /// or the request's cancel token is raised.
    ///
    /// A producer thread synthesizes chunks in order into a bounded queue and a
    /// consumer thread plays them on one open stream. Both threads are joined
    /// before this returns. Blank text returns an empty report and leaves the
    /// output closed.
    pub fn stream(&self, request: &SynthesisRequest) -> Result<PlaybackReport, TtsError> {
        let output = self.output.as_deref().ok_or(TtsError::NoOutput)?;
        let _gate = self.request_gate.lock();
        let job = self.prepare(request)?;
        if job.segments.is_empty() {
            log::debug!("Nothing to speak; output left closed");
            return Ok(PlaybackReport::default());
        }
        let cancel = request.cancel.clone().unwrap_or_default();
        let (tx, rx) = crossbeam_channel::bounded(self.queue_capacity);

        let (job, cancel_ref) = (&job, &cancel);
        let (produced, played) = thread::scope(|scope| {
            let producer = scope.spawn(move || self.produce(job, cancel_ref, tx));
            let consumer = scope.spawn(move || {
                playback::consume(rx, output, request.device, self.sample_rate, cancel_ref)
            });
            (producer.join(), consumer.join())
        });

        let produced = produced.map_err(|_| TtsError::WorkerPanicked("producer"))?;
        let report = played.map_err(|_| TtsError::WorkerPanicked("consumer"))??;
        if produced == 0 && !report.cancelled {
            log::warn!("No audio produced; nothing was played");
        }
        Ok(report)
    }

    /// Producer loop. Returns how many buffers were queued.
    fn produce(
        &self,
        job: &PreparedRequest,
        cancel: &CancelToken,
        tx: Sender<PlaybackMessage>,
    ) -> usize {
        let mut queued = 0usize;
        'segments: for segment in &job.segments {
            if cancel.is_cancelled() {
                break;
            }
            for chunk in self.chunker.chunks(&segment.text) {
                if cancel.is_cancelled() {
                    break 'segments;
                }
                let Some(audio) =
                    self.synthesize_chunk(&chunk, segment.language, &job.voice, job.speed, cancel)
                else {
                    continue;
                };
                if cancel.is_cancelled() {
                    break 'segments;
                }
                if tx.send(PlaybackMessage::Audio(audio)).is_err() {
                    log::debug!("Playback stopped early; producer exiting");
                    return queued;
                }
                queued += 1;
            }
        }
        let _ = tx.send(PlaybackMessage::EndOfStream);
        queued
    }
}
