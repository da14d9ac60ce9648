//! Voice style embeddings and the registry that serves them.
//!
//! Kokoro voices ship as one `.npz` archive where every entry is a float32
//! `[N, 256]` array named after the voice (`af_heart.npy`). Row `i` is the
//! style vector to use for an utterance of `i` phoneme tokens.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::Arc;

use crate::error::TtsError;

/// Style vector dimension for Kokoro.
pub const STYLE_DIM: usize = 256;

/// One voice: a style vector per phoneme-sequence length.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceEmbedding {
    styles: Vec<[f32; STYLE_DIM]>,
}

impl VoiceEmbedding {
    pub fn new(styles: Vec<[f32; STYLE_DIM]>) -> Result<Self, TtsError> {
        if styles.is_empty() {
            return Err(TtsError::VoiceParse(
                "voice embedding has no style rows".to_string(),
            ));
        }
        Ok(Self { styles })
    }

    /// Style vector for an utterance of `token_count` tokens.
    ///
    /// The index is clamped to the valid range, so any count is safe.
    pub fn style_for(&self, token_count: usize) -> &[f32; STYLE_DIM] {
        let clamped = token_count.min(self.styles.len() - 1);
        &self.styles[clamped]
    }

    pub fn rows(&self) -> usize {
        self.styles.len()
    }
}

/// Which voice a request speaks with.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceSelection {
    /// A voice from the registry, e.g. `af_heart`.
    Named(String),
    /// A caller-supplied embedding.
    Embedding(VoiceEmbedding),
    /// Weighted mix of registry voices, e.g. `[("af_heart", 0.7), ("bf_emma", 0.3)]`.
    Blend(Vec<(String, f32)>),
}

impl From<&str> for VoiceSelection {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for VoiceSelection {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<VoiceEmbedding> for VoiceSelection {
    fn from(embedding: VoiceEmbedding) -> Self {
        Self::Embedding(embedding)
    }
}

/// All voices available to the engine, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct VoiceRegistry {
    voices: BTreeMap<String, Arc<VoiceEmbedding>>,
}

impl VoiceRegistry {
    /// Load every voice from a `.npz` archive on disk.
    pub fn load(path: &Path) -> Result<Self, TtsError> {
        let file = File::open(path)?;
        let registry = Self::from_reader(file)?;
        log::info!(
            "Loaded {} voices from {}",
            registry.voices.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Load voices from any seekable `.npz` stream.
    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self, TtsError> {
        let mut zip = zip::ZipArchive::new(reader)
            .map_err(|e| TtsError::VoiceParse(format!("Failed to open zip archive: {e}")))?;

        let mut voices = BTreeMap::new();
        for i in 0..zip.len() {
            let mut entry = zip
                .by_index(i)
                .map_err(|e| TtsError::VoiceParse(format!("Failed to read zip entry {i}: {e}")))?;

            let raw_name = entry.name().to_string();
            if raw_name.ends_with('/') {
                continue;
            }
            let voice_name = raw_name.trim_end_matches(".npy").to_string();
            if voice_name.is_empty() {
                continue;
            }

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| TtsError::VoiceParse(format!("Failed to read {raw_name}: {e}")))?;

            let embedding = VoiceEmbedding::new(parse_npy(&data, &raw_name)?)?;
            voices.insert(voice_name, Arc::new(embedding));
        }

        Ok(Self { voices })
    }

    pub fn from_embeddings<I>(embeddings: I) -> Self
    where
        I: IntoIterator<Item = (String, VoiceEmbedding)>,
    {
        Self {
            voices: embeddings
                .into_iter()
                .map(|(name, embedding)| (name, Arc::new(embedding)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Voice names in sorted order, optionally restricted to one language code.
    ///
    /// Voice names start with their language code (`af_heart` is American
    /// English). When no voice matches the code, every voice is returned so
    /// callers always have something to pick from.
    pub fn list(&self, language_code: Option<&str>) -> Vec<String> {
        let all = self.voices.keys();
        let Some(code) = language_code else {
            return all.cloned().collect();
        };
        let matching: Vec<String> = all.filter(|name| name.starts_with(code)).cloned().collect();
        if matching.is_empty() {
            self.voices.keys().cloned().collect()
        } else {
            matching
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<VoiceEmbedding>, TtsError> {
        self.voices
            .get(name)
            .cloned()
            .ok_or_else(|| TtsError::VoiceNotFound(name.to_string()))
    }

    /// Weighted average of registry voices, normalized by the total weight.
    ///
    /// Voices of different lengths are blended over their common prefix.
    pub fn blend(&self, weights: &[(String, f32)]) -> Result<VoiceEmbedding, TtsError> {
        if weights.is_empty() {
            return Err(TtsError::InvalidBlend("no voices given".to_string()));
        }
        if let Some((name, weight)) = weights.iter().find(|(_, w)| !w.is_finite() || *w < 0.0) {
            return Err(TtsError::InvalidBlend(format!(
                "weight {weight} for '{name}' must be a non-negative number"
            )));
        }
        let total: f32 = weights.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Err(TtsError::InvalidBlend(
                "weights must not all be zero".to_string(),
            ));
        }

        let parts = weights
            .iter()
            .map(|(name, weight)| Ok((self.get(name)?, weight / total)))
            .collect::<Result<Vec<_>, TtsError>>()?;

        let rows = parts.iter().map(|(voice, _)| voice.rows()).min().unwrap_or(0);
        let mut styles = vec![[0f32; STYLE_DIM]; rows];
        for (voice, weight) in &parts {
            for (out, row) in styles.iter_mut().zip(&voice.styles) {
                for (o, v) in out.iter_mut().zip(row) {
                    *o += v * weight;
                }
            }
        }

        VoiceEmbedding::new(styles)
    }

    /// Resolve a request's voice selection to an embedding.
    pub fn resolve(&self, selection: &VoiceSelection) -> Result<Arc<VoiceEmbedding>, TtsError> {
        match selection {
            VoiceSelection::Named(name) => self.get(name),
            VoiceSelection::Embedding(embedding) => Ok(Arc::new(embedding.clone())),
            VoiceSelection::Blend(weights) => Ok(Arc::new(self.blend(weights)?)),
        }
    }
}

/// Parse a numpy .npy file into a list of style vectors.
///
/// Expects a 2D float32 array of shape `[N, 256]` in little-endian format,
/// or `[N, 1, 256]` as written by some exporters.
fn parse_npy(data: &[u8], name: &str) -> Result<Vec<[f32; STYLE_DIM]>, TtsError> {
    if data.len() < 10 {
        return Err(TtsError::VoiceParse(format!(
            "{name}: file too short ({} bytes)",
            data.len()
        )));
    }

    if &data[0..6] != b"\x93NUMPY" {
        return Err(TtsError::VoiceParse(format!(
            "{name}: invalid numpy magic bytes"
        )));
    }

    // Version 1.x stores the header length as u16 at [8..10], 2.x and 3.x as u32 at [8..12].
    let (header_start, header_len) = match data[6] {
        1 => (10, u16::from_le_bytes([data[8], data[9]]) as usize),
        2 | 3 if data.len() >= 12 => (
            12,
            u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize,
        ),
        major => {
            return Err(TtsError::VoiceParse(format!(
                "{name}: unsupported npy version {major}"
            )))
        }
    };
    let data_offset = header_start + header_len;

    if data.len() < data_offset {
        return Err(TtsError::VoiceParse(format!(
            "{name}: header truncated (need {data_offset} bytes, got {})",
            data.len()
        )));
    }

    let header = String::from_utf8_lossy(&data[header_start..data_offset]);
    if !header.contains("'<f4'") {
        return Err(TtsError::VoiceParse(format!(
            "{name}: expected little-endian float32 data, header is {}",
            header.trim()
        )));
    }

    let float_data = &data[data_offset..];
    if float_data.len() % 4 != 0 {
        return Err(TtsError::VoiceParse(format!(
            "{name}: float data length {} is not a multiple of 4",
            float_data.len()
        )));
    }

    let n_floats = float_data.len() / 4;
    if n_floats == 0 || n_floats % STYLE_DIM != 0 {
        return Err(TtsError::VoiceParse(format!(
            "{name}: float count {n_floats} is not a positive multiple of {STYLE_DIM}"
        )));
    }

    Ok(float_data
        .chunks_exact(STYLE_DIM * 4)
        .map(|row| {
            let mut style = [0f32; STYLE_DIM];
            for (value, bytes) in style.iter_mut().zip(row.chunks_exact(4)) {
                *value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            style
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    /// Uniform voice with `rows` identical style rows.
    pub(crate) fn flat_voice(rows: usize, value: f32) -> VoiceEmbedding {
        VoiceEmbedding::new(vec![[value; STYLE_DIM]; rows]).unwrap()
    }

    fn npy_bytes(rows: usize, value: f32) -> Vec<u8> {
        let mut header =
            format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {STYLE_DIM}), }}");
        // Header plus the 10-byte preamble is padded to a multiple of 64 and ends in '\n'.
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        for row in 0..rows {
            for _ in 0..STYLE_DIM {
                bytes.extend_from_slice(&(value + row as f32).to_le_bytes());
            }
        }
        bytes
    }

    fn npz_archive(voices: &[(&str, usize, f32)]) -> Vec<u8> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, rows, value) in voices {
            zip.start_file(format!("{name}.npy"), SimpleFileOptions::default())
                .unwrap();
            zip.write_all(&npy_bytes(*rows, *value)).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn sample_registry() -> VoiceRegistry {
        VoiceRegistry::from_reader(Cursor::new(npz_archive(&[
            ("af_heart", 4, 1.0),
            ("am_adam", 4, 3.0),
            ("bf_emma", 2, 5.0),
            ("zf_xiaobei", 3, 0.0),
        ])))
        .unwrap()
    }

    #[test]
    fn loads_voices_from_npz_archive() {
        let registry = sample_registry();
        assert_eq!(registry.len(), 4);
        let heart = registry.get("af_heart").unwrap();
        assert_eq!(heart.rows(), 4);
        assert_eq!(heart.style_for(2)[0], 3.0);
    }

    #[test]
    fn style_index_is_clamped() {
        let voice = sample_registry().get("bf_emma").unwrap();
        assert_eq!(voice.style_for(500), voice.style_for(1));
    }

    #[test]
    fn lists_by_language_prefix() {
        let registry = sample_registry();
        assert_eq!(registry.list(Some("a")), vec!["af_heart", "am_adam"]);
        assert_eq!(registry.list(Some("z")), vec!["zf_xiaobei"]);
    }

    #[test]
    fn listing_unknown_prefix_returns_every_voice() {
        let registry = sample_registry();
        assert_eq!(registry.list(Some("q")), registry.list(None));
        assert_eq!(registry.list(None).len(), 4);
    }

    #[test]
    fn unknown_voice_is_reported() {
        let err = sample_registry().get("xx_nobody").unwrap_err();
        assert!(matches!(err, TtsError::VoiceNotFound(name) if name == "xx_nobody"));
    }

    #[test]
    fn blend_is_weighted_average() {
        let registry = sample_registry();
        let blended = registry
            .blend(&[("af_heart".to_string(), 3.0), ("am_adam".to_string(), 1.0)])
            .unwrap();
        assert_eq!(blended.rows(), 4);
        // Row 0: 1.0 * 0.75 + 3.0 * 0.25
        assert!((blended.style_for(0)[0] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn blend_truncates_to_shortest_voice() {
        let registry = sample_registry();
        let blended = registry
            .blend(&[("af_heart".to_string(), 1.0), ("bf_emma".to_string(), 1.0)])
            .unwrap();
        assert_eq!(blended.rows(), 2);
    }

    #[test]
    fn invalid_blends_are_rejected() {
        let registry = sample_registry();
        assert!(matches!(registry.blend(&[]), Err(TtsError::InvalidBlend(_))));
        assert!(matches!(
            registry.blend(&[("af_heart".to_string(), 0.0)]),
            Err(TtsError::InvalidBlend(_))
        ));
        assert!(matches!(
            registry.blend(&[("af_heart".to_string(), -1.0), ("am_adam".to_string(), 2.0)]),
            Err(TtsError::InvalidBlend(_))
        ));
        assert!(matches!(
            registry.blend(&[("nobody".to_string(), 1.0)]),
            Err(TtsError::VoiceNotFound(_))
        ));
    }

    #[test]
    fn rejects_truncated_npy() {
        assert!(matches!(
            parse_npy(b"\x93NUMPY", "short.npy"),
            Err(TtsError::VoiceParse(_))
        ));
        let mut bytes = npy_bytes(1, 0.0);
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            parse_npy(&bytes, "odd.npy"),
            Err(TtsError::VoiceParse(_))
        ));
    }

    #[test]
    fn resolve_accepts_custom_embeddings() {
        let registry = sample_registry();
        let custom = flat_voice(1, 0.5);
        let resolved = registry
            .resolve(&VoiceSelection::Embedding(custom.clone()))
            .unwrap();
        assert_eq!(*resolved, custom);
    }
}
