use std::borrow::Cow;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use super::{Phonemizer, PhonemizerFactory};
use crate::error::TtsError;
use crate::language::{G2pBackend, LanguageProfile, NativeLanguage};

/// Location of the espeak-ng binary and its data directory.
///
/// Either path can be `None` to use the system default.
#[derive(Debug, Clone, Default)]
pub struct EspeakConfig {
    pub bin_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
}

impl EspeakConfig {
    fn command(&self) -> Command {
        let mut command = match &self.bin_path {
            Some(bin) => Command::new(bin),
            None => Command::new("espeak-ng"),
        };
        if let Some(data) = &self.data_path {
            command.env("ESPEAK_DATA_PATH", data);
        }
        command
    }

    /// Check that espeak-ng runs and ships a voice for `locale`.
    fn check_voice(&self, locale: &str) -> Result<(), TtsError> {
        let output = self
            .command()
            .arg(format!("--voices={locale}"))
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TtsError::EspeakNotFound
                } else {
                    TtsError::Io(e)
                }
            })?;

        // First line is the column header; any further line is a matching voice.
        let listed = String::from_utf8_lossy(&output.stdout)
            .lines()
            .skip(1)
            .any(|line| !line.trim().is_empty());
        if !output.status.success() || !listed {
            return Err(TtsError::G2pUnavailable {
                code: locale.to_string(),
                reason: format!("espeak-ng has no voice data for '{locale}'"),
            });
        }
        Ok(())
    }
}

/// Builds espeak-ng backed phonemizers after checking the voice is installed.
#[derive(Debug, Clone, Default)]
pub struct EspeakFactory {
    config: EspeakConfig,
}

impl EspeakFactory {
    pub fn new(config: EspeakConfig) -> Self {
        Self { config }
    }
}

impl PhonemizerFactory for EspeakFactory {
    fn create(&self, profile: &LanguageProfile) -> Result<Arc<dyn Phonemizer>, TtsError> {
        let locale = profile.locale();
        self.config.check_voice(locale).map_err(|e| match e {
            TtsError::G2pUnavailable { reason, .. } => TtsError::G2pUnavailable {
                code: profile.code.to_string(),
                reason,
            },
            other => other,
        })?;

        let dialect = match profile.backend {
            G2pBackend::Native(native) => Some(native),
            G2pBackend::RuleBased { .. } => None,
        };
        Ok(Arc::new(EspeakPhonemizer {
            name: format!("espeak-ng:{locale}"),
            locale,
            dialect,
            config: self.config.clone(),
        }))
    }
}

/// espeak-ng phonemizer, optionally refined by a per-language analyzer that
/// maps espeak IPA onto the Kokoro phoneme inventory.
pub struct EspeakPhonemizer {
    name: String,
    locale: &'static str,
    dialect: Option<NativeLanguage>,
    config: EspeakConfig,
}

impl Phonemizer for EspeakPhonemizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn phonemize(&self, text: &str) -> Result<String, TtsError> {
        let parts = split_text_parts(text);
        let text_segments: Vec<&str> = parts
            .iter()
            .filter_map(|part| match part {
                TextPart::Text(segment) => Some(segment.as_str()),
                TextPart::Punct(_) => None,
            })
            .collect();

        if text_segments.is_empty() {
            // Punctuation alone carries nothing to speak.
            return Ok(String::new());
        }

        let phonemes = self.phonemize_segments_batch(&text_segments)?;
        let mut out = String::new();
        let mut segment_index = 0usize;
        for part in &parts {
            match part {
                TextPart::Text(_) => {
                    if let Some(ipa) = phonemes.get(segment_index) {
                        if !ipa.is_empty() {
                            if !out.is_empty() && !out.ends_with(' ') {
                                out.push(' ');
                            }
                            out.push_str(ipa);
                        }
                    }
                    segment_index += 1;
                }
                TextPart::Punct(ch) => {
                    if !out.is_empty() {
                        out.push(*ch);
                    }
                }
            }
        }

        Ok(out.trim().to_string())
    }
}

impl EspeakPhonemizer {
    fn phonemize_segments_batch(&self, segments: &[&str]) -> Result<Vec<String>, TtsError> {
        let batched_input = segments.join("\n");
        let output = self.run_espeak(&batched_input)?;
        let lines: Vec<&str> = output.lines().collect();

        // espeak-ng should emit one line per input line for stdin mode.
        // If this assumption breaks, fall back to per-segment invocation.
        if lines.len() != segments.len() {
            return segments
                .iter()
                .map(|segment| {
                    let output = self.run_espeak(segment)?;
                    Ok(self.refine(&clean_ipa(&output)))
                })
                .collect();
        }

        Ok(lines
            .iter()
            .map(|line| self.refine(&clean_ipa(line)))
            .collect())
    }

    fn refine(&self, ipa: &str) -> String {
        match self.dialect {
            Some(native) => refine_native(native, ipa),
            None => ipa.to_string(),
        }
    }

    fn run_espeak(&self, input: &str) -> Result<String, TtsError> {
        let mut child = self
            .config
            .command()
            .args(["--ipa", "--stdin", "-q", "-v", self.locale])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TtsError::EspeakNotFound
                } else {
                    TtsError::Io(e)
                }
            })?;

        // espeak-ng reads stdin line by line; an unterminated last line
        // loses its final token.
        let stdin_payload = canonicalize_espeak_stdin_payload(input);
        let stdin = child.stdin.take();

        // Feed stdin from its own thread while this one drains stdout, so a
        // full output pipe cannot stall the write.
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(stdin_payload.as_bytes()),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TtsError::PhonemizerFailed(format!(
                "espeak-ng exited with code {:?}: {stderr}",
                output.status.code()
            )));
        }
        written.map_err(|_| TtsError::WorkerPanicked("espeak stdin writer"))??;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TextPart {
    Text(String),
    Punct(char),
}

fn split_text_parts(text: &str) -> Vec<TextPart> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for (idx, ch) in text.char_indices() {
        let ch_len = ch.len_utf8();
        if let Some(punct) = map_boundary_punctuation(ch) {
            if !is_numeric_connector_between_digits(text, idx, ch_len, ch) {
                flush_text_part(&mut parts, &mut current);
                parts.push(TextPart::Punct(punct));
                continue;
            }
        }

        if ch.is_whitespace() {
            if !current.is_empty() && !current.ends_with(' ') {
                current.push(' ');
            }
            continue;
        }

        current.push(ch);
    }

    flush_text_part(&mut parts, &mut current);
    parts
}

fn flush_text_part(parts: &mut Vec<TextPart>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(TextPart::Text(trimmed.to_string()));
    }
    current.clear();
}

/// Punctuation the model has tokens for. Full-width and CJK marks fold onto
/// their ASCII counterparts.
fn map_boundary_punctuation(ch: char) -> Option<char> {
    match ch {
        '.' | '!' | '?' | ',' | ';' | ':' | '—' | '…' | '"' | '(' | ')' | '\u{201c}'
        | '\u{201d}' => Some(ch),
        '。' | '．' | '।' | '॥' => Some('.'),
        '，' | '、' => Some(','),
        '！' => Some('!'),
        '？' => Some('?'),
        '；' => Some(';'),
        '：' => Some(':'),
        '\n' | '\r' => Some('.'),
        _ => None,
    }
}

fn is_numeric_connector_between_digits(text: &str, idx: usize, ch_len: usize, ch: char) -> bool {
    if !matches!(ch, '.' | ',') {
        return false;
    }

    let prev = text[..idx].chars().next_back();
    let next = text[idx + ch_len..].chars().next();

    matches!(
        (prev, next),
        (Some(left), Some(right)) if left.is_ascii_digit() && right.is_ascii_digit()
    )
}

fn canonicalize_espeak_stdin_payload(input: &str) -> Cow<'_, str> {
    if input.ends_with('\n') {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(format!("{input}\n"))
    }
}

/// Join espeak output lines and drop its word-boundary underscores.
fn clean_ipa(ipa: &str) -> String {
    ipa.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .replace('_', "")
}

/// espeak IPA sequences rewritten to Kokoro's phoneme symbols. Longer
/// sequences come first so diphthongs are matched before their parts.
const ENGLISH_COMMON: &[(&str, &str)] = &[
    ("aɪ", "I"),
    ("aʊ", "W"),
    ("eɪ", "A"),
    ("ɔɪ", "Y"),
    ("dʒ", "ʤ"),
    ("tʃ", "ʧ"),
    ("ɚ", "əɹ"),
    ("r", "ɹ"),
    ("ɐ", "ə"),
    ("x", "k"),
    ("ɬ", "l"),
];

const ENGLISH_US: &[(&str, &str)] = &[("oʊ", "O"), ("ɾ", "T")];
const ENGLISH_GB: &[(&str, &str)] = &[("əʊ", "Q")];

fn refine_native(native: NativeLanguage, ipa: &str) -> String {
    match native {
        NativeLanguage::AmericanEnglish => replace_all(&replace_all(ipa, ENGLISH_US), ENGLISH_COMMON),
        NativeLanguage::BritishEnglish => replace_all(&replace_all(ipa, ENGLISH_GB), ENGLISH_COMMON),
        // Tone numbers and Chao tone letters have no model tokens.
        NativeLanguage::Mandarin | NativeLanguage::Japanese => ipa
            .chars()
            .filter(|c| !c.is_ascii_digit() && !matches!(c, '˥' | '˦' | '˧' | '˨' | '˩'))
            .collect(),
    }
}

fn replace_all(ipa: &str, table: &[(&str, &str)]) -> String {
    table
        .iter()
        .fold(ipa.to_string(), |acc, (from, to)| acc.replace(from, to))
}
