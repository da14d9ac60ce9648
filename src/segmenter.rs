//! Splits raw text into runs of a single language.
//!
//! Characters are first classified by script. Neutral characters (whitespace,
//! punctuation, digits, symbols) extend whatever run precedes them, so a Latin
//! sentence with spaces and commas stays one run. Each run is then assigned a
//! language: CJK runs are Japanese when they contain kana and Mandarin
//! otherwise, Devanagari is Hindi, Cyrillic is Russian, and Latin runs go
//! through the statistical detector once they are long enough to be trusted.
//! Adjacent runs that land on the same language are merged.

use lingua::{Language, LanguageDetector, LanguageDetectorBuilder};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::language::{LanguageProfile, LanguageTable};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Collapse whitespace runs to single spaces and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    WHITESPACE_RE.replace_all(text.trim(), " ").into_owned()
}

/// A span of input text assigned to one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub language: &'static LanguageProfile,
    pub text: String,
}

/// Statistical language identification for ambiguous Latin runs.
pub trait DetectLanguage: Send + Sync {
    fn detect(&self, text: &str) -> Option<Language>;
}

/// [`DetectLanguage`] backed by lingua, restricted to the table's languages.
pub struct LinguaDetector {
    detector: LanguageDetector,
}

impl LinguaDetector {
    /// Returns `None` when fewer than two candidate languages are given,
    /// since there is nothing to choose between.
    pub fn new(languages: &[Language]) -> Option<Self> {
        if languages.len() < 2 {
            return None;
        }
        let detector = LanguageDetectorBuilder::from_languages(languages).build();
        Some(Self { detector })
    }
}

impl DetectLanguage for LinguaDetector {
    fn detect(&self, text: &str) -> Option<Language> {
        self.detector.detect_language_of(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Latin,
    Cjk,
    Devanagari,
    Cyrillic,
    Neutral,
}

fn is_kana(ch: char) -> bool {
    matches!(ch,
        '\u{3040}'..='\u{309F}' | // Hiragana
        '\u{30A0}'..='\u{30FF}' | // Katakana
        '\u{31F0}'..='\u{31FF}' | // Katakana phonetic extensions
        '\u{FF66}'..='\u{FF9F}'   // Half-width katakana
    )
}

fn is_han(ch: char) -> bool {
    matches!(ch,
        '\u{4E00}'..='\u{9FFF}' |
        '\u{3400}'..='\u{4DBF}' |
        '\u{F900}'..='\u{FAFF}'
    )
}

fn classify(ch: char) -> Script {
    if is_han(ch) || is_kana(ch) {
        return Script::Cjk;
    }
    match ch {
        '\u{0900}'..='\u{097F}' => Script::Devanagari,
        '\u{0400}'..='\u{052F}' => Script::Cyrillic,
        'a'..='z' | 'A'..='Z' => Script::Latin,
        '\u{00C0}'..='\u{024F}' | '\u{1E00}'..='\u{1EFF}' if ch.is_alphabetic() => Script::Latin,
        _ => Script::Neutral,
    }
}

#[derive(Debug)]
struct ScriptRun<'a> {
    script: Script,
    text: &'a str,
    has_kana: bool,
}

/// Maximal runs of one script, with neutral characters folded into the
/// preceding run. Leading neutral characters form their own run.
fn script_runs(text: &str) -> Vec<ScriptRun<'_>> {
    let mut runs = Vec::new();
    let mut start = 0usize;
    let mut current = Script::Neutral;
    let mut has_kana = false;

    for (idx, ch) in text.char_indices() {
        let script = classify(ch);
        if script == Script::Neutral || script == current {
            has_kana |= is_kana(ch);
            continue;
        }
        if idx > start {
            runs.push(ScriptRun {
                script: current,
                text: &text[start..idx],
                has_kana,
            });
        }
        start = idx;
        current = script;
        has_kana = is_kana(ch);
    }

    if start < text.len() {
        runs.push(ScriptRun {
            script: current,
            text: &text[start..],
            has_kana,
        });
    }
    runs
}

/// Language segmentation with optional statistical detection.
pub struct LanguageSegmenter {
    table: LanguageTable,
    default_language: &'static LanguageProfile,
    detector: Option<Box<dyn DetectLanguage>>,
    min_detection_letters: usize,
}

impl LanguageSegmenter {
    pub fn new(
        table: LanguageTable,
        default_language: &'static LanguageProfile,
        min_detection_letters: usize,
    ) -> Self {
        let detector = LinguaDetector::new(&table.detection_languages())
            .map(|d| Box::new(d) as Box<dyn DetectLanguage>);
        Self {
            table,
            default_language,
            detector,
            min_detection_letters,
        }
    }

    /// Replace the statistical detector (or disable it with `None`).
    pub fn with_detector(mut self, detector: Option<Box<dyn DetectLanguage>>) -> Self {
        self.detector = detector;
        self
    }

    pub fn default_language(&self) -> &'static LanguageProfile {
        self.default_language
    }

    /// Split `text` into language segments.
    ///
    /// With an explicit `language`, the whole text is a single segment and no
    /// detection runs. Empty input yields no segments.
    pub fn segment(
        &self,
        text: &str,
        language: Option<&'static LanguageProfile>,
    ) -> Vec<TextSegment> {
        if let Some(language) = language {
            let text = text.trim();
            if text.is_empty() {
                return Vec::new();
            }
            return vec![TextSegment {
                language,
                text: text.to_string(),
            }];
        }

        let mut segments: Vec<TextSegment> = Vec::new();
        for run in script_runs(text) {
            let language = self.classify_run(&run);
            match segments.last_mut() {
                Some(last) if last.language == language => last.text.push_str(run.text),
                _ => segments.push(TextSegment {
                    language,
                    text: run.text.to_string(),
                }),
            }
        }

        segments
            .into_iter()
            .filter_map(|mut segment| {
                let trimmed = segment.text.trim();
                if trimmed.is_empty() {
                    return None;
                }
                if trimmed.len() != segment.text.len() {
                    segment.text = trimmed.to_string();
                }
                Some(segment)
            })
            .collect()
    }

    fn classify_run(&self, run: &ScriptRun<'_>) -> &'static LanguageProfile {
        let named = |name: &str| self.table.by_name(name).unwrap_or(self.default_language);
        match run.script {
            Script::Cjk if run.has_kana => named("Japanese"),
            Script::Cjk => named("Mandarin Chinese"),
            Script::Devanagari => named("Hindi"),
            Script::Cyrillic => named("Russian"),
            Script::Latin => self.detect_latin(run.text),
            Script::Neutral => self.default_language,
        }
    }

    fn detect_latin(&self, text: &str) -> &'static LanguageProfile {
        let letters = text.chars().filter(|c| c.is_alphabetic()).count();
        if letters < self.min_detection_letters {
            return self.default_language;
        }
        let Some(detector) = self.detector.as_deref() else {
            return self.default_language;
        };
        match detector.detect(text.trim()) {
            Some(language) => match self.table.by_detection(language) {
                Some(profile) => profile,
                None => {
                    log::debug!("Detected {language:?} has no profile, using default");
                    self.default_language
                }
            },
            None => {
                log::debug!("Language detection inconclusive for {text:?}");
                self.default_language
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDetector(Option<Language>);

    impl DetectLanguage for FixedDetector {
        fn detect(&self, _text: &str) -> Option<Language> {
            self.0
        }
    }

    fn segmenter(detected: Option<Language>) -> LanguageSegmenter {
        let table = LanguageTable::builtin();
        let default = table.require("English (US)").unwrap();
        LanguageSegmenter::new(table, default, 12)
            .with_detector(Some(Box::new(FixedDetector(detected))))
    }

    fn names(segments: &[TextSegment]) -> Vec<(&str, &str)> {
        segments
            .iter()
            .map(|s| (s.language.name, s.text.as_str()))
            .collect()
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_whitespace("  Hello \n\t world  "), "Hello world");
    }

    #[test]
    fn mixed_english_and_chinese() {
        let segments = segmenter(None).segment("Hello world. 你好世界。", None);
        assert_eq!(
            names(&segments),
            vec![
                ("English (US)", "Hello world."),
                ("Mandarin Chinese", "你好世界。"),
            ]
        );
    }

    #[test]
    fn kana_marks_a_run_as_japanese() {
        let segments = segmenter(None).segment("今日はいい天気です。", None);
        assert_eq!(names(&segments), vec![("Japanese", "今日はいい天気です。")]);
    }

    #[test]
    fn explicit_language_skips_detection() {
        let table = LanguageTable::builtin();
        let french = table.require("French").unwrap();
        let segments = segmenter(Some(Language::Spanish)).segment("Hello 你好", Some(french));
        assert_eq!(names(&segments), vec![("French", "Hello 你好")]);
    }

    #[test]
    fn short_latin_runs_use_default_without_detection() {
        let segments = segmenter(Some(Language::Spanish)).segment("Hola amigo", None);
        assert_eq!(names(&segments), vec![("English (US)", "Hola amigo")]);
    }

    #[test]
    fn long_latin_runs_use_detector() {
        let segments =
            segmenter(Some(Language::Spanish)).segment("Esto es una prueba bastante larga.", None);
        assert_eq!(
            names(&segments),
            vec![("Spanish", "Esto es una prueba bastante larga.")]
        );
    }

    #[test]
    fn failed_detection_falls_back_to_default() {
        let segments = segmenter(None).segment("Something long enough to detect here.", None);
        assert_eq!(segments[0].language.name, "English (US)");
    }

    #[test]
    fn leading_punctuation_takes_default_language() {
        let segments = segmenter(None).segment("«你好»", None);
        assert_eq!(
            names(&segments),
            vec![("English (US)", "«"), ("Mandarin Chinese", "你好»")]
        );
    }

    #[test]
    fn punctuation_only_text_is_one_default_segment() {
        let segments = segmenter(None).segment("... !!! 123", None);
        assert_eq!(names(&segments), vec![("English (US)", "... !!! 123")]);
    }

    #[test]
    fn empty_input_has_no_segments() {
        assert!(segmenter(None).segment("   ", None).is_empty());
    }

    #[test]
    fn adjacent_segments_never_share_a_language() {
        let text = "Hi 你好 there 世界 ok नमस्ते привет 今日は yes";
        let segments = segmenter(None).segment(text, None);
        assert!(segments
            .windows(2)
            .all(|pair| pair[0].language != pair[1].language));
        let rebuilt: String = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(rebuilt.replace(' ', ""), text.replace(' ', ""));
    }

    #[test]
    fn script_classes_map_to_languages() {
        let segments = segmenter(None).segment("नमस्ते दुनिया привет мир", None);
        assert_eq!(
            names(&segments),
            vec![("Hindi", "नमस्ते दुनिया"), ("Russian", "привет мир")]
        );
    }

    #[test]
    fn lingua_detects_english_sentence() {
        let table = LanguageTable::builtin();
        let default = table.require("Spanish").unwrap();
        let segmenter = LanguageSegmenter::new(table, default, 12);
        let text = "The quick brown fox jumps over the lazy dog near the river bank.";
        let first = segmenter.segment(text, None);
        let second = segmenter.segment(text, None);
        assert_eq!(first[0].language.name, "English (US)");
        assert_eq!(first, second);
    }
}
