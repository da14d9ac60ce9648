//! Static language profile table.
//!
//! Each profile ties a display name to the short code used for G2P routing
//! and voice filtering (Kokoro voice names start with this code, e.g. `af_heart`
//! for American English), the detector language used in auto-detect mode, and
//! the phonemizer backend that handles it.

use lingua::Language;

use crate::error::TtsError;

/// Pseudo-language selecting per-span detection instead of a fixed language.
pub const AUTO_DETECT: &str = "Auto-Detect";

/// Languages with a dedicated analyzer on top of espeak-ng output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeLanguage {
    AmericanEnglish,
    BritishEnglish,
    Japanese,
    Mandarin,
}

impl NativeLanguage {
    /// espeak-ng voice the analyzer is layered on.
    pub fn espeak_voice(self) -> &'static str {
        match self {
            Self::AmericanEnglish => "en-us",
            Self::BritishEnglish => "en-gb",
            Self::Japanese => "ja",
            Self::Mandarin => "cmn",
        }
    }
}

/// Phonemizer backend kind, fixed per profile when the table is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum G2pBackend {
    /// Per-language analyzer mapping espeak-ng IPA onto the model's phoneme set.
    Native(NativeLanguage),
    /// Generic rule-based espeak-ng phonemization for the given locale.
    RuleBased { locale: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    pub name: &'static str,
    pub code: &'static str,
    pub detection: Option<Language>,
    pub backend: G2pBackend,
}

impl LanguageProfile {
    /// Locale string handed to the external phonemizer.
    pub fn locale(&self) -> &'static str {
        match self.backend {
            G2pBackend::Native(native) => native.espeak_voice(),
            G2pBackend::RuleBased { locale } => locale,
        }
    }
}

static PROFILES: &[LanguageProfile] = &[
    LanguageProfile {
        name: "English (US)",
        code: "a",
        detection: Some(Language::English),
        backend: G2pBackend::Native(NativeLanguage::AmericanEnglish),
    },
    LanguageProfile {
        name: "English (UK)",
        code: "b",
        detection: None,
        backend: G2pBackend::Native(NativeLanguage::BritishEnglish),
    },
    LanguageProfile {
        name: "Japanese",
        code: "j",
        detection: Some(Language::Japanese),
        backend: G2pBackend::Native(NativeLanguage::Japanese),
    },
    LanguageProfile {
        name: "Mandarin Chinese",
        code: "z",
        detection: Some(Language::Chinese),
        backend: G2pBackend::Native(NativeLanguage::Mandarin),
    },
    LanguageProfile {
        name: "Spanish",
        code: "e",
        detection: Some(Language::Spanish),
        backend: G2pBackend::RuleBased { locale: "es" },
    },
    LanguageProfile {
        name: "French",
        code: "f",
        detection: Some(Language::French),
        backend: G2pBackend::RuleBased { locale: "fr-fr" },
    },
    LanguageProfile {
        name: "Hindi",
        code: "h",
        detection: Some(Language::Hindi),
        backend: G2pBackend::RuleBased { locale: "hi" },
    },
    LanguageProfile {
        name: "Italian",
        code: "i",
        detection: Some(Language::Italian),
        backend: G2pBackend::RuleBased { locale: "it" },
    },
    LanguageProfile {
        name: "Portuguese (BR)",
        code: "p",
        detection: Some(Language::Portuguese),
        backend: G2pBackend::RuleBased { locale: "pt-br" },
    },
    LanguageProfile {
        name: "Russian",
        code: "r",
        detection: Some(Language::Russian),
        backend: G2pBackend::RuleBased { locale: "ru" },
    },
];

/// Read-only view over the built-in profiles.
#[derive(Debug, Clone, Copy)]
pub struct LanguageTable {
    profiles: &'static [LanguageProfile],
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LanguageTable {
    pub fn builtin() -> Self {
        Self { profiles: PROFILES }
    }

    pub fn profiles(&self) -> &'static [LanguageProfile] {
        self.profiles
    }

    /// Display names, with the auto-detect entry first.
    pub fn names(&self) -> Vec<String> {
        std::iter::once(AUTO_DETECT)
            .chain(self.profiles.iter().map(|p| p.name))
            .map(str::to_string)
            .collect()
    }

    pub fn by_name(&self, name: &str) -> Option<&'static LanguageProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn by_code(&self, code: &str) -> Option<&'static LanguageProfile> {
        self.profiles.iter().find(|p| p.code == code)
    }

    /// First profile whose detector language matches. Earlier rows win, so
    /// detected English maps to American English.
    pub fn by_detection(&self, language: Language) -> Option<&'static LanguageProfile> {
        self.profiles
            .iter()
            .find(|p| p.detection == Some(language))
    }

    pub fn require(&self, name: &str) -> Result<&'static LanguageProfile, TtsError> {
        self.by_name(name)
            .ok_or_else(|| TtsError::UnknownLanguage(name.to_string()))
    }

    /// Detector languages declared by the table, without duplicates.
    pub fn detection_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = Vec::new();
        for language in self.profiles.iter().filter_map(|p| p.detection) {
            if !languages.contains(&language) {
                languages.push(language);
            }
        }
        languages
    }
}
