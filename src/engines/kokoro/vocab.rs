use std::collections::HashMap;
use std::path::Path;

use crate::error::TtsError;

/// Phoneme symbol to model token ID.
pub type Vocab = HashMap<char, i64>;

/// Load the vocabulary from a Kokoro `config.json`.
///
/// The file must contain a `"vocab"` object mapping single-character strings
/// to integer token IDs.
pub fn load_vocab(config_path: &Path) -> Result<Vocab, TtsError> {
    let content = std::fs::read_to_string(config_path)?;
    let json: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| TtsError::Config(format!("{}: {e}", config_path.display())))?;

    let entries = json
        .get("vocab")
        .and_then(|v| v.as_object())
        .ok_or_else(|| TtsError::Config("config.json has no 'vocab' object".to_string()))?;

    entries
        .iter()
        .map(|(key, value)| {
            let mut chars = key.chars();
            let symbol = match (chars.next(), chars.next()) {
                (Some(symbol), None) => symbol,
                _ => {
                    return Err(TtsError::Config(format!(
                        "vocab key {key:?} is not a single character"
                    )))
                }
            };
            let id = value.as_i64().ok_or_else(|| {
                TtsError::Config(format!("vocab value for {key:?} is not an integer"))
            })?;
            Ok((symbol, id))
        })
        .collect()
}

/// Map a phoneme string to token IDs, dropping symbols the model does not know.
pub fn tokenize(vocab: &Vocab, phonemes: &str) -> Vec<i64> {
    let mut unknown = 0usize;
    let ids: Vec<i64> = phonemes
        .chars()
        .filter_map(|c| {
            let id = vocab.get(&c).copied();
            if id.is_none() {
                unknown += 1;
            }
            id
        })
        .collect();
    if unknown > 0 {
        log::debug!("Dropped {unknown} unknown phoneme symbols from {phonemes:?}");
    }
    ids
}

/// Hardcoded Kokoro vocabulary (from config.json, model-version-agnostic).
///
/// Used when the model directory has no config.json.
pub fn hardcoded_vocab() -> Vocab {
    let entries: &[(char, i64)] = &[
        (';', 1),
        (':', 2),
        (',', 3),
        ('.', 4),
        ('!', 5),
        ('?', 6),
        ('—', 9),
        ('…', 10),
        ('"', 11),
        ('(', 12),
        (')', 13),
        ('\u{201c}', 14),
        ('\u{201d}', 15),
        (' ', 16),
        ('\u{0303}', 17),
        ('ʣ', 18),
        ('ʥ', 19),
        ('ʦ', 20),
        ('ʨ', 21),
        ('ᵝ', 22),
        ('ꭧ', 23),
        ('A', 24),
        ('I', 25),
        ('O', 31),
        ('Q', 33),
        ('S', 35),
        ('T', 36),
        ('W', 39),
        ('Y', 41),
        ('ᵊ', 42),
        ('a', 43),
        ('b', 44),
        ('c', 45),
        ('d', 46),
        ('e', 47),
        ('f', 48),
        ('h', 50),
        ('i', 51),
        ('j', 52),
        ('k', 53),
        ('l', 54),
        ('m', 55),
        ('n', 56),
        ('o', 57),
        ('p', 58),
        ('q', 59),
        ('r', 60),
        ('s', 61),
        ('t', 62),
        ('u', 63),
        ('v', 64),
        ('w', 65),
        ('x', 66),
        ('y', 67),
        ('z', 68),
        ('ɑ', 69),
        ('ɐ', 70),
        ('ɒ', 71),
        ('æ', 72),
        ('β', 75),
        ('ɔ', 76),
        ('ɕ', 77),
        ('ç', 78),
        ('ɖ', 80),
        ('ð', 81),
        ('ʤ', 82),
        ('ə', 83),
        ('ɚ', 85),
        ('ɛ', 86),
        ('ɜ', 87),
        ('ɟ', 90),
        ('ɡ', 92),
        ('ɥ', 99),
        ('ɨ', 101),
        ('ɪ', 102),
        ('ʝ', 103),
        ('ɯ', 110),
        ('ɰ', 111),
        ('ŋ', 112),
        ('ɳ', 113),
        ('ɲ', 114),
        ('ɴ', 115),
        ('ø', 116),
        ('ɸ', 118),
        ('θ', 119),
        ('œ', 120),
        ('ɹ', 123),
        ('ɾ', 125),
        ('ɻ', 126),
        ('ʁ', 128),
        ('ɽ', 129),
        ('ʂ', 130),
        ('ʃ', 131),
        ('ʈ', 132),
        ('ʧ', 133),
        ('ʊ', 135),
        ('ʋ', 136),
        ('ʌ', 138),
        ('ɣ', 139),
        ('ɤ', 140),
        ('χ', 142),
        ('ʎ', 143),
        ('ʒ', 147),
        ('ʔ', 148),
        ('ˈ', 156),
        ('ˌ', 157),
        ('ː', 158),
        ('ʰ', 162),
        ('ʲ', 164),
        ('↓', 169),
        ('→', 171),
        ('↗', 172),
        ('↘', 173),
        ('ᵻ', 177),
    ];
    entries.iter().copied().collect()
}
