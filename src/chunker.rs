//! Sentence splitting and growth-scheduled chunking.
//!
//! The first chunk holds a single sentence so audio starts quickly; later
//! chunks grow along the [`ChunkSchedule`] to amortize per-inference cost.

use crate::config::ChunkSchedule;

fn is_sentence_terminator(ch: char) -> bool {
    matches!(
        ch,
        '.' | '!' | '?' | '…' | ',' | ';' | ':'
            | '。' | '！' | '？' | '；' | '：' | '、' | '，'
            | '।' | '॥' | '།'
    )
}

fn is_closing_mark(ch: char) -> bool {
    matches!(
        ch,
        '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}' | '」' | '』' | '）' | '»'
    )
}

/// `.`, `,` and `:` between digits belong to numbers ("2.5", "1,000", "10:30").
fn is_numeric_connector_between_digits(text: &str, idx: usize, ch: char) -> bool {
    if !matches!(ch, '.' | ',' | ':') {
        return false;
    }

    let prev = text[..idx].chars().next_back();
    let next = text[idx + ch.len_utf8()..].chars().next();

    matches!(
        (prev, next),
        (Some(left), Some(right)) if left.is_ascii_digit() && right.is_ascii_digit()
    )
}

/// Iterator over trimmed, non-empty sentences of a text.
///
/// A sentence ends after a run of terminators plus any closing quotes or
/// brackets that follow it.
#[derive(Debug, Clone)]
pub struct Sentences<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Sentences<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn next_boundary(&self) -> usize {
        let rest = &self.text[self.pos..];
        let mut iter = rest.char_indices().peekable();
        while let Some((offset, ch)) = iter.next() {
            let idx = self.pos + offset;
            if !is_sentence_terminator(ch) || is_numeric_connector_between_digits(self.text, idx, ch)
            {
                continue;
            }
            let mut end = idx + ch.len_utf8();
            while let Some(&(next_offset, next)) = iter.peek() {
                if is_sentence_terminator(next) || is_closing_mark(next) {
                    end = self.pos + next_offset + next.len_utf8();
                    iter.next();
                } else {
                    break;
                }
            }
            return end;
        }
        self.text.len()
    }
}

impl<'a> Iterator for Sentences<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.text.len() {
            let end = self.next_boundary();
            let sentence = self.text[self.pos..end].trim();
            self.pos = end;
            if !sentence.is_empty() {
                return Some(sentence);
            }
        }
        None
    }
}

/// Groups sentences into synthesis units following a [`ChunkSchedule`].
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    schedule: ChunkSchedule,
}

impl Chunker {
    pub fn new(schedule: ChunkSchedule) -> Self {
        Self { schedule }
    }

    /// Lazy chunk sequence for `text`. Calling again restarts from the top.
    pub fn chunks<'a>(&'a self, text: &'a str) -> Chunks<'a> {
        Chunks {
            sentences: Sentences::new(text),
            schedule: &self.schedule,
            emitted: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    sentences: Sentences<'a>,
    schedule: &'a ChunkSchedule,
    emitted: usize,
}

impl Iterator for Chunks<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        let target = self.schedule.target(self.emitted);
        let mut chunk = String::new();
        for sentence in self.sentences.by_ref().take(target) {
            if !chunk.is_empty() {
                chunk.push(' ');
            }
            chunk.push_str(sentence);
        }
        if chunk.is_empty() {
            return None;
        }
        self.emitted += 1;
        Some(chunk)
    }
}
