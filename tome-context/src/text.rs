//! Recursive, separator-aware text splitting.
//!
//! The splitter works in two passes. First, the input is decomposed into
//! "atomic" segments: byte ranges that either fit inside the chunk budget or
//! are a separator match. Splitting is recursive: if a span between matches
//! of the current separator is still too large, the next separator in the
//! list is tried on that span, and when every separator is exhausted the span
//! is cut into fixed-size character windows. Second, the segments are merged
//! back into chunks: segments accumulate until the chunk budget would be
//! exceeded, a chunk is emitted, and the tail of the window (up to the
//! configured overlap) seeds the next chunk.
//!
//! All sizes are measured in bytes; chunk boundaries always fall on UTF-8
//! character boundaries.

use serde::Serialize;
use std::collections::VecDeque;
use std::ops::Range;

use regex::Regex;

/// Default separator patterns, ordered from most to least significant:
/// paragraph breaks, line breaks, sentence ends, then single spaces.
pub const DEFAULT_SEPARATORS: &[&str] = &[r"\n\n", r"\n", r"\. ", r" "];

/// Configuration for [`TextSplitter`].
#[derive(Debug, Clone)]
pub struct SplitConfig {
    /// Maximum chunk size in bytes.
    pub chunk_size: usize,
    /// Bytes of trailing context carried from one chunk into the next.
    /// Must leave room for fresh content; values >= `chunk_size` are clamped.
    pub chunk_overlap: usize,
    /// Separator regex patterns, most significant first.
    pub separators: Vec<String>,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SplitConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            ..Self::default()
        }
    }

    pub fn with_separators<S: Into<String>>(mut self, separators: Vec<S>) -> Self {
        self.separators = separators.into_iter().map(Into::into).collect();
        self
    }
}

/// A single chunk of a larger document.
///
/// `start..end` is the byte range of the chunk's *fresh* content within the
/// original text; with a nonzero overlap the `text` of consecutive chunks
/// shares a suffix/prefix, so concatenating chunk texts does not reconstruct
/// the document.
#[derive(Debug, Clone, Serialize)]
pub struct TextChunk {
    /// 0-indexed position of this chunk within the document.
    pub sequence: usize,
    /// The chunk text, including any overlap carried from the previous chunk.
    pub text: String,
    /// Byte offset where this chunk starts in the original text.
    pub start: usize,
    /// Byte offset where this chunk ends in the original text.
    pub end: usize,
}

/// Splits document text into bounded, overlapping chunks.
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<Regex>,
}

impl TextSplitter {
    /// Build a splitter from the given configuration.
    ///
    /// # Panics
    /// Panics if any separator pattern is not a valid regular expression.
    pub fn new(config: &SplitConfig) -> Self {
        let chunk_size = config.chunk_size.max(1);
        Self {
            chunk_size,
            // Overlap must leave room for at least one byte of fresh content.
            chunk_overlap: config.chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: config
                .separators
                .iter()
                .map(|pattern| Regex::new(pattern).unwrap())
                .collect(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into chunks of at most `chunk_size` bytes, consecutive
    /// chunks sharing up to `chunk_overlap` bytes of context.
    pub fn split(&self, text: &str) -> Vec<TextChunk> {
        let segments = self.split_into_segments(text, 0, 0);

        let mut chunks: Vec<TextChunk> = Vec::new();
        let mut window: VecDeque<Range<usize>> = VecDeque::new();
        let mut window_len = 0usize;

        for segment in segments {
            let segment_len = segment.len();

            if window_len + segment_len > self.chunk_size && !window.is_empty() {
                Self::push_chunk(&mut chunks, text, &window);

                // Keep a tail of the window as overlap for the next chunk,
                // dropping further if the incoming segment would not fit.
                while !window.is_empty()
                    && (window_len > self.chunk_overlap
                        || window_len + segment_len > self.chunk_size)
                {
                    if let Some(dropped) = window.pop_front() {
                        window_len -= dropped.len();
                    }
                }
            }

            window_len += segment_len;
            window.push_back(segment);
        }

        if !window.is_empty() {
            Self::push_chunk(&mut chunks, text, &window);
        }

        chunks
    }

    fn push_chunk(chunks: &mut Vec<TextChunk>, text: &str, window: &VecDeque<Range<usize>>) {
        let start = window.front().map(|r| r.start).unwrap_or(0);
        let end = window.back().map(|r| r.end).unwrap_or(0);
        chunks.push(TextChunk {
            sequence: chunks.len(),
            text: text[start..end].to_string(),
            start,
            end,
        });
    }

    // Recursively decompose `text` into byte ranges no larger than the chunk
    // budget. `offset` is the position of `text` within the original input so
    // the returned ranges index into the full document.
    fn split_into_segments(
        &self,
        text: &str,
        separator_idx: usize,
        offset: usize,
    ) -> Vec<Range<usize>> {
        let mut segments: Vec<Range<usize>> = Vec::new();

        if text.is_empty() {
            return segments;
        }

        if text.len() <= self.chunk_size {
            segments.push(offset..offset + text.len());
            return segments;
        }

        // All separators exhausted: cut into character windows.
        if separator_idx >= self.separators.len() {
            let mut local_start = 0;
            while local_start < text.len() {
                let mut local_end = (local_start + self.chunk_size).min(text.len());
                while !text.is_char_boundary(local_end) {
                    local_end -= 1;
                }
                // A budget smaller than one character still has to advance.
                if local_end <= local_start {
                    local_end = local_start + 1;
                    while local_end < text.len() && !text.is_char_boundary(local_end) {
                        local_end += 1;
                    }
                }
                segments.push(offset + local_start..offset + local_end);
                local_start = local_end;
            }
            return segments;
        }

        let separator = &self.separators[separator_idx];
        let mut last_end = 0;

        for found in separator.find_iter(text) {
            if found.start() > last_end {
                segments.extend(self.split_into_segments(
                    &text[last_end..found.start()],
                    separator_idx + 1,
                    offset + last_end,
                ));
            }
            // The separator itself stays in the output so chunks keep their
            // natural boundaries.
            if found.end() > found.start() {
                segments.push(offset + found.start()..offset + found.end());
            }
            last_end = found.end();
        }

        if last_end < text.len() {
            segments.extend(self.split_into_segments(
                &text[last_end..],
                separator_idx + 1,
                offset + last_end,
            ));
        }

        segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter(chunk_size: usize, chunk_overlap: usize) -> TextSplitter {
        TextSplitter::new(&SplitConfig::new(chunk_size, chunk_overlap))
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(splitter(100, 10).split("").is_empty());
    }

    #[test]
    fn short_input_is_a_single_chunk() {
        let chunks = splitter(100, 10).split("hello world");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello world");
        assert_eq!(chunks[0].sequence, 0);
    }

    #[test]
    fn chunks_respect_the_size_budget() {
        let text = "one two three four five six seven eight nine ten ".repeat(20);
        let chunks = splitter(80, 20).split(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.len() <= 80, "chunk too large: {}", chunk.text.len());
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa ".repeat(10);
        let chunks = splitter(100, 30).split(&text);
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // The next chunk starts at or before the previous chunk's end.
            assert!(pair[1].start <= pair[0].end);
        }
    }

    #[test]
    fn paragraphs_split_before_words() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = splitter(80, 0).split(&text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with('a'));
        assert!(chunks[1].text.trim_start().starts_with('b'));
    }

    #[test]
    fn separatorless_text_falls_back_to_character_windows() {
        let text = "x".repeat(1000);
        let chunks = splitter(100, 0).split(&text);
        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.text.len() == 100));
    }

    #[test]
    fn character_fallback_respects_utf8_boundaries() {
        let text = "é".repeat(400);
        let chunks = splitter(101, 0).split(&text);
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.text.len() <= 101);
            // Would panic on slicing if a boundary were wrong; also verify
            // every chunk is valid text.
            assert!(chunk.text.chars().all(|c| c == 'é'));
        }
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "The quick brown fox. Jumps over the lazy dog.\n\nAnother paragraph here.";
        let a = splitter(40, 10).split(text);
        let b = splitter(40, 10).split(text);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.text, y.text);
            assert_eq!((x.start, x.end), (y.start, y.end));
        }
    }

    #[test]
    fn oversized_overlap_is_clamped() {
        let s = splitter(50, 200);
        assert!(s.chunk_overlap() < s.chunk_size());
        let text = "word ".repeat(100);
        // Must terminate and produce bounded chunks despite the bad config.
        let chunks = s.split(&text);
        assert!(chunks.iter().all(|c| c.text.len() <= 50));
    }
}
