//! # tome-context
//!
//! Text chunking for retrieval pipelines. Documents are split into bounded,
//! overlapping chunks suitable for embedding models, using an ordered list of
//! separator patterns: the splitter tries the most significant separator first
//! (paragraph breaks), falling back to finer ones (lines, sentences, spaces)
//! and finally to plain character windows for pathological inputs.
//!
//! Overlap between consecutive chunks preserves context across chunk
//! boundaries, which measurably helps retrieval quality for prose documents.
//!
//! ```
//! use tome_context::{SplitConfig, TextSplitter};
//!
//! let splitter = TextSplitter::new(&SplitConfig::default());
//! let chunks = splitter.split("First paragraph.\n\nSecond paragraph.");
//! assert!(!chunks.is_empty());
//! ```

pub mod text;

pub use text::{DEFAULT_SEPARATORS, SplitConfig, TextChunk, TextSplitter};
