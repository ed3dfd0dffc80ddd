//! Error taxonomy for the retrieval service.
//!
//! Every error carries the cache key it concerns (or the offending path for
//! pre-I/O validation failures). The enum is `Clone` on purpose: a failed
//! single-flight index build is broadcast to every request waiting on it, so
//! causes are captured as strings rather than source chains.

use std::fmt;

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrieveError>;

/// The pipeline stage an index build failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Reading documents from disk.
    Load,
    /// Splitting documents into chunks.
    Chunk,
    /// Generating embeddings for chunks.
    Embed,
    /// Constructing the similarity index.
    Index,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Load => "load",
            BuildStage::Chunk => "chunk",
            BuildStage::Embed => "embed",
            BuildStage::Index => "index",
        };
        f.write_str(name)
    }
}

/// Errors produced by the retrieval service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetrieveError {
    /// A request path escapes the configured document root, or the request
    /// contained no usable paths. Rejected before any I/O.
    #[error("invalid document path: {path:?}")]
    PathInvalid { path: String },

    /// Zero loadable documents were found. Callers present this as a neutral
    /// "no documents" response, not as a failure.
    #[error("no loadable documents for {key:?}")]
    NoDocumentsFound { key: String },

    /// A build stage (loader, chunker, embedder, indexer) failed.
    #[error("index build for {key:?} failed at stage {stage}: {cause}")]
    BuildFailure {
        key: String,
        stage: BuildStage,
        cause: String,
    },

    /// No persisted entry exists for the key.
    #[error("no persisted index for {key:?}")]
    PersistMissing { key: String },

    /// A persisted entry exists but cannot be decoded.
    #[error("persisted index for {key:?} is unreadable: {cause}")]
    PersistCorrupt { key: String, cause: String },

    /// A persisted entry was built under a different embedding model and must
    /// never be served against the current one.
    #[error(
        "persisted index for {key:?} was built with embedding model {stored:?}, \
         current model is {current:?}"
    )]
    ModelMismatch {
        key: String,
        stored: String,
        current: String,
    },

    /// A build or load exceeded the configured time bound.
    #[error("index resolution for {key:?} timed out after {seconds}s")]
    Timeout { key: String, seconds: u64 },

    /// Disk I/O against the persistent store failed.
    #[error("store I/O for {key:?} failed: {cause}")]
    StoreIo { key: String, cause: String },

    /// The chat-completion collaborator failed or is not configured.
    #[error("answer synthesis for {key:?} failed: {cause}")]
    Completion { key: String, cause: String },
}

impl RetrieveError {
    pub fn build(key: impl Into<String>, stage: BuildStage, cause: impl fmt::Display) -> Self {
        Self::BuildFailure {
            key: key.into(),
            stage,
            cause: cause.to_string(),
        }
    }

    pub fn corrupt(key: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::PersistCorrupt {
            key: key.into(),
            cause: cause.to_string(),
        }
    }

    pub fn store_io(key: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::StoreIo {
            key: key.into(),
            cause: cause.to_string(),
        }
    }

    pub fn completion(key: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Completion {
            key: key.into(),
            cause: cause.to_string(),
        }
    }

    /// Whether this error means "the persisted entry cannot be trusted" and a
    /// rebuild from source paths should be attempted.
    pub fn is_untrusted_persist(&self) -> bool {
        matches!(
            self,
            Self::PersistCorrupt { .. } | Self::ModelMismatch { .. } | Self::StoreIo { .. }
        )
    }
}
