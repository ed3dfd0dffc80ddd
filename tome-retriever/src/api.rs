//! Request/response contracts consumed by the API layer.
//!
//! These mirror the JSON shapes the service exposes: `paths` accepts a
//! single string or a list, responses carry the question/query back, and
//! search results serialize their score as a bare number while the tagged
//! [`Score`] type keeps measured similarities distinguishable from
//! rank-based approximations inside the process.

use crate::chat::conversation::{Exchange, SourceAttribution};
use crate::storage::store::StoreMetadata;
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;

/// Document paths for a request: a single path or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSpec {
    One(String),
    Many(Vec<String>),
}

impl PathSpec {
    /// The trimmed, non-empty path entries of the request, in request order.
    pub fn entries(&self) -> Vec<String> {
        let raw: Vec<&String> = match self {
            PathSpec::One(path) => vec![path],
            PathSpec::Many(paths) => paths.iter().collect(),
        };
        raw.iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

impl From<&str> for PathSpec {
    fn from(path: &str) -> Self {
        PathSpec::One(path.to_string())
    }
}

impl From<Vec<String>> for PathSpec {
    fn from(paths: Vec<String>) -> Self {
        PathSpec::Many(paths)
    }
}

impl From<&[&str]> for PathSpec {
    fn from(paths: &[&str]) -> Self {
        PathSpec::Many(paths.iter().map(|p| p.to_string()).collect())
    }
}

/// A search-result score. Measured similarities come from the index; when
/// none is available the rank-based approximation is used and must not be
/// compared across queries or indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    /// Genuine cosine similarity reported by the index.
    Measured(f32),
    /// `1.0 - 0.1 * (rank - 1)`, an explicit stand-in keyed to rank only.
    RankApproximation(f32),
}

impl Score {
    pub fn value(&self) -> f32 {
        match self {
            Score::Measured(v) | Score::RankApproximation(v) => *v,
        }
    }

    pub fn is_approximate(&self) -> bool {
        matches!(self, Score::RankApproximation(_))
    }

    /// The approximation for a 1-based rank.
    pub fn approximate_for_rank(rank: usize) -> Self {
        Score::RankApproximation(1.0 - 0.1 * (rank.saturating_sub(1)) as f32)
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f32(self.value())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(alias = "document_path")]
    pub paths: PathSpec,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceAttribution>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(alias = "document_path")]
    pub paths: PathSpec,
    #[serde(default)]
    pub history: Option<Vec<Exchange>>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub question: String,
    pub answer: String,
    /// Duplicate of `answer`, kept for older clients.
    pub response: String,
    pub sources: Vec<SourceAttribution>,
    pub updated_history: Vec<Exchange>,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(alias = "document_path")]
    pub paths: PathSpec,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// 1-based rank.
    pub rank: usize,
    /// Snippet of the chunk, truncated for display.
    pub content: String,
    pub source: String,
    pub score: Score,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total: usize,
}

/// Status of a `create_persisted` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CreateStatus {
    Created,
    Exists,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatePersistedResponse {
    pub status: CreateStatus,
    pub path: PathBuf,
    pub metadata: Option<StoreMetadata>,
}

/// Service statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub embedding_model: String,
    pub chat_model: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub active_conversations: usize,
    pub cached_indices: usize,
    pub cached_keys: Vec<String>,
    pub persisted_indices: usize,
}
