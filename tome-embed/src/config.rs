//! Configuration for embedding models

use serde::{Deserialize, Serialize};

/// Default embedding model: small, fast, 384-dimensional sentence embeddings.
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Configuration for an embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Name of the embedding model (e.g. "all-MiniLM-L6-v2").
    pub model_name: String,
    /// Maximum batch size for embedding generation.
    pub batch_size: usize,
    /// Whether to L2-normalize output vectors.
    pub normalize: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            batch_size: 32,
            normalize: true,
        }
    }
}

impl EmbedConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}
