//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use half::f16;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// Result of embedding generation.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text.
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector.
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a result from a vector of f16 embeddings; the dimension is
    /// inferred from the first vector (0 when empty).
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Process-wide cache of initialized embedding models, keyed by model name.
/// Loading an ONNX model takes seconds; every provider with the same model
/// shares one instance.
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Trait for embedding providers that can generate embeddings from text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batched).
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Dimension of the vectors this provider produces.
    fn dimension(&self) -> usize;

    /// Unique identifier of the embedding space. Indices built under one id
    /// must never be searched with vectors from another.
    fn model_id(&self) -> String;
}

/// FastEmbed-backed provider running local ONNX models.
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Load (or reuse from the process cache) the configured model and return
    /// a ready provider.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let cached = {
            let cache = model_cache().lock().unwrap();
            cache
                .get(&config.model_name)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };

        if let Some((model, dimension)) = cached {
            tracing::debug!("using cached embedding model: {}", config.model_name);
            return Ok(Self {
                config,
                model,
                dimension,
            });
        }

        tracing::info!("loading embedding model: {}", config.model_name);
        let builtin = builtin_model(&config.model_name)?;

        // Model loading and the probe embedding are CPU-bound.
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let init_options = InitOptions::new(builtin);
                let mut model =
                    TextEmbedding::try_new(init_options).map_err(EmbedError::model_init)?;

                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(EmbedError::model_init)?;
                let dimension = probe.first().map(|e| e.len()).unwrap_or(0);
                Ok((model, dimension))
            })
            .await??;

        if dimension == 0 {
            return Err(EmbedError::invalid_config(format!(
                "model {} produced an empty probe embedding",
                config.model_name
            )));
        }
        tracing::info!(
            "embedding model {} ready, dimension {}",
            config.model_name,
            dimension
        );

        let model = Arc::new(Mutex::new(model));
        {
            let mut cache = model_cache().lock().unwrap();
            cache.insert(config.model_name.clone(), (Arc::clone(&model), dimension));
        }

        Ok(Self {
            config,
            model,
            dimension,
        })
    }

    /// Drop all cached models. Mainly useful in long-lived test processes.
    pub fn clear_model_cache() {
        model_cache().lock().unwrap().clear();
    }

    fn convert_to_f16(&self, embeddings: Vec<Vec<f32>>) -> Vec<Vec<f16>> {
        embeddings
            .into_iter()
            .map(|embedding| {
                let mut out: Vec<f16> = embedding.into_iter().map(f16::from_f32).collect();
                if self.config.normalize {
                    let norm: f32 = out
                        .iter()
                        .map(|x| x.to_f32() * x.to_f32())
                        .sum::<f32>()
                        .sqrt();
                    if norm > 0.0 {
                        for value in &mut out {
                            *value = f16::from_f32(value.to_f32() / norm);
                        }
                    }
                }
                out
            })
            .collect()
    }
}

fn builtin_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            Ok(EmbeddingModel::AllMiniLML6V2)
        }
        other => Err(EmbedError::invalid_config(format!(
            "unsupported embedding model: {other}"
        ))),
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("no embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!("generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let batch = batch.to_vec();
            let model = Arc::clone(&self.model);

            let raw = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = model.lock().unwrap();
                guard.embed(batch, None).map_err(EmbedError::generation)
            })
            .await??;

            all_embeddings.extend(self.convert_to_f16(raw));
        }

        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> String {
        let normalized = if self.config.normalize { "norm" } else { "raw" };
        format!(
            "fastembed:{}:{}:{}",
            self.config.model_name, self.dimension, normalized
        )
    }
}
