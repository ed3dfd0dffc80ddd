//! Index building: load → chunk → embed → index.
//!
//! The builder is a pure function of its inputs: the same paths, chunking
//! configuration, and embedding model always produce an equivalent index.
//! Each stage failure is reported as [`BuildFailure`](RetrieveError::BuildFailure)
//! with the stage that raised it; zero loadable documents is the distinct
//! [`NoDocumentsFound`](RetrieveError::NoDocumentsFound) outcome.

use crate::error::{BuildStage, RetrieveError, Result};
use crate::retrieval::loader::DocumentLoader;
use crate::retrieval::path_key::relative_source;
use crate::retrieval::vector_index::{IndexedChunk, VectorIndex};
use crate::storage::store::{STORE_FORMAT_VERSION, StoreMetadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tome_context::{SplitConfig, TextSplitter};
use tome_embed::EmbeddingProvider;
use tracing::{debug, info};

/// Orchestrates the build pipeline for one document-path set.
pub struct IndexBuilder {
    loader: Arc<dyn DocumentLoader>,
    split: SplitConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    documents_root: PathBuf,
}

impl IndexBuilder {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        split: SplitConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        documents_root: PathBuf,
    ) -> Self {
        Self {
            loader,
            split,
            embedder,
            documents_root,
        }
    }

    /// Build a similarity index over every document under `paths`.
    ///
    /// `key` identifies the path set for error reporting; `document_paths` is
    /// the canonical (root-relative, sorted) path set recorded in the
    /// metadata.
    pub async fn build(
        &self,
        key: &str,
        paths: &[PathBuf],
        document_paths: &[String],
    ) -> Result<(VectorIndex, StoreMetadata)> {
        // Load
        let mut documents = Vec::new();
        for path in paths {
            let loaded = self
                .loader
                .load(path)
                .await
                .map_err(|e| RetrieveError::build(key, BuildStage::Load, e))?;
            documents.extend(loaded);
        }
        if documents.is_empty() {
            return Err(RetrieveError::NoDocumentsFound {
                key: key.to_string(),
            });
        }
        let document_count = documents.len();
        debug!("loaded {document_count} documents for {key:?}");

        // Chunk
        let splitter = TextSplitter::new(&self.split);
        let mut chunks: Vec<IndexedChunk> = Vec::new();
        for document in &documents {
            let source = relative_source(&document.path, &self.documents_root);
            for piece in splitter.split(&document.content) {
                chunks.push(IndexedChunk {
                    source: source.clone(),
                    content: piece.text,
                });
            }
        }
        if chunks.is_empty() {
            // Documents existed but every one was empty; treat like the
            // zero-document case so callers answer neutrally.
            return Err(RetrieveError::NoDocumentsFound {
                key: key.to_string(),
            });
        }
        debug!("split {document_count} documents into {} chunks", chunks.len());

        // Embed
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embedded = self
            .embedder
            .embed_texts(&texts)
            .await
            .map_err(|e| RetrieveError::build(key, BuildStage::Embed, e))?;

        // Index
        let chunk_count = chunks.len();
        let index = VectorIndex::new(chunks, embedded.embeddings)
            .map_err(|e| RetrieveError::build(key, BuildStage::Index, e))?;

        let metadata = StoreMetadata {
            format_version: STORE_FORMAT_VERSION,
            document_path: document_paths.to_vec(),
            document_count,
            chunk_count,
            created_at: chrono::Utc::now(),
            embedding_model: self.embedder.model_id(),
            dimension: index.dimension(),
        };

        info!(
            "built index for {key:?}: {document_count} documents, {chunk_count} chunks, model {}",
            metadata.embedding_model
        );
        Ok((index, metadata))
    }

    /// Embed a single query string with the builder's provider.
    pub async fn embed_query(&self, key: &str, text: &str) -> Result<Vec<half::f16>> {
        self.embedder
            .embed_text(text)
            .await
            .map_err(|e| RetrieveError::build(key, BuildStage::Embed, e))
    }

    pub fn model_id(&self) -> String {
        self.embedder.model_id()
    }

    pub fn documents_root(&self) -> &Path {
        &self.documents_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::loader::{FsDocumentLoader, RawDocument};
    use async_trait::async_trait;
    use half::f16;
    use tempfile::tempdir;
    use tome_embed::EmbeddingResult;

    /// Deterministic test embedder: hashes bytes into a fixed-dimension
    /// histogram, L2-normalized.
    #[derive(Debug, Clone)]
    struct HashEmbedder {
        dimension: usize,
        id: String,
    }

    impl HashEmbedder {
        fn new(dimension: usize, id: &str) -> Self {
            Self {
                dimension,
                id: id.to_string(),
            }
        }

        fn embed(&self, text: &str) -> Vec<f16> {
            let mut counts = vec![0f32; self.dimension];
            for byte in text.bytes() {
                counts[byte as usize % self.dimension] += 1.0;
            }
            let norm: f32 = counts.iter().map(|v| v * v).sum::<f32>().sqrt();
            counts
                .into_iter()
                .map(|v| f16::from_f32(if norm > 0.0 { v / norm } else { 0.0 }))
                .collect()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        async fn embed_text(&self, text: &str) -> tome_embed::Result<Vec<f16>> {
            Ok(self.embed(text))
        }

        async fn embed_texts(&self, texts: &[String]) -> tome_embed::Result<EmbeddingResult> {
            Ok(EmbeddingResult::new(
                texts.iter().map(|t| self.embed(t)).collect(),
            ))
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_id(&self) -> String {
            self.id.clone()
        }
    }

    /// Loader that always fails, for exercising stage attribution.
    struct FailingLoader;

    #[async_trait]
    impl DocumentLoader for FailingLoader {
        async fn load(&self, _path: &Path) -> anyhow::Result<Vec<RawDocument>> {
            anyhow::bail!("disk on fire")
        }
    }

    fn builder_for(root: &Path) -> IndexBuilder {
        IndexBuilder::new(
            Arc::new(FsDocumentLoader::default()),
            SplitConfig::default(),
            Arc::new(HashEmbedder::new(16, "test:hash:16")),
            root.to_path_buf(),
        )
    }

    #[tokio::test]
    async fn builds_metadata_and_index() -> anyhow::Result<()> {
        let dir = tempdir()?;
        tokio::fs::write(dir.path().join("a.txt"), "alpha document text").await?;
        tokio::fs::write(dir.path().join("b.txt"), "bravo document text").await?;

        let builder = builder_for(dir.path());
        let paths = vec![dir.path().join("a.txt"), dir.path().join("b.txt")];
        let (index, metadata) = builder
            .build("a.txt|b.txt", &paths, &["a.txt".into(), "b.txt".into()])
            .await?;

        assert_eq!(metadata.document_count, 2);
        assert_eq!(metadata.chunk_count, index.len());
        assert_eq!(metadata.embedding_model, "test:hash:16");
        assert_eq!(metadata.dimension, 16);
        assert!(index.len() >= 2);
        assert!(index.chunks().iter().any(|c| c.source == "a.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_path_set_is_no_documents() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let builder = builder_for(dir.path());
        let missing = vec![dir.path().join("missing.txt")];
        let err = builder
            .build("missing.txt", &missing, &["missing.txt".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, RetrieveError::NoDocumentsFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn loader_failure_is_attributed_to_load_stage() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let builder = IndexBuilder::new(
            Arc::new(FailingLoader),
            SplitConfig::default(),
            Arc::new(HashEmbedder::new(16, "test:hash:16")),
            dir.path().to_path_buf(),
        );
        let err = builder
            .build("k", &[dir.path().join("x")], &["x".into()])
            .await
            .unwrap_err();
        match err {
            RetrieveError::BuildFailure { stage, .. } => assert_eq!(stage, BuildStage::Load),
            other => panic!("unexpected error: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn deterministic_for_identical_inputs() -> anyhow::Result<()> {
        let dir = tempdir()?;
        tokio::fs::write(dir.path().join("a.txt"), "the same text every time").await?;

        let builder = builder_for(dir.path());
        let paths = vec![dir.path().join("a.txt")];
        let (first, _) = builder.build("a.txt", &paths, &["a.txt".into()]).await?;
        let (second, _) = builder.build("a.txt", &paths, &["a.txt".into()]).await?;

        assert_eq!(first.len(), second.len());
        assert_eq!(first.embedding_bytes(), second.embedding_bytes());
        Ok(())
    }
}
