//! The retrieval engine: top-level entry point tying the cache chain,
//! retrieval, conversation state, and answer synthesis together.
//!
//! One engine instance owns all mutable service state (index cache,
//! conversation store) plus its configuration; request handlers borrow it.
//! Nothing here is process-global.

use crate::api::{
    ChatRequest, ChatResponse, CreatePersistedResponse, CreateStatus, EngineStats, PathSpec,
    QueryRequest, QueryResponse, Score, SearchRequest, SearchResponse, SearchResult,
};
use crate::chat::conversation::{
    CONTEXT_WINDOW, ConversationStore, Exchange, SourceAttribution, window_of,
};
use crate::chat::prompt;
use crate::chat::provider::ChatProvider;
use crate::config::ServiceConfig;
use crate::error::{RetrieveError, Result};
use crate::retrieval::builder::IndexBuilder;
use crate::retrieval::cache::{BuildFuture, CacheEntry, IndexCache};
use crate::retrieval::loader::{DocumentLoader, FsDocumentLoader};
use crate::retrieval::path_key::{canonical_key, validate};
use crate::retrieval::vector_index::ScoredChunk;
use crate::storage::store::{PersistedEntry, PersistentStore};
use itertools::Itertools;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tome_embed::EmbeddingProvider;
use tracing::info;

/// Neutral answer used when a request's paths yield zero loadable documents.
pub const NO_DOCUMENTS_ANSWER: &str =
    "No documents could be loaded from the requested paths.";

/// Maximum snippet length (in characters) returned by `search`.
const SNIPPET_CHARS: usize = 200;

/// Default conversation id when a chat request does not name one.
pub const DEFAULT_CONVERSATION: &str = "default";

struct ResolvedPaths {
    key: String,
    absolute: Vec<PathBuf>,
    relative: Vec<String>,
}

/// Top-level retrieval service.
pub struct RetrievalEngine {
    config: ServiceConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    builder: Arc<IndexBuilder>,
    cache: Arc<IndexCache>,
    store: Arc<PersistentStore>,
    conversations: ConversationStore,
    chat: Option<Arc<dyn ChatProvider>>,
}

impl RetrievalEngine {
    /// Create an engine with the default filesystem document loader and no
    /// chat provider (query/chat will report completion as unconfigured).
    pub async fn new(
        config: ServiceConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(PersistentStore::open(&config.store_root).await?);
        let cache = Arc::new(IndexCache::new(config.cache_ttl, config.build_timeout));
        let builder = Arc::new(IndexBuilder::new(
            Arc::new(FsDocumentLoader::default()),
            config.split.clone(),
            Arc::clone(&embedder),
            config.documents_root.clone(),
        ));

        info!(
            "retrieval engine ready (documents: {}, store: {}, model: {})",
            config.documents_root.display(),
            config.store_root.display(),
            embedder.model_id()
        );

        Ok(Self {
            config,
            embedder,
            builder,
            cache,
            store,
            conversations: ConversationStore::new(),
            chat: None,
        })
    }

    /// Attach a chat-completion collaborator.
    pub fn with_chat_provider(mut self, chat: Arc<dyn ChatProvider>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Replace the document loader (e.g. to add per-format parsers).
    pub fn with_document_loader(mut self, loader: Arc<dyn DocumentLoader>) -> Self {
        self.builder = Arc::new(IndexBuilder::new(
            loader,
            self.config.split.clone(),
            Arc::clone(&self.embedder),
            self.config.documents_root.clone(),
        ));
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Answer a question against the documents under `paths`.
    pub async fn query(&self, request: QueryRequest) -> Result<QueryResponse> {
        let top_k = request.top_k.unwrap_or(self.config.query_top_k);
        let entry = match self.resolve_index(&request.paths).await {
            Ok(entry) => entry,
            Err(RetrieveError::NoDocumentsFound { .. }) => {
                return Ok(QueryResponse {
                    question: request.question,
                    answer: NO_DOCUMENTS_ANSWER.to_string(),
                    sources: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let query_vec = self.builder.embed_query(&entry.key, &request.question).await?;
        let hits = entry.index.search(&query_vec, top_k);
        let context = hits.iter().map(|h| h.chunk.content.as_str()).join("\n\n");

        let answer = self
            .complete(&entry.key, &prompt::grounded_answer(&context, &request.question))
            .await?;

        Ok(QueryResponse {
            question: request.question,
            answer,
            sources: attribute(&hits),
        })
    }

    /// Answer a message within a conversation, using the trailing exchange
    /// window as context. The whole turn is serialized per conversation id.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| DEFAULT_CONVERSATION.to_string());

        let session = self.conversations.session(&conversation_id);
        let mut history = session.lock().await;

        // A caller-supplied history replaces whatever the store held.
        if let Some(seed) = request.history {
            *history = seed;
        }

        let top_k = request.top_k.unwrap_or(self.config.query_top_k);
        let entry = match self.resolve_index(&request.paths).await {
            Ok(entry) => entry,
            Err(RetrieveError::NoDocumentsFound { .. }) => {
                return Ok(ChatResponse {
                    question: request.message.clone(),
                    answer: NO_DOCUMENTS_ANSWER.to_string(),
                    response: NO_DOCUMENTS_ANSWER.to_string(),
                    sources: Vec::new(),
                    updated_history: history.clone(),
                    conversation_id,
                });
            }
            Err(e) => return Err(e),
        };

        let query_vec = self.builder.embed_query(&entry.key, &request.message).await?;
        let hits = entry.index.search(&query_vec, top_k);
        let context = hits.iter().map(|h| h.chunk.content.as_str()).join("\n\n");

        let window = window_of(&history, CONTEXT_WINDOW);
        let answer = self
            .complete(
                &entry.key,
                &prompt::conversational(window, &context, &request.message),
            )
            .await?;

        let sources = attribute(&hits);
        history.push(Exchange::new(
            request.message.clone(),
            answer.clone(),
            sources.clone(),
        ));

        Ok(ChatResponse {
            question: request.message,
            answer: answer.clone(),
            response: answer,
            sources,
            updated_history: history.clone(),
            conversation_id,
        })
    }

    /// Return the `top_k` most similar chunks for a query, ranked.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let top_k = request.top_k.unwrap_or(self.config.search_top_k);
        let entry = match self.resolve_index(&request.paths).await {
            Ok(entry) => entry,
            Err(RetrieveError::NoDocumentsFound { .. }) => {
                return Ok(SearchResponse {
                    query: request.query,
                    results: Vec::new(),
                    total: 0,
                });
            }
            Err(e) => return Err(e),
        };

        let query_vec = self.builder.embed_query(&entry.key, &request.query).await?;
        let hits = entry.index.search(&query_vec, top_k);

        let results: Vec<SearchResult> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let rank = i + 1;
                let score = if hit.score.is_finite() {
                    Score::Measured(hit.score)
                } else {
                    Score::approximate_for_rank(rank)
                };
                SearchResult {
                    rank,
                    content: truncate_snippet(&hit.chunk.content, SNIPPET_CHARS),
                    source: hit.chunk.source.clone(),
                    score,
                }
            })
            .collect();

        let total = results.len();
        Ok(SearchResponse {
            query: request.query,
            results,
            total,
        })
    }

    /// Enumerate persisted index entries without loading them.
    pub async fn list_persisted(&self) -> Result<Vec<PersistedEntry>> {
        self.store.list().await
    }

    /// Build and persist the index for a path set. Without `force_rebuild`
    /// an existing persisted entry is left as is; with it, the entry is
    /// rebuilt and atomically swapped in even while readers hold the old one.
    pub async fn create_persisted(
        &self,
        paths: &PathSpec,
        force_rebuild: bool,
    ) -> Result<CreatePersistedResponse> {
        let resolved = self.resolve_paths(paths)?;

        if !force_rebuild && self.store.exists(&resolved.key).await {
            let metadata = self.store.read_metadata(&resolved.key).await.ok();
            return Ok(CreatePersistedResponse {
                status: CreateStatus::Exists,
                path: self.store.entry_path(&resolved.key),
                metadata,
            });
        }

        let (index, metadata) = self
            .builder
            .build(&resolved.key, &resolved.absolute, &resolved.relative)
            .await?;
        let path = self.store.save(&resolved.key, &index, &metadata).await?;

        // Refresh the memory tier so readers pick up the new build at once.
        self.cache.insert(CacheEntry {
            key: resolved.key,
            index: Arc::new(index),
            metadata: metadata.clone(),
            created_at: Instant::now(),
        });

        Ok(CreatePersistedResponse {
            status: CreateStatus::Created,
            path,
            metadata: Some(metadata),
        })
    }

    /// Drop memory-tier entries: the one for `paths`, or all of them.
    /// Disk entries are untouched.
    pub async fn clear_cache(&self, paths: Option<&PathSpec>) -> Result<usize> {
        match paths {
            Some(spec) => {
                let resolved = self.resolve_paths(spec)?;
                Ok(usize::from(self.cache.invalidate(&resolved.key)))
            }
            None => Ok(self.cache.invalidate_all()),
        }
    }

    /// Full purge for a path set: memory entry and persisted entry both go.
    pub async fn purge(&self, paths: &PathSpec) -> Result<bool> {
        let resolved = self.resolve_paths(paths)?;
        self.cache.invalidate(&resolved.key);
        self.store.delete(&resolved.key).await
    }

    /// Full history of a conversation (all exchanges, not just the window).
    pub async fn conversation_history(&self, conversation_id: &str) -> Vec<Exchange> {
        self.conversations.get(conversation_id).await
    }

    /// Remove a conversation entirely. Returns whether one existed.
    pub fn clear_conversation(&self, conversation_id: &str) -> bool {
        self.conversations.clear(conversation_id)
    }

    pub async fn stats(&self) -> EngineStats {
        let persisted = self.store.list().await.map(|e| e.len()).unwrap_or(0);
        EngineStats {
            embedding_model: self.embedder.model_id(),
            chat_model: self.chat.as_ref().map(|c| c.model_name().to_string()),
            chunk_size: self.config.split.chunk_size,
            chunk_overlap: self.config.split.chunk_overlap,
            active_conversations: self.conversations.active_count(),
            cached_indices: self.cache.len(),
            cached_keys: self.cache.cached_keys(),
            persisted_indices: persisted,
        }
    }

    /// Validate the request paths and derive the canonical key.
    fn resolve_paths(&self, spec: &PathSpec) -> Result<ResolvedPaths> {
        let entries = spec.entries();
        if entries.is_empty() {
            return Err(RetrieveError::PathInvalid {
                path: String::new(),
            });
        }

        let key = canonical_key(&entries);
        let relative: Vec<String> = key.split('|').map(str::to_string).collect();
        let absolute = relative
            .iter()
            .map(|entry| validate(entry, &self.config.documents_root))
            .collect::<Result<Vec<_>>>()?;

        Ok(ResolvedPaths {
            key,
            absolute,
            relative,
        })
    }

    /// Resolve the index for a path set through the cache chain.
    async fn resolve_index(&self, spec: &PathSpec) -> Result<CacheEntry> {
        let resolved = self.resolve_paths(spec)?;

        let builder = Arc::clone(&self.builder);
        let key = resolved.key.clone();
        let absolute = resolved.absolute;
        let relative = resolved.relative;

        self.cache
            .resolve(
                &resolved.key,
                Some(Arc::clone(&self.store)),
                self.builder.model_id(),
                self.config.persist_on_build,
                move || {
                    Box::pin(async move { builder.build(&key, &absolute, &relative).await })
                        as BuildFuture
                },
            )
            .await
    }

    async fn complete(&self, key: &str, prompt: &str) -> Result<String> {
        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| RetrieveError::completion(key, "no chat provider configured"))?;
        chat.complete(prompt)
            .await
            .map_err(|e| RetrieveError::completion(key, e))
    }
}

/// Map retrieval hits to source attributions, dropping exact
/// (source, snippet) duplicates while keeping every distinct snippet, even
/// several from the same file.
fn attribute(hits: &[ScoredChunk]) -> Vec<SourceAttribution> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut sources = Vec::new();
    for hit in hits {
        let pair = (hit.chunk.source.clone(), hit.chunk.content.clone());
        if seen.insert(pair) {
            sources.push(SourceAttribution {
                source: hit.chunk.source.clone(),
                content: hit.chunk.content.clone(),
            });
        }
    }
    sources
}

fn truncate_snippet(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        let mut snippet: String = content.chars().take(max_chars).collect();
        snippet.push_str("...");
        snippet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::vector_index::IndexedChunk;

    fn hit(source: &str, content: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            score,
            chunk: IndexedChunk {
                source: source.to_string(),
                content: content.to_string(),
            },
        }
    }

    #[test]
    fn attribution_dedupes_exact_pairs_only() {
        let hits = vec![
            hit("a.txt", "first snippet", 0.9),
            hit("a.txt", "first snippet", 0.8),
            hit("a.txt", "second snippet", 0.7),
            hit("b.txt", "other", 0.6),
        ];
        let sources = attribute(&hits);
        assert_eq!(sources.len(), 3);
        // Distinct snippets from the same file are both kept.
        assert_eq!(sources[0].content, "first snippet");
        assert_eq!(sources[1].content, "second snippet");
        assert_eq!(sources[2].source, "b.txt");
    }

    #[test]
    fn snippet_truncation_is_char_safe() {
        assert_eq!(truncate_snippet("short", 200), "short");
        let long = "é".repeat(300);
        let snippet = truncate_snippet(&long, 200);
        assert!(snippet.ends_with("..."));
        assert_eq!(snippet.chars().count(), 203);
    }
}
