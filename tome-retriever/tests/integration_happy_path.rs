//! Integration tests for the full retrieval service:
//! - building, caching, and persisting indices through the engine
//! - query/chat/search flows with deterministic collaborators
//! - cache-tier semantics (memory clear vs disk clear, force rebuild)
//! - conversation history and the prompt context window

use async_trait::async_trait;
use futures::future::join_all;
use half::f16;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::{TempDir, tempdir};
use tome_retriever::{
    ChatProvider, ChatRequest, CreateStatus, DocumentLoader, FsDocumentLoader, NO_DOCUMENTS_ANSWER,
    PathSpec, QueryRequest, RawDocument, RetrievalEngine, RetrieveError, SearchRequest,
    ServiceConfig,
};

/// Deterministic embedder: byte-histogram vectors, L2-normalized. Similar
/// strings get similar vectors, and no model download is involved.
#[derive(Debug, Clone)]
struct HashEmbedder {
    dimension: usize,
    id: String,
}

impl HashEmbedder {
    fn new(id: &str) -> Self {
        Self {
            dimension: 16,
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
impl tome_embed::EmbeddingProvider for HashEmbedder {
    async fn embed_text(&self, text: &str) -> tome_embed::Result<Vec<f16>> {
        Ok(self.embed(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> tome_embed::Result<tome_embed::EmbeddingResult> {
        Ok(tome_embed::EmbeddingResult::new(
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

/// Chat provider returning a canned answer and recording every prompt.
struct ScriptedChat {
    answer: String,
    prompts: std::sync::Mutex<Vec<String>>,
}

impl ScriptedChat {
    fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            prompts: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedChat {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Loader wrapper counting how many times documents are read from disk, to
/// observe which cache tier served a request.
struct CountingLoader {
    inner: FsDocumentLoader,
    calls: AtomicUsize,
}

impl CountingLoader {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: FsDocumentLoader::default(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentLoader for CountingLoader {
    async fn load(&self, path: &Path) -> anyhow::Result<Vec<RawDocument>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.load(path).await
    }
}

struct Fixture {
    engine: RetrievalEngine,
    chat: Arc<ScriptedChat>,
    loader: Arc<CountingLoader>,
    // Held for their Drop impls.
    _docs: TempDir,
    _store: TempDir,
}

async fn create_test_documents(root: &Path) -> anyhow::Result<()> {
    let docs = root.join("docs");
    tokio::fs::create_dir(&docs).await?;
    tokio::fs::write(
        docs.join("a.txt"),
        "Machine learning builds models that improve with data. \
         Training uses labeled examples to fit parameters.",
    )
    .await?;
    tokio::fs::write(
        docs.join("b.txt"),
        "Deep learning stacks many neural network layers. \
         Networks learn hierarchical representations of input.",
    )
    .await?;
    tokio::fs::create_dir(root.join("empty")).await?;
    Ok(())
}

async fn fixture_with_model(model_id: &str) -> anyhow::Result<Fixture> {
    let docs = tempdir()?;
    let store = tempdir()?;
    create_test_documents(docs.path()).await?;

    let chat = ScriptedChat::new("the scripted answer");
    let loader = CountingLoader::new();
    let engine = RetrievalEngine::new(
        ServiceConfig::new(docs.path(), store.path()),
        Arc::new(HashEmbedder::new(model_id)),
    )
    .await?
    .with_document_loader(loader.clone() as Arc<dyn DocumentLoader>)
    .with_chat_provider(chat.clone() as Arc<dyn ChatProvider>);

    Ok(Fixture {
        engine,
        chat,
        loader,
        _docs: docs,
        _store: store,
    })
}

async fn fixture() -> anyhow::Result<Fixture> {
    fixture_with_model("test:hash:16").await
}

fn both_docs() -> PathSpec {
    PathSpec::Many(vec!["docs/a.txt".to_string(), "docs/b.txt".to_string()])
}

#[tokio::test]
async fn query_answers_with_relative_sources() -> anyhow::Result<()> {
    let fx = fixture().await?;

    let response = fx
        .engine
        .query(QueryRequest {
            question: "what is machine learning?".to_string(),
            paths: both_docs(),
            top_k: None,
        })
        .await?;

    assert_eq!(response.answer, "the scripted answer");
    assert!(!response.sources.is_empty());
    for source in &response.sources {
        assert!(
            source.source == "docs/a.txt" || source.source == "docs/b.txt",
            "unexpected source {:?}",
            source.source
        );
    }

    // The synthesis prompt embedded retrieved context and the question.
    let prompts = fx.chat.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("what is machine learning?"));
    Ok(())
}

#[tokio::test]
async fn build_persists_scenario_metadata() -> anyhow::Result<()> {
    let fx = fixture().await?;

    let response = fx.engine.create_persisted(&both_docs(), false).await?;
    assert_eq!(response.status, CreateStatus::Created);
    let metadata = response.metadata.expect("created entry has metadata");
    assert_eq!(metadata.document_count, 2);
    assert!(metadata.chunk_count >= 2);
    assert_eq!(
        metadata.document_path,
        vec!["docs/a.txt".to_string(), "docs/b.txt".to_string()]
    );

    // Listing reports the entry without loading it.
    let listed = fx.engine.list_persisted().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].metadata.document_count, 2);

    // A second create without force leaves the entry alone.
    let again = fx.engine.create_persisted(&both_docs(), false).await?;
    assert_eq!(again.status, CreateStatus::Exists);

    // Force rebuild overwrites even though an entry exists.
    let forced = fx.engine.create_persisted(&both_docs(), true).await?;
    assert_eq!(forced.status, CreateStatus::Created);
    assert_eq!(fx.engine.list_persisted().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn search_ranks_and_bounds_results() -> anyhow::Result<()> {
    let fx = fixture().await?;

    let response = fx
        .engine
        .search(SearchRequest {
            query: "neural network layers".to_string(),
            paths: both_docs(),
            top_k: Some(3),
        })
        .await?;

    assert!(response.total <= 3);
    assert_eq!(response.total, response.results.len());
    for (i, result) in response.results.iter().enumerate() {
        assert_eq!(result.rank, i + 1);
    }
    for pair in response.results.windows(2) {
        assert!(pair[0].score.value() >= pair[1].score.value());
    }
    Ok(())
}

#[tokio::test]
async fn concurrent_queries_build_once() -> anyhow::Result<()> {
    let fx = fixture().await?;
    let engine = Arc::new(fx.engine);

    let queries = (0..8).map(|i| {
        let engine = Arc::clone(&engine);
        async move {
            engine
                .search(SearchRequest {
                    query: format!("question number {i}"),
                    paths: both_docs(),
                    top_k: Some(2),
                })
                .await
        }
    });

    for result in join_all(queries).await {
        assert!(result.is_ok());
    }

    // One build, two path loads; every other request hit the cache.
    assert_eq!(fx.loader.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn memory_clear_falls_back_to_disk_not_rebuild() -> anyhow::Result<()> {
    let fx = fixture().await?;

    fx.engine
        .search(SearchRequest {
            query: "training data".to_string(),
            paths: both_docs(),
            top_k: Some(2),
        })
        .await?;
    let loads_after_build = fx.loader.calls();
    assert!(loads_after_build > 0);

    // Memory clear leaves the persisted entry; the next request promotes it
    // from disk without touching source documents.
    let removed = fx.engine.clear_cache(Some(&both_docs())).await?;
    assert_eq!(removed, 1);
    fx.engine
        .search(SearchRequest {
            query: "training data".to_string(),
            paths: both_docs(),
            top_k: Some(2),
        })
        .await?;
    assert_eq!(fx.loader.calls(), loads_after_build);

    // Purge removes disk state too; the next request rebuilds from source.
    assert!(fx.engine.purge(&both_docs()).await?);
    fx.engine
        .search(SearchRequest {
            query: "training data".to_string(),
            paths: both_docs(),
            top_k: Some(2),
        })
        .await?;
    assert!(fx.loader.calls() > loads_after_build);
    Ok(())
}

#[tokio::test]
async fn changed_embedding_model_triggers_rebuild() -> anyhow::Result<()> {
    let docs = tempdir()?;
    let store = tempdir()?;
    create_test_documents(docs.path()).await?;

    let engine_v1 = RetrievalEngine::new(
        ServiceConfig::new(docs.path(), store.path()),
        Arc::new(HashEmbedder::new("model-v1")),
    )
    .await?;
    engine_v1.create_persisted(&both_docs(), false).await?;

    // Same store, different embedding model: the persisted entry must not be
    // served; the engine rebuilds and re-persists under the new model.
    let engine_v2 = RetrievalEngine::new(
        ServiceConfig::new(docs.path(), store.path()),
        Arc::new(HashEmbedder::new("model-v2")),
    )
    .await?;
    let response = engine_v2
        .search(SearchRequest {
            query: "learning".to_string(),
            paths: both_docs(),
            top_k: Some(2),
        })
        .await?;
    assert!(response.total > 0);

    let listed = engine_v2.list_persisted().await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].metadata.embedding_model, "model-v2");
    Ok(())
}

#[tokio::test]
async fn chat_uses_only_the_last_five_exchanges() -> anyhow::Result<()> {
    let fx = fixture().await?;

    for n in 1..=6 {
        fx.engine
            .chat(ChatRequest {
                message: format!("distinct-question-{n}"),
                paths: both_docs(),
                history: None,
                conversation_id: Some("session-1".to_string()),
                top_k: None,
            })
            .await?;
    }

    // Storage keeps all six exchanges.
    let history = fx.engine.conversation_history("session-1").await;
    assert_eq!(history.len(), 6);

    // A seventh turn sees exchanges 2..=6 in its prompt, but not the first.
    fx.engine
        .chat(ChatRequest {
            message: "distinct-question-7".to_string(),
            paths: both_docs(),
            history: None,
            conversation_id: Some("session-1".to_string()),
            top_k: None,
        })
        .await?;
    let prompts = fx.chat.prompts();
    let seventh = &prompts[6];
    assert!(seventh.contains("User: distinct-question-2\n"));
    assert!(seventh.contains("User: distinct-question-6\n"));
    assert!(!seventh.contains("User: distinct-question-1\n"));
    assert!(seventh.contains("Current question: distinct-question-7"));
    Ok(())
}

#[tokio::test]
async fn chat_returns_updated_history_and_clears() -> anyhow::Result<()> {
    let fx = fixture().await?;

    let first = fx
        .engine
        .chat(ChatRequest {
            message: "first message".to_string(),
            paths: both_docs(),
            history: None,
            conversation_id: None,
            top_k: None,
        })
        .await?;
    assert_eq!(first.conversation_id, "default");
    assert_eq!(first.updated_history.len(), 1);
    assert_eq!(first.answer, first.response);
    assert_eq!(first.updated_history[0].question, "first message");

    // Caller-supplied history overwrites the stored session.
    let seeded = fx
        .engine
        .chat(ChatRequest {
            message: "follow-up".to_string(),
            paths: both_docs(),
            history: Some(Vec::new()),
            conversation_id: None,
            top_k: None,
        })
        .await?;
    assert_eq!(seeded.updated_history.len(), 1);
    assert_eq!(seeded.updated_history[0].question, "follow-up");

    assert!(fx.engine.clear_conversation("default"));
    assert!(fx.engine.conversation_history("default").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_documents_answer_neutrally() -> anyhow::Result<()> {
    let fx = fixture().await?;

    let query = fx
        .engine
        .query(QueryRequest {
            question: "anything".to_string(),
            paths: PathSpec::One("empty".to_string()),
            top_k: None,
        })
        .await?;
    assert_eq!(query.answer, NO_DOCUMENTS_ANSWER);
    assert!(query.sources.is_empty());

    let search = fx
        .engine
        .search(SearchRequest {
            query: "anything".to_string(),
            paths: PathSpec::One("empty".to_string()),
            top_k: None,
        })
        .await?;
    assert_eq!(search.total, 0);

    // No chat completion was attempted for the empty result.
    assert!(fx.chat.prompts().is_empty());
    Ok(())
}

#[tokio::test]
async fn traversal_outside_the_root_is_rejected() -> anyhow::Result<()> {
    let fx = fixture().await?;

    let err = fx
        .engine
        .query(QueryRequest {
            question: "secrets".to_string(),
            paths: PathSpec::One("../outside.txt".to_string()),
            top_k: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RetrieveError::PathInvalid { .. }));

    // Rejected before any I/O: the loader never ran.
    assert_eq!(fx.loader.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn stats_reflect_service_state() -> anyhow::Result<()> {
    let fx = fixture().await?;

    fx.engine
        .search(SearchRequest {
            query: "models".to_string(),
            paths: both_docs(),
            top_k: Some(1),
        })
        .await?;
    fx.engine
        .chat(ChatRequest {
            message: "hello".to_string(),
            paths: both_docs(),
            history: None,
            conversation_id: Some("s".to_string()),
            top_k: None,
        })
        .await?;

    let stats = fx.engine.stats().await;
    assert_eq!(stats.embedding_model, "test:hash:16");
    assert_eq!(stats.chat_model.as_deref(), Some("scripted"));
    assert_eq!(stats.cached_indices, 1);
    assert_eq!(stats.cached_keys, vec!["docs/a.txt|docs/b.txt".to_string()]);
    assert_eq!(stats.active_conversations, 1);
    assert_eq!(stats.persisted_indices, 1);
    Ok(())
}
