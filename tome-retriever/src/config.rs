//! Service configuration.
//!
//! One [`ServiceConfig`] instance is owned by the retrieval engine; nothing
//! here is global. Values can be set programmatically with the `with_*`
//! builders or loaded from a TOML file.

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tome_context::SplitConfig;

/// Configuration for the chat-completion collaborator (OpenAI-compatible
/// `/chat/completions` endpoint).
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Base URL of the compatible endpoint, without the `/chat/completions`
    /// suffix.
    pub base_url: String,
    /// Model name sent with each request.
    pub model: String,
    /// API key; falls back to the `TOME_API_KEY` environment variable when
    /// unset.
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling cutoff.
    pub top_p: f32,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope-intl.aliyuncs.com/compatible-mode/v1".to_string(),
            model: "qwen-plus".to_string(),
            api_key: None,
            temperature: 0.1,
            top_p: 0.9,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Configuration for the retrieval service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root directory all request paths must resolve under.
    pub documents_root: PathBuf,
    /// Directory holding persisted index entries.
    pub store_root: PathBuf,
    /// How long a memory-tier cache entry stays valid.
    pub cache_ttl: Duration,
    /// Upper bound on a single index build or disk load.
    pub build_timeout: Duration,
    /// Persist freshly built indices to disk so restarts can reuse them.
    pub persist_on_build: bool,
    /// Chunking parameters passed to the text splitter.
    pub split: SplitConfig,
    /// Default number of chunks retrieved for query/chat.
    pub query_top_k: usize,
    /// Default number of results for search.
    pub search_top_k: usize,
    /// Chat-completion collaborator settings.
    pub chat: ChatConfig,
}

impl ServiceConfig {
    /// Create a configuration with defaults for everything but the two roots.
    pub fn new(documents_root: impl Into<PathBuf>, store_root: impl Into<PathBuf>) -> Self {
        Self {
            documents_root: documents_root.into(),
            store_root: store_root.into(),
            cache_ttl: Duration::from_secs(3600),
            build_timeout: Duration::from_secs(120),
            persist_on_build: true,
            split: SplitConfig::default(),
            query_top_k: 3,
            search_top_k: 5,
            chat: ChatConfig::default(),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    pub fn with_persist_on_build(mut self, persist: bool) -> Self {
        self.persist_on_build = persist;
        self
    }

    pub fn with_split(mut self, split: SplitConfig) -> Self {
        self.split = split;
        self
    }

    pub fn with_chat(mut self, chat: ChatConfig) -> Self {
        self.chat = chat;
        self
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(file.into_config())
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    documents_root: PathBuf,
    store_root: PathBuf,
    cache_ttl_seconds: Option<u64>,
    build_timeout_seconds: Option<u64>,
    persist_on_build: Option<bool>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    separators: Option<Vec<String>>,
    query_top_k: Option<usize>,
    search_top_k: Option<usize>,
    chat: Option<ChatSection>,
}

#[derive(Debug, Deserialize)]
struct ChatSection {
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    temperature: Option<f32>,
    top_p: Option<f32>,
    request_timeout_seconds: Option<u64>,
}

impl ConfigFile {
    fn into_config(self) -> ServiceConfig {
        let mut config = ServiceConfig::new(self.documents_root, self.store_root);
        if let Some(secs) = self.cache_ttl_seconds {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = self.build_timeout_seconds {
            config.build_timeout = Duration::from_secs(secs);
        }
        if let Some(persist) = self.persist_on_build {
            config.persist_on_build = persist;
        }
        if let Some(size) = self.chunk_size {
            config.split.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            config.split.chunk_overlap = overlap;
        }
        if let Some(separators) = self.separators {
            config.split.separators = separators;
        }
        if let Some(k) = self.query_top_k {
            config.query_top_k = k;
        }
        if let Some(k) = self.search_top_k {
            config.search_top_k = k;
        }
        if let Some(chat) = self.chat {
            let mut chat_config = ChatConfig::default();
            if let Some(base_url) = chat.base_url {
                chat_config.base_url = base_url;
            }
            if let Some(model) = chat.model {
                chat_config.model = model;
            }
            chat_config.api_key = chat.api_key;
            if let Some(temperature) = chat.temperature {
                chat_config.temperature = temperature;
            }
            if let Some(top_p) = chat.top_p {
                chat_config.top_p = top_p;
            }
            if let Some(secs) = chat.request_timeout_seconds {
                chat_config.request_timeout = Duration::from_secs(secs);
            }
            config.chat = chat_config;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServiceConfig::new("/docs", "/store");
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.split.chunk_size, 500);
        assert_eq!(config.split.chunk_overlap, 50);
        assert_eq!(config.query_top_k, 3);
        assert_eq!(config.search_top_k, 5);
        assert!(config.persist_on_build);
    }

    #[test]
    fn toml_round_trip() {
        let raw = r#"
            documents_root = "/srv/docs"
            store_root = "/srv/store"
            cache_ttl_seconds = 120
            chunk_size = 800
            search_top_k = 10

            [chat]
            model = "test-model"
            temperature = 0.5
        "#;
        let file: ConfigFile = toml::from_str(raw).unwrap();
        let config = file.into_config();
        assert_eq!(config.documents_root, PathBuf::from("/srv/docs"));
        assert_eq!(config.cache_ttl, Duration::from_secs(120));
        assert_eq!(config.split.chunk_size, 800);
        // Unset fields keep their defaults.
        assert_eq!(config.split.chunk_overlap, 50);
        assert_eq!(config.search_top_k, 10);
        assert_eq!(config.chat.model, "test-model");
        assert_eq!(config.chat.top_p, 0.9);
    }
}
