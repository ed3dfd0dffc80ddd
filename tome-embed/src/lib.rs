//! # tome-embed
//!
//! Text embedding generation behind a provider trait, with a local ONNX
//! implementation via FastEmbed. Embeddings are returned as normalized
//! half-precision (f16) vectors to keep index memory and on-disk size down.
//!
//! The provider's [`model_id`](EmbeddingProvider::model_id) uniquely
//! identifies the embedding space (provider, model, dimension, normalization).
//! Anything that persists embeddings should record this id and refuse to mix
//! vectors produced under different ids.
//!
//! ```no_run
//! use tome_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//! let result = provider.embed_texts(&["hello world".to_string()]).await?;
//! assert_eq!(result.dimension, provider.dimension());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod provider;

pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};
