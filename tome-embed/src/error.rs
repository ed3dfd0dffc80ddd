//! Error types for the embedding system

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type covering configuration, model loading, and generation failures.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The requested model is unknown or the configuration is inconsistent.
    #[error("invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// The model failed to load or initialize.
    #[error("embedding model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: anyhow::Error,
    },

    /// Embedding generation failed at runtime.
    #[error("embedding generation failed: {source}")]
    Generation {
        #[source]
        source: anyhow::Error,
    },

    /// A blocking embedding task panicked or was cancelled.
    #[error("embedding task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl EmbedError {
    /// Wrap an initialization failure from the underlying model runtime.
    pub fn model_init<E: Into<anyhow::Error>>(source: E) -> Self {
        Self::ModelInitialization {
            source: source.into(),
        }
    }

    /// Wrap a generation failure from the underlying model runtime.
    pub fn generation<E: Into<anyhow::Error>>(source: E) -> Self {
        Self::Generation {
            source: source.into(),
        }
    }

    /// Build an invalid-configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
