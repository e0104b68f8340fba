//! Embedding provider abstraction and implementations.
//!
//! This module defines the interface for text embedding generation and provides
//! implementations for local models (fastembed), remote APIs (OpenAI) and a
//! deterministic hashing embedder that needs no model at all.
//!
//! The abstraction allows the system to swap between different embedding models
//! without changing the core logic of ingestion or search.

pub mod fastembed;
pub mod hashing;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::{EmbeddingProviderKind, EmbeddingSettings};

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The model could not be loaded; fatal to the current run
    #[error("Embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// Network or API communication error
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Invalid input text (e.g., empty, too long)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., missing API key)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The embedding call did not finish in time
    #[error("Embedding timed out after {0:?}")]
    Timeout(Duration),

    /// Other unexpected errors
    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Implementors of this trait can generate vector embeddings from text inputs.
/// The trait is async to support API-based embedding services.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Arguments
    /// * `text` - The input text to embed (should be pre-normalized)
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the embedding generation fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts in a single batch.
    ///
    /// # Returns
    /// A vector of embedding vectors, in the same order as the input texts
    ///
    /// # Errors
    /// Returns `EmbeddingError` if any embedding generation fails
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Get the dimension of embeddings produced by this provider.
    fn dimension(&self) -> usize;

    /// Get the model name/identifier for this provider.
    fn model_name(&self) -> &str;
}

/// Normalizes text for consistent embedding generation.
///
/// This function applies the following transformations:
/// - Converts to lowercase
/// - Trims leading/trailing whitespace
/// - Collapses runs of whitespace (including newlines) to a single space
pub fn normalize_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run CPU-bound model work on the blocking pool so the caller's task keeps
/// yielding and timeouts can fire.
pub(crate) async fn run_blocking<T, F>(work: F) -> EmbeddingResult<T>
where
    F: FnOnce() -> EmbeddingResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EmbeddingError::Other(format!("Embedding task failed: {}", e)))?
}

/// Wraps a provider and bounds every call with a timeout.
///
/// Providers must not block the async task; a synchronous model call has to
/// go through the blocking pool or the timer never gets polled.
pub struct TimedEmbedding<E> {
    inner: E,
    timeout: Duration,
}

impl<E: EmbeddingProvider> TimedEmbedding<E> {
    pub fn new(inner: E, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: EmbeddingProvider> EmbeddingProvider for TimedEmbedding<E> {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        tokio::time::timeout(self.timeout, self.inner.embed(text))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeout))?
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        tokio::time::timeout(self.timeout, self.inner.embed_batch(texts))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeout))?
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Runtime-selected provider, used by the binaries.
pub enum AnyEmbeddingProvider {
    FastEmbed(fastembed::FastEmbedProvider),
    OpenAI(openai::OpenAIEmbedding),
    Hashing(hashing::HashingEmbedding),
}

impl AnyEmbeddingProvider {
    /// Build the provider selected in `settings`.
    ///
    /// The OpenAI provider reads its key from `OPENAI_API_KEY`.
    pub fn from_settings(settings: &EmbeddingSettings) -> EmbeddingResult<Self> {
        let provider = match settings.provider {
            EmbeddingProviderKind::Fastembed => AnyEmbeddingProvider::FastEmbed(fastembed::FastEmbedProvider::from_name(
                settings.model.as_deref(),
                settings.resolved_cache_dir(),
            )?),
            EmbeddingProviderKind::Openai => AnyEmbeddingProvider::OpenAI(openai::OpenAIEmbedding::from_env(
                &settings.api_base,
                settings.model.clone(),
                settings.dimension,
            )?),
            EmbeddingProviderKind::Hashing => AnyEmbeddingProvider::Hashing(hashing::HashingEmbedding::new(
                settings.dimension.unwrap_or(hashing::DEFAULT_HASHING_DIMENSION),
            )),
        };

        info!(
            provider = settings.provider.as_str(),
            model = provider.model_name(),
            dimension = provider.dimension(),
            "Embedding provider ready"
        );
        Ok(provider)
    }
}

#[async_trait]
impl EmbeddingProvider for AnyEmbeddingProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            AnyEmbeddingProvider::FastEmbed(p) => p.embed(text).await,
            AnyEmbeddingProvider::OpenAI(p) => p.embed(text).await,
            AnyEmbeddingProvider::Hashing(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            AnyEmbeddingProvider::FastEmbed(p) => p.embed_batch(texts).await,
            AnyEmbeddingProvider::OpenAI(p) => p.embed_batch(texts).await,
            AnyEmbeddingProvider::Hashing(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            AnyEmbeddingProvider::FastEmbed(p) => p.dimension(),
            AnyEmbeddingProvider::OpenAI(p) => p.dimension(),
            AnyEmbeddingProvider::Hashing(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            AnyEmbeddingProvider::FastEmbed(p) => p.model_name(),
            AnyEmbeddingProvider::OpenAI(p) => p.model_name(),
            AnyEmbeddingProvider::Hashing(p) => p.model_name(),
        }
    }
}
