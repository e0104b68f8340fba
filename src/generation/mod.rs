//! Text generation for query rewriting.
//!
//! A [`TextGenerator`] turns a prompt plus a system instruction into text.
//! [`QueryRewriter`] uses one to reformulate a search query before it is
//! embedded, bounded by a timeout.

pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by a text generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Network or API communication error
    #[error("Generation request failed: {0}")]
    ApiError(String),

    /// The backend answered with nothing usable
    #[error("Empty generation response")]
    EmptyResponse,

    /// Missing key, bad URL and similar
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
}

pub type GenerationResult<T> = Result<T, GenerationError>;

/// A chat-style text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for `prompt`, with `instruction` as the system message.
    async fn generate(&self, prompt: &str, instruction: &str) -> GenerationResult<String>;

    fn model_name(&self) -> &str;
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    async fn generate(&self, prompt: &str, instruction: &str) -> GenerationResult<String> {
        (**self).generate(prompt, instruction).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Rewrites a free-text query through a [`TextGenerator`].
pub struct QueryRewriter<G> {
    generator: G,
    instruction: String,
    timeout: Duration,
}

impl<G: TextGenerator> QueryRewriter<G> {
    pub fn new(generator: G, instruction: impl Into<String>, timeout: Duration) -> Self {
        Self {
            generator,
            instruction: instruction.into(),
            timeout,
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Rewrite `query`. Blank output counts as a failure.
    pub async fn rewrite(&self, query: &str) -> GenerationResult<String> {
        let rewritten = tokio::time::timeout(
            self.timeout,
            self.generator.generate(query, &self.instruction),
        )
        .await
        .map_err(|_| GenerationError::Timeout(self.timeout))
        .and_then(|result| result)
        .map_err(|e| {
            warn!(model = self.generator.model_name(), error = %e, "Query rewrite failed");
            e
        })?;

        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        debug!(original = query, rewritten, "Rewrote query");
        Ok(rewritten.to_string())
    }
}
