//! OpenAI embedding provider implementation.
//!
//! Talks to any OpenAI-compatible `/embeddings` endpoint.

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default embedding model for the remote API.
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";

/// OpenAI embedding provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAIEmbedding {
    client: Client,

    /// Full URL of the embeddings endpoint
    endpoint: String,

    /// Model identifier (e.g., "text-embedding-3-small")
    model: String,

    /// Expected dimension of the embedding vectors
    embedding_dimension: usize,

    /// Sent as `dimensions` when the model supports shortened vectors
    request_dimensions: Option<usize>,
}

/// Vector size of the OpenAI embedding models.
pub fn known_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

impl OpenAIEmbedding {
    /// Create a new OpenAI embedding provider.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `api_base` - Base URL, e.g. `https://api.openai.com/v1`
    /// * `model` - Model name (defaults to "text-embedding-3-small" if None)
    /// * `dimension` - Vector size; required for models not listed in
    ///   [`known_dimension`], and requested from the API for the
    ///   `text-embedding-3` family
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` for an empty or malformed key, or
    /// when the size of an unknown model is not given
    pub fn new(
        api_key: &str,
        api_base: &str,
        model: Option<String>,
        dimension: Option<usize>,
    ) -> EmbeddingResult<Self> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::ConfigError("missing OpenAI API key".to_string()));
        }

        let model = model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let embedding_dimension = dimension.or_else(|| known_dimension(&model)).ok_or_else(|| {
            EmbeddingError::ConfigError(format!(
                "embedding size of model '{}' is unknown; set embedding.dimension",
                model
            ))
        })?;
        let request_dimensions = dimension.filter(|_| model.starts_with("text-embedding-3"));

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|e| EmbeddingError::ConfigError(format!("invalid OpenAI API key: {}", e)))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", api_base.trim_end_matches('/')),
            model,
            embedding_dimension,
            request_dimensions,
        })
    }

    /// Read the key from `OPENAI_API_KEY`.
    pub fn from_env(api_base: &str, model: Option<String>, dimension: Option<usize>) -> EmbeddingResult<Self> {
        let key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EmbeddingError::ConfigError("OPENAI_API_KEY is not set".to_string()))?;
        Self::new(&key, api_base, model, dimension)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

/// Order the response by input index and check its shape.
fn collect_embeddings(mut parsed: EmbeddingResponse, inputs: usize, dimension: usize) -> EmbeddingResult<Vec<Vec<f32>>> {
    parsed.data.sort_by_key(|entry| entry.index);

    if parsed.data.len() != inputs {
        return Err(EmbeddingError::ApiError(format!(
            "returned {} embeddings for {} inputs",
            parsed.data.len(),
            inputs
        )));
    }
    if let Some(entry) = parsed.data.iter().find(|entry| entry.embedding.len() != dimension) {
        return Err(EmbeddingError::ApiError(format!(
            "returned {}-dimensional embeddings, expected {}",
            entry.embedding.len(),
            dimension
        )));
    }

    Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }

        debug!(endpoint = %self.endpoint, batch = texts.len(), "Requesting embeddings");

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::ApiError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingError::ApiError(format!("{}: {}", status, body)));
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::ApiError(format!("failed to parse response: {}", e)))?;

        collect_embeddings(parsed, texts.len(), self.embedding_dimension)
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
