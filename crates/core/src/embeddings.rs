use crate::config::EmbeddingSettings;
use crate::error::{ConfigError, EmbeddingError, FailureKind, ProviderFailure};
use crate::traits::{EmbeddingProvider, IndexedEmbedding};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "text-embedding-3-small";
const OPENAI_DIMENSIONS: usize = 1536;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Offline embedder that hashes character trigrams into a fixed-size, L2-normalised vector.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>, ProviderFailure> {
        Ok(texts
            .iter()
            .enumerate()
            .map(|(index, text)| IndexedEmbedding {
                index,
                embedding: self.embed_text(text),
            })
            .collect())
    }
}

/// Embedding provider for the OpenAI `/embeddings` endpoint and compatible servers.
pub struct OpenAiEmbeddingProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
    request_dimensions: Option<usize>,
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingKey("embedding"));
        }

        Ok(Self {
            client: Client::new(),
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            model: OPENAI_MODEL.to_string(),
            dimensions: OPENAI_DIMENSIONS,
            request_dimensions: None,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self.request_dimensions = Some(dimensions);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>, ProviderFailure> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
                dimensions: self.request_dimensions,
            })
            .send()
            .await
            .map_err(|error| ProviderFailure::from_transport(&error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderFailure::from_status(status.as_u16(), &body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| ProviderFailure::new(FailureKind::Malformed, error.to_string()))?;

        Ok(parsed
            .data
            .into_iter()
            .map(|item| IndexedEmbedding {
                index: item.index,
                embedding: item.embedding,
            })
            .collect())
    }
}

/// Batches texts for an [`EmbeddingProvider`], retries transient failures and
/// restores input order.
pub struct EmbeddingClient<P> {
    provider: P,
    settings: EmbeddingSettings,
}

impl<P> EmbeddingClient<P>
where
    P: EmbeddingProvider,
{
    pub fn new(provider: P, settings: EmbeddingSettings) -> Self {
        Self { provider, settings }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(index) = texts.iter().position(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::EmptyText { index });
        }

        let batch_size = self.settings.batch_size.max(1);
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_number, batch) in texts.chunks(batch_size).enumerate() {
            debug!(batch_number, batch_len = batch.len(), "embedding batch");
            vectors.extend(self.embed_with_retry(batch).await?);
        }

        Ok(vectors)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            EmbeddingError::Terminal(ProviderFailure::new(
                FailureKind::Malformed,
                "provider returned no embedding",
            ))
        })
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut delay = self.settings.initial_backoff;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let outcome = self
                .provider
                .embed_batch(batch)
                .await
                .and_then(|embeddings| order_by_index(embeddings, batch.len()));

            let failure = match outcome {
                Ok(vectors) => return Ok(vectors),
                Err(failure) => failure,
            };

            if !failure.is_retryable() {
                return Err(EmbeddingError::Terminal(failure));
            }
            if attempts > self.settings.max_retries {
                warn!(attempts, error = %failure, "embedding retries exhausted");
                return Err(EmbeddingError::Exhausted {
                    attempts,
                    source: failure,
                });
            }

            warn!(
                attempt = attempts,
                max_retries = self.settings.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "embedding request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);
        }
    }
}

fn order_by_index(
    mut embeddings: Vec<IndexedEmbedding>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderFailure> {
    embeddings.sort_by_key(|item| item.index);

    let complete = embeddings.len() == expected
        && embeddings
            .iter()
            .enumerate()
            .all(|(position, item)| item.index == position);
    if !complete {
        return Err(ProviderFailure::new(
            FailureKind::Malformed,
            format!(
                "expected {expected} embeddings indexed 0..{expected}, got {}",
                embeddings.len()
            ),
        ));
    }

    Ok(embeddings.into_iter().map(|item| item.embedding).collect())
}
