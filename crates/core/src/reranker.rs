use crate::config::ProviderKeys;
use crate::error::{ConfigError, FailureKind, ProviderFailure};
use crate::traits::{RerankHit, RerankProvider};
use crate::Chunk;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const COHERE_RERANK_URL: &str = "https://api.cohere.com/v2/rerank";
const COHERE_MODEL: &str = "rerank-v3.5";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    /// Nothing to reorder: the input already fits in `top_n`.
    NotNeeded,
    /// No rerank provider is configured.
    Disabled,
    ProviderError(ProviderFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RerankOutcome {
    Reranked(Vec<Chunk>),
    FellBack {
        chunks: Vec<Chunk>,
        reason: FallbackReason,
    },
}

impl RerankOutcome {
    pub fn chunks(&self) -> &[Chunk] {
        match self {
            RerankOutcome::Reranked(chunks) => chunks,
            RerankOutcome::FellBack { chunks, .. } => chunks,
        }
    }

    pub fn into_chunks(self) -> Vec<Chunk> {
        match self {
            RerankOutcome::Reranked(chunks) => chunks,
            RerankOutcome::FellBack { chunks, .. } => chunks,
        }
    }

    pub fn was_reranked(&self) -> bool {
        matches!(self, RerankOutcome::Reranked(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            RerankOutcome::Reranked(_) => "reranked",
            RerankOutcome::FellBack {
                reason: FallbackReason::NotNeeded,
                ..
            } => "not_needed",
            RerankOutcome::FellBack {
                reason: FallbackReason::Disabled,
                ..
            } => "disabled",
            RerankOutcome::FellBack {
                reason: FallbackReason::ProviderError(_),
                ..
            } => "fallback",
        }
    }
}

/// Reranks `chunks` against `query` with `provider`, keeping the best `top_n`.
pub async fn rerank_with<R>(
    query: &str,
    chunks: Vec<Chunk>,
    provider: Option<&R>,
    top_n: usize,
) -> RerankOutcome
where
    R: RerankProvider + ?Sized,
{
    if chunks.len() <= top_n {
        return RerankOutcome::FellBack {
            chunks,
            reason: FallbackReason::NotNeeded,
        };
    }

    let Some(provider) = provider else {
        return fall_back(chunks, top_n, FallbackReason::Disabled);
    };

    let documents: Vec<String> = chunks.iter().map(|chunk| chunk.content.clone()).collect();
    let hits = match provider.rerank(query, &documents, top_n).await {
        Ok(hits) => hits,
        Err(failure) => {
            warn!(error = %failure, "rerank request failed, keeping retrieval order");
            return fall_back(chunks, top_n, FallbackReason::ProviderError(failure));
        }
    };

    match apply_hits(chunks, hits, top_n) {
        Ok(reranked) => {
            debug!(returned = reranked.len(), "reranked chunks");
            RerankOutcome::Reranked(reranked)
        }
        Err((chunks, failure)) => {
            warn!(error = %failure, "rerank response unusable, keeping retrieval order");
            fall_back(chunks, top_n, FallbackReason::ProviderError(failure))
        }
    }
}

/// Reranks with the hosted Cohere API when `api_key` is usable, otherwise falls back.
pub async fn rerank_chunks(
    query: &str,
    chunks: Vec<Chunk>,
    api_key: Option<&str>,
    top_n: usize,
) -> RerankOutcome {
    let reranker = api_key.and_then(|key| CohereReranker::new(key).ok());
    rerank_with(query, chunks, reranker.as_ref(), top_n).await
}

fn fall_back(mut chunks: Vec<Chunk>, top_n: usize, reason: FallbackReason) -> RerankOutcome {
    chunks.truncate(top_n);
    RerankOutcome::FellBack { chunks, reason }
}

fn apply_hits(
    chunks: Vec<Chunk>,
    mut hits: Vec<RerankHit>,
    top_n: usize,
) -> Result<Vec<Chunk>, (Vec<Chunk>, ProviderFailure)> {
    let mut seen = vec![false; chunks.len()];
    for hit in &hits {
        let valid = hit.index < chunks.len() && !seen[hit.index] && !hit.relevance_score.is_nan();
        if !valid {
            let failure = ProviderFailure::new(
                FailureKind::Malformed,
                format!("invalid rerank result index {}", hit.index),
            );
            return Err((chunks, failure));
        }
        seen[hit.index] = true;
    }
    if hits.is_empty() {
        let failure = ProviderFailure::new(FailureKind::Malformed, "empty rerank result");
        return Err((chunks, failure));
    }

    hits.sort_by(|left, right| right.relevance_score.total_cmp(&left.relevance_score));

    let mut slots: Vec<Option<Chunk>> = chunks.into_iter().map(Some).collect();
    Ok(hits
        .into_iter()
        .take(top_n)
        .filter_map(|hit| {
            slots[hit.index].take().map(|mut chunk| {
                chunk.rerank_score = Some(hit.relevance_score);
                chunk
            })
        })
        .collect())
}

/// Cross-encoder reranking through the Cohere `/v2/rerank` endpoint.
pub struct CohereReranker {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
}

impl CohereReranker {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingKey("rerank"));
        }
        Ok(Self {
            client: Client::new(),
            api_key,
            endpoint: COHERE_RERANK_URL.to_string(),
            model: COHERE_MODEL.to_string(),
        })
    }

    pub fn from_keys(keys: &ProviderKeys) -> Result<Self, ConfigError> {
        Self::new(keys.require_rerank_key()?)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRow>,
}

#[derive(Deserialize)]
struct RerankResultRow {
    index: usize,
    relevance_score: f64,
}

#[async_trait]
impl RerankProvider for CohereReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, ProviderFailure> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&RerankRequest {
                model: &self.model,
                query,
                documents,
                top_n,
            })
            .send()
            .await
            .map_err(|error| ProviderFailure::from_transport(&error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderFailure::from_status(status.as_u16(), &body));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|error| ProviderFailure::new(FailureKind::Malformed, error.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|row| RerankHit {
                index: row.index,
                relevance_score: row.relevance_score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunks(count: usize) -> Vec<Chunk> {
        (0..count)
            .map(|index| Chunk {
                chunk_id: format!("c{index}"),
                document_id: "doc".to_string(),
                document_name: None,
                page_number: index as u32 + 1,
                content: format!("section {index}"),
                bounding_box: None,
                similarity: 0.9 - index as f64 * 0.1,
                fts_rank: None,
                score: 0.9 - index as f64 * 0.1,
                rerank_score: None,
            })
            .collect()
    }

    fn ids(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|chunk| chunk.chunk_id.as_str()).collect()
    }

    enum Script {
        Hits(Vec<RerankHit>),
        Fail(ProviderFailure),
    }

    struct FakeReranker {
        script: Script,
        calls: AtomicUsize,
    }

    impl FakeReranker {
        fn new(script: Script) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RerankProvider for FakeReranker {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[String],
            _top_n: usize,
        ) -> Result<Vec<RerankHit>, ProviderFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Hits(hits) => Ok(hits.clone()),
                Script::Fail(failure) => Err(failure.clone()),
            }
        }
    }

    fn hit(index: usize, relevance_score: f64) -> RerankHit {
        RerankHit {
            index,
            relevance_score,
        }
    }

    #[tokio::test]
    async fn empty_input_makes_no_call() {
        let reranker = FakeReranker::new(Script::Hits(Vec::new()));
        let outcome = rerank_with("q", Vec::new(), Some(&reranker), 5).await;
        assert!(outcome.chunks().is_empty());
        assert_eq!(reranker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn input_within_top_n_is_returned_untouched() {
        let input = chunks(5);
        let reranker = FakeReranker::new(Script::Hits(vec![hit(4, 0.99)]));
        let outcome = rerank_with("q", input.clone(), Some(&reranker), 5).await;

        assert_eq!(outcome.chunks(), input.as_slice());
        assert_eq!(outcome.label(), "not_needed");
        assert_eq!(reranker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reorders_by_relevance_and_records_scores() {
        let reranker = FakeReranker::new(Script::Hits(vec![
            hit(0, 0.10),
            hit(5, 0.95),
            hit(2, 0.60),
            hit(3, 0.80),
        ]));
        let outcome = rerank_with("flood", chunks(8), Some(&reranker), 3).await;

        assert!(outcome.was_reranked());
        let reranked = outcome.into_chunks();
        assert_eq!(ids(&reranked), vec!["c5", "c3", "c2"]);
        assert_eq!(reranked[0].rerank_score, Some(0.95));
    }

    #[tokio::test]
    async fn provider_error_falls_back_to_original_prefix() {
        let reranker = FakeReranker::new(Script::Fail(ProviderFailure::new(
            FailureKind::Client(401),
            "invalid api token",
        )));
        let outcome = rerank_with("q", chunks(8), Some(&reranker), 5).await;

        assert!(!outcome.was_reranked());
        assert!(matches!(
            &outcome,
            RerankOutcome::FellBack {
                reason: FallbackReason::ProviderError(_),
                ..
            }
        ));
        assert_eq!(ids(outcome.chunks()), vec!["c0", "c1", "c2", "c3", "c4"]);
    }

    #[tokio::test]
    async fn out_of_range_index_is_treated_as_unavailable() {
        let reranker = FakeReranker::new(Script::Hits(vec![hit(42, 0.9)]));
        let outcome = rerank_with("q", chunks(7), Some(&reranker), 2).await;
        assert_eq!(outcome.label(), "fallback");
        assert_eq!(ids(outcome.chunks()), vec!["c0", "c1"]);
    }

    #[tokio::test]
    async fn missing_provider_falls_back() {
        let outcome = rerank_with::<FakeReranker>("q", chunks(7), None, 5).await;
        assert_eq!(outcome.label(), "disabled");
        assert_eq!(outcome.chunks().len(), 5);
    }

    #[tokio::test]
    async fn missing_key_never_throws() {
        let outcome = rerank_chunks("q", chunks(9), None, 5).await;
        assert_eq!(ids(outcome.chunks()), vec!["c0", "c1", "c2", "c3", "c4"]);

        let outcome = rerank_chunks("q", chunks(9), Some(""), 5).await;
        assert_eq!(outcome.label(), "disabled");
    }

    #[test]
    fn cohere_requires_a_key() {
        assert!(matches!(CohereReranker::new(""), Err(ConfigError::MissingKey("rerank"))));
        let keys = ProviderKeys::default();
        assert!(CohereReranker::from_keys(&keys).is_err());
    }
}
