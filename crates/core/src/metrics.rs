use crate::confidence::{has_relevant_result, top_similarity, ConfidenceLevel, RecallConfidence};
use crate::Chunk;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

/// Summary of one retrieval, logged and returned alongside the context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalMetrics {
    pub query_length: usize,
    pub candidates_retrieved: usize,
    pub chunks_returned: usize,
    pub top_score: Option<f64>,
    pub average_score: Option<f64>,
    pub latency_ms: u64,
    pub used_hybrid: bool,
    pub reranker: String,
    pub confidence: RecallConfidence,
    pub has_relevant_result: bool,
}

impl RetrievalMetrics {
    pub fn collect(
        query: &str,
        candidates_retrieved: usize,
        chunks: &[Chunk],
        reranker: &str,
        confidence: ConfidenceLevel,
        used_hybrid: bool,
        elapsed: Duration,
    ) -> Self {
        Self {
            query_length: query.chars().count(),
            candidates_retrieved,
            chunks_returned: chunks.len(),
            top_score: top_similarity(chunks),
            average_score: average_similarity(chunks),
            latency_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            used_hybrid,
            reranker: reranker.to_string(),
            confidence: confidence.to_recall(),
            has_relevant_result: has_relevant_result(chunks),
        }
    }

    pub fn log(&self) {
        info!(
            query_length = self.query_length,
            candidates = self.candidates_retrieved,
            returned = self.chunks_returned,
            top_score = self.top_score.unwrap_or_default(),
            average_score = self.average_score.unwrap_or_default(),
            latency_ms = self.latency_ms,
            hybrid = self.used_hybrid,
            reranker = %self.reranker,
            confidence = ?self.confidence,
            relevant = self.has_relevant_result,
            "retrieval complete"
        );
    }
}

fn average_similarity(chunks: &[Chunk]) -> Option<f64> {
    let scores: Vec<f64> = chunks
        .iter()
        .map(|chunk| chunk.similarity)
        .filter(|score| !score.is_nan())
        .collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}
