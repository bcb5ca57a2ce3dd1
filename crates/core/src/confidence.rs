use crate::models::Chunk;
use serde::{Deserialize, Serialize};

/// Top similarity at or above which a retrieval counts as having found something relevant.
pub const RELEVANCE_THRESHOLD: f64 = 0.30;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    NotFound,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::NotFound => "not_found",
        }
    }

    pub fn to_recall(self) -> RecallConfidence {
        match self {
            ConfidenceLevel::High => RecallConfidence::High,
            ConfidenceLevel::Medium | ConfidenceLevel::Low => RecallConfidence::NeedsReview,
            ConfidenceLevel::NotFound => RecallConfidence::NotFound,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecallConfidence {
    High,
    NeedsReview,
    NotFound,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl ConfidenceThresholds {
    /// Thresholds for raw vector similarity.
    pub const fn similarity() -> Self {
        Self {
            high: 0.85,
            medium: 0.60,
            low: RELEVANCE_THRESHOLD,
        }
    }

    /// Thresholds for cross-encoder relevance scores, which sit lower than cosine similarity.
    pub const fn rerank() -> Self {
        Self {
            high: 0.75,
            medium: 0.50,
            low: 0.20,
        }
    }

    /// Thresholds are inclusive lower bounds: `0.30` is `low` under the similarity
    /// thresholds, `0.2999` is `not_found`. NaN is `not_found`.
    pub fn level_for(&self, score: f64) -> ConfidenceLevel {
        if score.is_nan() {
            ConfidenceLevel::NotFound
        } else if score >= self.high {
            ConfidenceLevel::High
        } else if score >= self.medium {
            ConfidenceLevel::Medium
        } else if score >= self.low {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::NotFound
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidencePolicy {
    pub similarity: ConfidenceThresholds,
    pub rerank: ConfidenceThresholds,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            similarity: ConfidenceThresholds::similarity(),
            rerank: ConfidenceThresholds::rerank(),
        }
    }
}

impl ConfidencePolicy {
    /// Classifies a ranked chunk list. Rerank scores take precedence when any chunk carries one.
    pub fn classify(&self, chunks: &[Chunk]) -> ConfidenceLevel {
        if let Some(top) = max_score(chunks.iter().filter_map(|chunk| chunk.rerank_score)) {
            return self.rerank.level_for(top);
        }

        match max_score(chunks.iter().map(|chunk| chunk.similarity)) {
            Some(top) => self.similarity.level_for(top),
            None => ConfidenceLevel::NotFound,
        }
    }
}

pub fn classify_confidence(chunks: &[Chunk]) -> ConfidenceLevel {
    ConfidencePolicy::default().classify(chunks)
}

/// Highest vector similarity among the chunks, ignoring NaN scores.
pub fn top_similarity(chunks: &[Chunk]) -> Option<f64> {
    max_score(chunks.iter().map(|chunk| chunk.similarity))
}

pub fn has_relevant_result(chunks: &[Chunk]) -> bool {
    top_similarity(chunks).is_some_and(|top| top >= RELEVANCE_THRESHOLD)
}

fn max_score(scores: impl Iterator<Item = f64>) -> Option<f64> {
    scores
        .filter(|score| !score.is_nan())
        .fold(None, |best, score| match best {
            Some(current) if current >= score => Some(current),
            _ => Some(score),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(similarity: f64, rerank_score: Option<f64>) -> Chunk {
        Chunk {
            chunk_id: "c".to_string(),
            document_id: "doc".to_string(),
            document_name: None,
            page_number: 1,
            content: "text".to_string(),
            bounding_box: None,
            similarity,
            fts_rank: None,
            score: similarity,
            rerank_score,
        }
    }

    #[test]
    fn empty_input_is_not_found() {
        assert_eq!(classify_confidence(&[]), ConfidenceLevel::NotFound);
        assert!(!has_relevant_result(&[]));
    }

    #[test]
    fn high_threshold_is_inclusive() {
        assert_eq!(classify_confidence(&[chunk_with(0.85, None)]), ConfidenceLevel::High);
        assert_eq!(classify_confidence(&[chunk_with(0.8499, None)]), ConfidenceLevel::Medium);
    }

    #[test]
    fn lowest_threshold_boundary() {
        assert_eq!(classify_confidence(&[chunk_with(0.3, None)]), ConfidenceLevel::Low);
        assert_eq!(classify_confidence(&[chunk_with(0.29999, None)]), ConfidenceLevel::NotFound);
        assert!(has_relevant_result(&[chunk_with(0.3, None)]));
        assert!(!has_relevant_result(&[chunk_with(0.29999, None)]));
    }

    #[test]
    fn uses_best_score_not_first() {
        let chunks = vec![chunk_with(0.4, None), chunk_with(0.9, None)];
        assert_eq!(classify_confidence(&chunks), ConfidenceLevel::High);
    }

    #[test]
    fn rerank_scores_use_rerank_thresholds() {
        let chunks = vec![chunk_with(0.2, Some(0.76)), chunk_with(0.1, Some(0.1))];
        assert_eq!(classify_confidence(&chunks), ConfidenceLevel::High);

        let chunks = vec![chunk_with(0.95, Some(0.19))];
        assert_eq!(classify_confidence(&chunks), ConfidenceLevel::NotFound);
    }

    #[test]
    fn nan_scores_do_not_panic() {
        assert_eq!(classify_confidence(&[chunk_with(f64::NAN, None)]), ConfidenceLevel::NotFound);
        let chunks = vec![chunk_with(f64::NAN, None), chunk_with(0.65, None)];
        assert_eq!(classify_confidence(&chunks), ConfidenceLevel::Medium);
    }

    #[test]
    fn four_levels_collapse_to_recall_scheme() {
        assert_eq!(ConfidenceLevel::High.to_recall(), RecallConfidence::High);
        assert_eq!(ConfidenceLevel::Medium.to_recall(), RecallConfidence::NeedsReview);
        assert_eq!(ConfidenceLevel::Low.to_recall(), RecallConfidence::NeedsReview);
        assert_eq!(ConfidenceLevel::NotFound.to_recall(), RecallConfidence::NotFound);
    }

    #[test]
    fn labels_serialize_in_snake_case() {
        let encoded = serde_json::to_string(&ConfidenceLevel::NotFound).unwrap();
        assert_eq!(encoded, "\"not_found\"");
        let encoded = serde_json::to_string(&RecallConfidence::NeedsReview).unwrap();
        assert_eq!(encoded, "\"needs_review\"");
    }
}
