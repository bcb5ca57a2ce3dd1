use crate::config::DEFAULT_VECTOR_WEIGHT;
use crate::traits::ChunkStore;
use crate::{Chunk, SearchFilters, StoreError};
use tracing::debug;

/// Weighted combination of vector similarity and full-text rank.
///
/// A missing full-text rank contributes zero. Ranks above 1 are not clamped.
pub fn fuse_scores(vector_score: f64, fts_score: Option<f64>, vector_weight: f64) -> f64 {
    vector_weight * vector_score + (1.0 - vector_weight) * fts_score.unwrap_or(0.0)
}

pub fn fuse_scores_default(vector_score: f64, fts_score: Option<f64>) -> f64 {
    fuse_scores(vector_score, fts_score, DEFAULT_VECTOR_WEIGHT)
}

/// First `k` chunks of an already ordered slice. Never reorders.
pub fn get_top_k_chunks(chunks: &[Chunk], k: usize) -> &[Chunk] {
    &chunks[..k.min(chunks.len())]
}

/// Assigns fused scores and orders by descending score; equal scores keep their input order.
pub fn rank_by_fused_score(mut chunks: Vec<Chunk>, vector_weight: f64) -> Vec<Chunk> {
    for chunk in &mut chunks {
        chunk.score = fuse_scores(chunk.similarity, chunk.fts_rank, vector_weight);
    }
    chunks.sort_by(|left, right| right.score.total_cmp(&left.score));
    chunks
}

pub struct HybridSearch<S> {
    store: S,
    vector_weight: f64,
    use_full_text: bool,
}

impl<S> HybridSearch<S>
where
    S: ChunkStore,
{
    pub fn new(store: S, vector_weight: f64, use_full_text: bool) -> Self {
        Self {
            store,
            vector_weight,
            use_full_text,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn uses_full_text(&self) -> bool {
        self.use_full_text
    }

    pub async fn search(
        &self,
        document_id: &str,
        query_vector: &[f32],
        query_text: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Chunk>, StoreError> {
        self.search_documents(&[document_id.to_string()], query_vector, query_text, filters)
            .await
    }

    /// Queries each document in turn and ranks the merged candidates.
    pub async fn search_documents(
        &self,
        document_ids: &[String],
        query_vector: &[f32],
        query_text: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Chunk>, StoreError> {
        let text = if self.use_full_text && !query_text.trim().is_empty() {
            Some(query_text)
        } else {
            None
        };

        let mut candidates = Vec::new();
        for document_id in document_ids {
            let found = self
                .store
                .query_chunks(document_id, query_vector, text, filters)
                .await?;
            debug!(document_id = %document_id, candidates = found.len(), "chunk store query");
            candidates.extend(found);
        }

        Ok(rank_by_fused_score(candidates, self.vector_weight))
    }
}
