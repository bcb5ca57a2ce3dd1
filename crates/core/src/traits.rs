use crate::{Chunk, ConversationMessage, ProviderFailure, SearchFilters, StoreError};
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEmbedding {
    pub index: usize,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f64,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Embeds one provider-sized batch. Returned vectors carry the index of their input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>, ProviderFailure>;
}

#[async_trait]
pub trait RerankProvider: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankHit>, ProviderFailure>;
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Returns candidates scoped to `document_id` with vector similarity and, when
    /// `query_text` is given, a full-text rank.
    async fn query_chunks(
        &self,
        document_id: &str,
        query_vector: &[f32],
        query_text: Option<&str>,
        filters: &SearchFilters,
    ) -> Result<Vec<Chunk>, StoreError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Messages of the conversation, oldest first.
    async fn get_history(&self, conversation_id: &str) -> Result<Vec<ConversationMessage>, StoreError>;
}
