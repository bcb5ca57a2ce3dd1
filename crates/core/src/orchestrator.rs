use crate::citations::{build_citations, document_count};
use crate::confidence::ConfidenceLevel;
use crate::config::{ProviderKeys, RagConfig};
use crate::embeddings::{EmbeddingClient, OpenAiEmbeddingProvider};
use crate::error::ConfigError;
use crate::history::{truncate_history_with, CharHeuristic};
use crate::metrics::RetrievalMetrics;
use crate::prompt::{apply_not_found_fallback, PromptBuilder, StructuredContext};
use crate::reranker::{rerank_with, CohereReranker, FallbackReason, RerankOutcome};
use crate::search::{get_top_k_chunks, HybridSearch};
use crate::traits::{ChunkStore, ConversationStore, EmbeddingProvider, RerankProvider};
use crate::{
    Chunk, ConversationMessage, MessageRole, PromptMessage, RagError, SearchFilters,
    SourceCitation,
};
use std::time::Instant;
use tracing::debug;

/// Context retrieved for one chat turn.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub query: String,
    pub chunks: Vec<Chunk>,
    pub confidence: ConfidenceLevel,
    pub citations: Vec<SourceCitation>,
    pub document_count: usize,
    /// `None` when the reranker reordered the chunks.
    pub rerank_fallback: Option<FallbackReason>,
    pub metrics: RetrievalMetrics,
}

impl RetrievalResult {
    pub fn was_reranked(&self) -> bool {
        self.rerank_fallback.is_none()
    }
}

pub struct ChatRequest<'a> {
    pub conversation_id: &'a str,
    pub document_ids: &'a [String],
    pub message: &'a str,
    pub structured_context: Option<&'a StructuredContext>,
}

/// Everything the chat handler needs for one turn. Nothing here has been persisted.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub messages: Vec<PromptMessage>,
    pub context: RetrievalResult,
    pub user_message: ConversationMessage,
}

impl ChatTurn {
    /// The assistant reply to persist once the model has answered.
    pub fn assistant_message(&self, content: impl Into<String>) -> ConversationMessage {
        let mut message = ConversationMessage::new(
            self.user_message.conversation_id.clone(),
            MessageRole::Assistant,
            content,
        );
        message.sources = self.context.citations.clone();
        message.confidence = Some(self.context.confidence);
        message
    }
}

pub struct RagPipeline<S, E, R> {
    search: HybridSearch<S>,
    embeddings: EmbeddingClient<E>,
    reranker: Option<R>,
    config: RagConfig,
}

pub type HostedRagPipeline<S> = RagPipeline<S, OpenAiEmbeddingProvider, CohereReranker>;

impl<S> RagPipeline<S, OpenAiEmbeddingProvider, CohereReranker>
where
    S: ChunkStore,
{
    /// Hosted providers from injected keys. The embedding key is mandatory; reranking
    /// is enabled only when a rerank key is present.
    pub fn from_keys(store: S, keys: &ProviderKeys, config: RagConfig) -> Result<Self, ConfigError> {
        let provider = OpenAiEmbeddingProvider::new(keys.require_embedding_key()?)?;
        let reranker = if keys.is_reranker_enabled() {
            Some(CohereReranker::from_keys(keys)?)
        } else {
            None
        };
        let embeddings = EmbeddingClient::new(provider, config.embedding.clone());
        Self::new(store, embeddings, reranker, config)
    }
}

impl<S, E, R> RagPipeline<S, E, R>
where
    S: ChunkStore,
    E: EmbeddingProvider,
    R: RerankProvider,
{
    pub fn new(
        store: S,
        embeddings: EmbeddingClient<E>,
        reranker: Option<R>,
        config: RagConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            search: HybridSearch::new(store, config.vector_weight, config.use_hybrid_search),
            embeddings,
            reranker,
            config,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn is_reranker_enabled(&self) -> bool {
        self.reranker.is_some()
    }

    pub async fn retrieve_context(
        &self,
        document_id: &str,
        query: &str,
    ) -> Result<RetrievalResult, RagError> {
        self.retrieve_context_for_documents(&[document_id.to_string()], query)
            .await
    }

    /// Embed, search, rerank, keep the top `k`, then classify and cite.
    pub async fn retrieve_context_for_documents(
        &self,
        document_ids: &[String],
        query: &str,
    ) -> Result<RetrievalResult, RagError> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidRequest("query is empty".to_string()));
        }
        if document_ids.is_empty() {
            return Err(RagError::InvalidRequest("no documents in scope".to_string()));
        }

        let started = Instant::now();
        let query_vector = self.embeddings.embed_query(query).await?;

        let filters = SearchFilters {
            match_count: self.config.candidate_count,
            min_similarity: self.config.min_similarity,
            page_number: None,
        };
        let candidates = self
            .search
            .search_documents(document_ids, &query_vector, query, &filters)
            .await?;
        let candidate_count = candidates.len();
        debug!(candidate_count, "hybrid search complete");

        // The rerank stage must never cut below top_k.
        let rerank_limit = self.config.rerank_top_n.max(self.config.top_k);
        let outcome = rerank_with(query, candidates, self.reranker.as_ref(), rerank_limit).await;
        let reranker_label = outcome.label();
        let (ranked, rerank_fallback) = match outcome {
            RerankOutcome::Reranked(chunks) => (chunks, None),
            RerankOutcome::FellBack { chunks, reason } => (chunks, Some(reason)),
        };

        let chunks = get_top_k_chunks(&ranked, self.config.top_k).to_vec();
        let confidence = self.config.confidence.classify(&chunks);
        let citations = build_citations(&chunks, document_ids.len());

        let metrics = RetrievalMetrics::collect(
            query,
            candidate_count,
            &chunks,
            reranker_label,
            confidence,
            self.search.uses_full_text(),
            started.elapsed(),
        );
        metrics.log();

        Ok(RetrievalResult {
            query: query.to_string(),
            document_count: document_count(&chunks),
            chunks,
            confidence,
            citations,
            rerank_fallback,
            metrics,
        })
    }

    /// Retrieves context, loads and truncates history, and assembles the prompt.
    pub async fn prepare_chat_turn<C>(
        &self,
        conversations: &C,
        request: ChatRequest<'_>,
    ) -> Result<ChatTurn, RagError>
    where
        C: ConversationStore + ?Sized,
    {
        let context = self
            .retrieve_context_for_documents(request.document_ids, request.message)
            .await?;

        let history = conversations.get_history(request.conversation_id).await?;
        let history = truncate_history_with(
            &history,
            self.config.history_token_budget,
            self.config.max_history_messages,
            &CharHeuristic,
        );
        debug!(history_messages = history.len(), "history truncated");

        let mut messages = PromptBuilder::new()
            .with_structured_context(request.structured_context)
            .with_confidence(context.confidence)
            .build(request.message, &context.chunks, &history);
        if self.config.not_found_fallback && context.confidence == ConfidenceLevel::NotFound {
            apply_not_found_fallback(&mut messages);
        }

        Ok(ChatTurn {
            messages,
            user_message: ConversationMessage::new(
                request.conversation_id,
                MessageRole::User,
                request.message,
            ),
            context,
        })
    }
}
