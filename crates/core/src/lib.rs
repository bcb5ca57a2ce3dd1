pub mod citations;
pub mod confidence;
pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod history;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod reranker;
pub mod search;
pub mod stores;
pub mod traits;

pub use citations::{build_citations, document_count, excerpt};
pub use confidence::{
    classify_confidence, has_relevant_result, ConfidenceLevel, ConfidencePolicy,
    ConfidenceThresholds, RecallConfidence,
};
pub use config::{EmbeddingSettings, ProviderKeys, RagConfig};
pub use corpus::{build_memory_store, load_chunk_exports, ChunkRecord};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingClient, OpenAiEmbeddingProvider, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ConfigError, EmbeddingError, FailureKind, ProviderFailure, RagError, StoreError,
};
pub use history::{
    estimate_tokens, truncate_history_to_token_budget, CharHeuristic, FnEstimator, TokenEstimator,
};
pub use metrics::RetrievalMetrics;
pub use models::{
    BoundingBox, Chunk, ConversationMessage, MessageRole, PromptMessage, SearchFilters,
    SourceCitation,
};
pub use orchestrator::{ChatRequest, ChatTurn, HostedRagPipeline, RagPipeline, RetrievalResult};
pub use prompt::{build_prompt, ExtractedField, PromptBuilder, StructuredContext};
pub use reranker::{rerank_chunks, CohereReranker, FallbackReason, RerankOutcome};
pub use search::{fuse_scores, get_top_k_chunks, HybridSearch};
pub use stores::{InMemoryChunkStore, InMemoryConversationStore, PostgrestStore};
pub use traits::{ChunkStore, ConversationStore, EmbeddingProvider, RerankProvider};
