use agency_rag_core::traits::IndexedEmbedding;
use agency_rag_core::{
    build_memory_store, load_chunk_exports, CharacterNgramEmbedder, ChatRequest, Chunk, ChunkStore,
    CohereReranker, ConversationMessage, ConversationStore, EmbeddingClient, EmbeddingProvider,
    InMemoryChunkStore, InMemoryConversationStore, OpenAiEmbeddingProvider, PostgrestStore,
    ProviderFailure, ProviderKeys, RagConfig, RagPipeline, RetrievalResult, SearchFilters,
    StoreError, StructuredContext,
};
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "agency-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Chunk export file or directory of exports, searched in memory.
    #[arg(long, global = true)]
    chunks: Option<PathBuf>,

    /// PostgREST base URL of the chunk store.
    #[arg(long, env = "CHUNK_STORE_URL", global = true)]
    store_url: Option<String>,

    /// API key for the chunk store.
    #[arg(long, env = "CHUNK_STORE_KEY", hide_env_values = true, global = true)]
    store_key: Option<String>,

    /// OpenAI API key for query embeddings.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    openai_api_key: Option<String>,

    /// Cohere API key; reranking is enabled when set.
    #[arg(long, env = "COHERE_API_KEY", hide_env_values = true, global = true)]
    cohere_api_key: Option<String>,

    /// Use the offline n-gram embedder instead of OpenAI.
    #[arg(long, default_value_t = false, global = true)]
    local_embeddings: bool,

    /// JSON file with pipeline settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Weight of vector similarity in the fused score.
    #[arg(long, global = true)]
    vector_weight: Option<f64>,

    /// Number of chunks to keep.
    #[arg(long, global = true)]
    top_k: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve ranked chunks with confidence and metrics.
    Search {
        /// Document id to search; repeat for several documents.
        #[arg(long = "document", required = true)]
        documents: Vec<String>,
        /// Question to retrieve context for.
        #[arg(long)]
        query: String,
    },
    /// Assemble the prompt messages for a chat turn.
    Ask {
        /// Document id in scope; repeat for several documents.
        #[arg(long = "document", required = true)]
        documents: Vec<String>,
        /// The user's question.
        #[arg(long)]
        query: String,
        /// Conversation id used for history lookup.
        #[arg(long, default_value = "cli")]
        conversation: String,
        /// JSON file with prior messages, oldest first.
        #[arg(long)]
        history: Option<PathBuf>,
        /// JSON file with extracted policy fields.
        #[arg(long)]
        structured: Option<PathBuf>,
        /// Replace the question with a fixed reply instruction when nothing is found.
        #[arg(long, default_value_t = false)]
        not_found_fallback: bool,
    },
}

enum QueryEmbedder {
    OpenAi(OpenAiEmbeddingProvider),
    Local(CharacterNgramEmbedder),
}

#[async_trait]
impl EmbeddingProvider for QueryEmbedder {
    fn dimensions(&self) -> usize {
        match self {
            QueryEmbedder::OpenAi(provider) => provider.dimensions(),
            QueryEmbedder::Local(provider) => provider.dimensions(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>, ProviderFailure> {
        match self {
            QueryEmbedder::OpenAi(provider) => provider.embed_batch(texts).await,
            QueryEmbedder::Local(provider) => provider.embed_batch(texts).await,
        }
    }
}

enum Store {
    Memory(InMemoryChunkStore),
    Remote(PostgrestStore),
}

#[async_trait]
impl ChunkStore for Store {
    async fn query_chunks(
        &self,
        document_id: &str,
        query_vector: &[f32],
        query_text: Option<&str>,
        filters: &SearchFilters,
    ) -> Result<Vec<Chunk>, StoreError> {
        match self {
            Store::Memory(store) => {
                store
                    .query_chunks(document_id, query_vector, query_text, filters)
                    .await
            }
            Store::Remote(store) => {
                store
                    .query_chunks(document_id, query_vector, query_text, filters)
                    .await
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "agency-rag boot"
    );

    let mut config = match &cli.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<RagConfig>(&raw).context("parsing config")?
        }
        None => RagConfig::default(),
    };
    if let Some(weight) = cli.vector_weight {
        config.vector_weight = weight;
    }
    if let Some(top_k) = cli.top_k {
        config.top_k = top_k;
    }
    if let Command::Ask {
        not_found_fallback: true,
        ..
    } = &cli.command
    {
        config.not_found_fallback = true;
    }

    let keys = ProviderKeys::new(cli.openai_api_key.clone(), cli.cohere_api_key.clone());
    let embedder = if cli.local_embeddings {
        QueryEmbedder::Local(CharacterNgramEmbedder::default())
    } else {
        QueryEmbedder::OpenAi(OpenAiEmbeddingProvider::new(keys.require_embedding_key()?)?)
    };
    let embeddings = EmbeddingClient::new(embedder, config.embedding.clone());

    let store = match (&cli.chunks, &cli.store_url) {
        (Some(path), _) => {
            let records = load_chunk_exports(path)?;
            Store::Memory(build_memory_store(records, &embeddings).await?)
        }
        (None, Some(url)) => Store::Remote(remote_store(url, cli.store_key.as_deref())?),
        (None, None) => bail!("either --chunks or --store-url is required"),
    };

    let reranker = if keys.is_reranker_enabled() {
        Some(CohereReranker::from_keys(&keys)?)
    } else {
        None
    };
    let pipeline = RagPipeline::new(store, embeddings, reranker, config)?;
    info!(reranker = pipeline.is_reranker_enabled(), "pipeline ready");

    match cli.command {
        Command::Search { documents, query } => {
            let result = pipeline
                .retrieve_context_for_documents(&documents, &query)
                .await?;
            print_retrieval(&result);
        }
        Command::Ask {
            documents,
            query,
            conversation,
            history,
            structured,
            ..
        } => {
            let structured = match structured {
                Some(path) => Some(read_json::<StructuredContext>(&path).await?),
                None => None,
            };

            let conversations: Box<dyn ConversationStore> = match (history, &cli.store_url) {
                (Some(path), _) => {
                    let store = InMemoryConversationStore::new();
                    for mut message in read_json::<Vec<ConversationMessage>>(&path).await? {
                        message.conversation_id = conversation.clone();
                        store.append(message)?;
                    }
                    Box::new(store)
                }
                (None, Some(url)) => Box::new(remote_store(url, cli.store_key.as_deref())?),
                (None, None) => Box::new(InMemoryConversationStore::new()),
            };

            let turn = pipeline
                .prepare_chat_turn(
                    conversations.as_ref(),
                    ChatRequest {
                        conversation_id: &conversation,
                        document_ids: &documents,
                        message: &query,
                        structured_context: structured.as_ref(),
                    },
                )
                .await?;

            println!("{}", serde_json::to_string_pretty(&turn.messages)?);
            println!("confidence: {}", turn.context.confidence.as_str());
            println!("citations: {}", serde_json::to_string_pretty(&turn.context.citations)?);
        }
    }

    Ok(())
}

fn remote_store(url: &str, key: Option<&str>) -> anyhow::Result<PostgrestStore> {
    let key = match key {
        Some(key) if !key.trim().is_empty() => key,
        _ => bail!("--store-key is required with --store-url"),
    };
    Ok(PostgrestStore::new(url, key)?)
}

async fn read_json<T>(path: &Path) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_retrieval(result: &RetrievalResult) {
    println!("query: {}", result.query);
    for chunk in &result.chunks {
        println!(
            "[{}] page={} score={:.4} similarity={:.4} chunk={}",
            chunk.display_name(),
            chunk.page_number,
            chunk.rerank_score.unwrap_or(chunk.score),
            chunk.similarity,
            chunk.chunk_id
        );
        println!("  {}", agency_rag_core::excerpt(&chunk.content));
    }

    if result.chunks.is_empty() {
        warn!(query = %result.query, "no relevant sections found");
    }

    println!(
        "confidence: {} documents={} reranker={}",
        result.confidence.as_str(),
        result.document_count,
        result.metrics.reranker
    );
    println!(
        "metrics: candidates={} returned={} latency_ms={} relevant={}",
        result.metrics.candidates_retrieved,
        result.metrics.chunks_returned,
        result.metrics.latency_ms,
        result.metrics.has_relevant_result
    );
}
